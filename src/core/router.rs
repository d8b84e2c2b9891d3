//! Hand-off of reconciled actions to enforcement.

use std::sync::Arc;

use tracing::{debug, error};

use crate::adapters::EnforcementSink;
use crate::domain::{ActionRecord, SourceId};

pub struct ActionRouter {
    sink: Arc<dyn EnforcementSink>,
}

impl ActionRouter {
    pub fn new(sink: Arc<dyn EnforcementSink>) -> Self {
        Self { sink }
    }

    /// Drop no-ops, group by source, and call the sink once per source.
    ///
    /// Returns the number of sources the sink was invoked for. Each sink call
    /// runs in its own task; a failing or panicking call is logged and does
    /// not affect the other sources.
    pub async fn route(&self, results: Vec<(SourceId, Vec<ActionRecord>)>) -> usize {
        let mut grouped: Vec<(SourceId, Vec<ActionRecord>)> = Vec::new();

        for (source, actions) in results {
            let actions: Vec<ActionRecord> = actions.into_iter().filter(|a| !a.is_noop()).collect();
            if actions.is_empty() {
                continue;
            }
            match grouped.iter_mut().find(|(s, _)| *s == source) {
                Some((_, existing)) => existing.extend(actions),
                None => grouped.push((source, actions)),
            }
        }

        let dispatched = grouped.len();
        for (source, actions) in grouped {
            debug!(%source, count = actions.len(), "Routing actions to enforcement");
            let sink = Arc::clone(&self.sink);
            let target = source.clone();
            match tokio::spawn(async move { sink.on_actions(&target, actions).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(%source, error = %e, "Enforcement sink failed"),
                Err(e) => error!(%source, error = %e, "Enforcement sink panicked"),
            }
        }

        dispatched
    }
}
