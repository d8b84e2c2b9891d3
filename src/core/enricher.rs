//! Refresh of sealed batches against source history.
//!
//! Nothing is cached between cycles, so edits and deletions that happened
//! after ingestion are picked up here, immediately before inference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::adapters::HistorySource;
use crate::domain::{Batch, EnrichedBatch, Event, EventId};

pub struct ContextEnricher {
    history: Arc<dyn HistorySource>,
    history_limit: usize,
    timeout: Duration,
}

impl ContextEnricher {
    pub fn new(history: Arc<dyn HistorySource>, history_limit: usize, timeout: Duration) -> Self {
        Self {
            history,
            history_limit,
            timeout,
        }
    }

    /// Merge the freshest source history into a sealed batch.
    ///
    /// Fetched versions replace sealed ones by id. A sealed event missing from
    /// a fetched window that reaches back past it was deleted and is dropped.
    /// Fetched events outside the batch become context. If the refresh fails
    /// or does not answer within the timeout, the sealed content is used
    /// unchanged.
    pub async fn enrich(&self, batch: Batch) -> EnrichedBatch {
        // Room for the whole batch plus the requested amount of context
        let limit = batch.len() + self.history_limit;

        let fetch = self.history.fetch_recent(&batch.source, limit);
        let fetched = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(e)) => {
                warn!(source = %batch.source, error = %e, "History refresh failed, using sealed batch");
                return EnrichedBatch::from_sealed(batch);
            }
            Err(_) => {
                warn!(
                    source = %batch.source,
                    timeout = ?self.timeout,
                    "History refresh timed out, using sealed batch"
                );
                return EnrichedBatch::from_sealed(batch);
            }
        };

        merge_history(batch, fetched, self.history_limit)
    }
}

fn merge_history(batch: Batch, fetched: Vec<Event>, history_limit: usize) -> EnrichedBatch {
    if fetched.is_empty() {
        return EnrichedBatch::from_sealed(batch);
    }

    let window_start = fetched.iter().map(|e| e.timestamp).min();
    let mut fresh: HashMap<EventId, Event> = HashMap::new();
    let mut context: Vec<Event> = Vec::new();

    for event in fetched {
        if event.source != batch.source {
            continue;
        }
        if batch.events.iter().any(|e| e.id == event.id) {
            fresh.insert(event.id.clone(), event);
        } else {
            context.push(event);
        }
    }

    let Batch {
        source,
        events,
        sealed_at,
    } = batch;

    let mut refreshed = Vec::with_capacity(events.len());
    for sealed in events {
        match fresh.remove(&sealed.id) {
            Some(current) => refreshed.push(current),
            None if window_start.is_some_and(|start| start <= sealed.timestamp) => {
                debug!(source = %source, event = %sealed.id, "Event deleted at source, dropping");
            }
            None => refreshed.push(sealed),
        }
    }

    context.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let skip = context.len().saturating_sub(history_limit);
    let context = context.into_iter().skip(skip).collect();

    EnrichedBatch {
        batch: Batch {
            source,
            events: refreshed,
            sealed_at,
        },
        context,
    }
}
