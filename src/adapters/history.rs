//! Bundled history sources.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::HistorySource;
use crate::domain::{Event, EventId, SourceId};

/// History source for offline use: nothing to refresh against
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

#[async_trait]
impl HistorySource for NoHistory {
    async fn fetch_recent(&self, _source: &SourceId, _limit: usize) -> Result<Vec<Event>> {
        Ok(Vec::new())
    }
}

/// In-process event log keyed by source.
///
/// Mirrors what a transport would report: `record` stores or replaces an
/// event by id, `forget` deletes one.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: RwLock<HashMap<SourceId, Vec<Event>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: Event) {
        let mut events = self.events.write().await;
        let log = events.entry(event.source.clone()).or_default();
        match log.iter_mut().find(|e| e.id == event.id) {
            Some(existing) => *existing = event,
            None => log.push(event),
        }
    }

    pub async fn forget(&self, source: &SourceId, id: &EventId) {
        if let Some(log) = self.events.write().await.get_mut(source) {
            log.retain(|e| &e.id != id);
        }
    }
}

#[async_trait]
impl HistorySource for MemoryEventLog {
    async fn fetch_recent(&self, source: &SourceId, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        let Some(log) = events.get(source) else {
            return Ok(Vec::new());
        };

        let mut recent = log.clone();
        recent.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = recent.len().saturating_sub(limit);
        Ok(recent.into_iter().skip(skip).collect())
    }
}
