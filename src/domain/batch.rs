//! Sealed per-source batches.
//!
//! A batch holds the events one source produced between two flushes, in
//! arrival order. It is sealed the moment the scheduler swaps it out of the
//! ingest queue and lives only until its cycle has been reconciled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{AuthorId, Event, EventId, SourceId};

/// Events from exactly one source, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// The source every event belongs to
    pub source: SourceId,

    /// Events in arrival order
    pub events: Vec<Event>,

    /// When the scheduler sealed the batch
    pub sealed_at: DateTime<Utc>,
}

impl Batch {
    /// Seal a batch now
    pub fn new(source: SourceId, events: Vec<Event>) -> Self {
        Self {
            source,
            events,
            sealed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Authors present in the batch, in order of first appearance
    pub fn authors(&self) -> Vec<AuthorId> {
        let mut authors: Vec<AuthorId> = Vec::new();
        for event in &self.events {
            if !authors.contains(&event.author) {
                authors.push(event.author.clone());
            }
        }
        authors
    }

    /// Event ids authored by `author`, oldest first
    pub fn events_by(&self, author: &AuthorId) -> Vec<EventId> {
        self.events
            .iter()
            .filter(|e| &e.author == author)
            .map(|e| e.id.clone())
            .collect()
    }
}

/// A sealed batch after refresh against source history.
///
/// `batch` holds the actionable events (edits applied, deletions removed).
/// `context` holds recent history that is shown to the model but can never
/// be the target of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedBatch {
    pub batch: Batch,
    pub context: Vec<Event>,
}

impl EnrichedBatch {
    /// Use the sealed content as-is (refresh unavailable)
    pub fn from_sealed(batch: Batch) -> Self {
        Self {
            batch,
            context: Vec::new(),
        }
    }

    pub fn source(&self) -> &SourceId {
        &self.batch.source
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}
