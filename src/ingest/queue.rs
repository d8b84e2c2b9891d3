//! Per-source buffers of pending events.
//!
//! Events are kept in arrival order per source. Sources are remembered in the
//! order they first produced an event so that sealed batches come out in a
//! stable order.

use std::collections::HashMap;

use crate::domain::{Batch, Event, EventId, SourceId};

#[derive(Debug, Default)]
pub struct IngestQueue {
    order: Vec<SourceId>,
    buffers: HashMap<SourceId, Vec<Event>>,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to its source's buffer
    pub fn push(&mut self, event: Event) {
        let source = event.source.clone();
        let buffer = self.buffers.entry(source.clone()).or_insert_with(|| {
            self.order.push(source);
            Vec::new()
        });
        buffer.push(event);
    }

    /// Drop a pending event. Returns false if it was not pending.
    pub fn remove(&mut self, source: &SourceId, id: &EventId) -> bool {
        let Some(buffer) = self.buffers.get_mut(source) else {
            return false;
        };
        let before = buffer.len();
        buffer.retain(|e| &e.id != id);
        before != buffer.len()
    }

    /// Replace a pending event by id, keeping its position.
    /// Returns false if it was not pending.
    pub fn update(&mut self, event: Event) -> bool {
        let slot = self
            .buffers
            .get_mut(&event.source)
            .and_then(|buffer| buffer.iter_mut().find(|e| e.id == event.id));

        match slot {
            Some(slot) => {
                *slot = event;
                true
            }
            None => false,
        }
    }

    /// Total number of pending events
    pub fn len(&self) -> usize {
        self.buffers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.values().all(Vec::is_empty)
    }

    /// Seal every non-empty buffer and leave the queue empty
    pub fn take_all(&mut self) -> Vec<Batch> {
        let mut buffers = std::mem::take(&mut self.buffers);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|source| {
                let events = buffers.remove(&source)?;
                (!events.is_empty()).then(|| Batch::new(source, events))
            })
            .collect()
    }
}
