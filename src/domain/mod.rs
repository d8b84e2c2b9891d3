//! Domain types for the moderation pipeline.
//!
//! This module contains the core data structures:
//! - Event: Normalized inbound events and their identifiers
//! - Batch: Sealed per-source event batches
//! - Action: Reconciled decisions handed to enforcement

pub mod action;
pub mod batch;
pub mod event;

// Re-export commonly used types
pub use action::{ActionDuration, ActionKind, ActionRecord};
pub use batch::{Batch, EnrichedBatch};
pub use event::{AuthorId, Event, EventId, MediaRef, SourceId};
