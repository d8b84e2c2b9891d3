//! warden - batched LLM moderation with reconciled output
//!
//! Events from many independent sources are buffered, sealed into per-source
//! batches on a single global timer, and sent to a structured-output model as
//! separate conversations in one backend call. The model's answers are then
//! reconciled against the batches that produced them before anything is
//! acted on.
//!
//! # Architecture
//!
//! - One timer, one swap: all sources flush together
//! - One backend round-trip per cycle regardless of source count
//! - Every surviving action names only authors and events from its own batch
//! - Every failure degrades toward inaction, never toward a wrong action
//!
//! # Modules
//!
//! - `adapters`: External collaborators (history, policy, backend, enforcement)
//! - `core`: Enrichment, schema, inference, reconciliation, routing
//! - `domain`: Data structures (Event, Batch, ActionRecord)
//! - `ingest`: Per-source queue and the batch scheduler
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Moderate a stream of events
//! cat events.jsonl | warden run
//!
//! # Inspect the schema a batch is constrained by
//! warden schema --events events.jsonl
//!
//! # Replay a stored model response
//! warden reconcile --events events.jsonl --response out.txt
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use core::{CycleReport, Fault, FlushPipeline, ResponseReconciler};
pub use domain::{ActionDuration, ActionKind, ActionRecord, AuthorId, Batch, Event, EventId, SourceId};
pub use ingest::{BatchScheduler, SchedulerHandle};
