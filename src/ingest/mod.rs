//! Event intake and time-windowed batching.
//!
//! ```text
//! producers → BatchScheduler::enqueue → IngestQueue (per source)
//!                      │ timer fires
//!                      ▼
//!              sealed batches → BatchHandler
//! ```

pub mod queue;
pub mod scheduler;

// Re-export key types
pub use queue::IngestQueue;
pub use scheduler::{BatchScheduler, Phase, SchedulerError, SchedulerHandle};
