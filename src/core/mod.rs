//! Core pipeline logic.
//!
//! This module contains:
//! - Enricher: refreshes sealed batches against source history
//! - Schema: per-batch response constraints
//! - Orchestrator: conversation building and the single backend call
//! - Reconciler: validation, repair and deduplication of model output
//! - Router: hand-off of actions to enforcement
//! - Cycle: the flush pipeline tying them together

pub mod cycle;
pub mod enricher;
pub mod faults;
pub mod orchestrator;
pub mod reconciler;
pub mod router;
pub mod schema;

// Re-export commonly used types
pub use cycle::{BatchHandler, CycleReport, FlushPipeline};
pub use enricher::ContextEnricher;
pub use faults::Fault;
pub use orchestrator::{
    ChatMessage, ContentPart, ConversationRequest, InferenceOrchestrator, InferenceOutcome,
    MessageContent, Role,
};
pub use reconciler::{Reconciliation, ResponseReconciler, FALLBACK_REASON};
pub use router::ActionRouter;
pub use schema::{build_schema, AuthorScope, SchemaDescriptor};
