//! Degradations the pipeline absorbs instead of failing.
//!
//! None of these stop the scheduler. Each one is logged when it occurs and
//! collected in the cycle report so callers and tests can see what happened.
//!
//! Fields are named `source_id` because thiserror reserves `source`.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{ActionKind, AuthorId, EventId, SourceId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Model output could not be parsed; the conversation yields no actions
    #[error("Schema violation for source {source_id}: {detail}")]
    SchemaViolation { source_id: SourceId, detail: String },

    /// Model referenced identifiers outside the batch
    #[error("Identifier mismatch for source {source_id}, author {author}: {unknown:?}")]
    IdentifierMismatch {
        source_id: SourceId,
        author: AuthorId,
        unknown: Vec<EventId>,
    },

    /// Model proposed conflicting parameters; the safe default was used
    #[error("Contradictory {kind} parameters for source {source_id}, author {author}")]
    ContradictoryParameters {
        source_id: SourceId,
        author: AuthorId,
        kind: ActionKind,
    },

    /// Backend call failed; every conversation of the cycle yields no actions
    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend call exceeded the cycle timeout
    #[error("Generation backend timed out after {0:?}")]
    BackendTimeout(Duration),

    /// Batch had nothing to moderate; no conversation was built
    #[error("Empty batch for source {0}")]
    EmptyBatch(SourceId),
}

impl Fault {
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, Fault::SchemaViolation { .. })
    }
}
