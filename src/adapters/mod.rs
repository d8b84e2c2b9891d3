//! Adapter interfaces for external systems.
//!
//! The pipeline talks to four collaborators: the source history it refreshes
//! batches against, the policy text provider, the generation backend, and the
//! enforcement sink that receives reconciled actions.

pub mod history;
pub mod openai;
pub mod policy;
pub mod sink;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::ConversationRequest;
use crate::domain::{ActionRecord, Event, SourceId};

// Re-export the bundled adapters
pub use history::{MemoryEventLog, NoHistory};
pub use openai::OpenAiBackend;
pub use policy::StaticPolicy;
pub use sink::JsonLinesSink;

/// Authoritative event history of a source
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// The most recent `limit` events of `source`, oldest first
    async fn fetch_recent(&self, source: &SourceId, limit: usize) -> Result<Vec<Event>>;
}

/// Per-source policy text injected into the system instruction
pub trait PolicyProvider: Send + Sync {
    fn policy_text(&self, source: &SourceId) -> String;
}

/// Structured-output generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Generate one raw output per conversation, positionally correlated
    async fn generate_batch(&self, conversations: &[ConversationRequest]) -> Result<Vec<String>>;

    /// Health check
    async fn health_check(&self) -> Result<()>;
}

/// Receives reconciled, non-trivial actions; owns every side effect
#[async_trait]
pub trait EnforcementSink: Send + Sync {
    async fn on_actions(&self, source: &SourceId, actions: Vec<ActionRecord>) -> Result<()>;
}
