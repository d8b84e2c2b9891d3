//! Per-batch output schema construction.
//!
//! The schema enumerates exactly the authors of a batch and, per author, the
//! events they wrote in it. Backends that support guided decoding use the
//! rendered JSON Schema to make invented identifiers impossible at generation
//! time; the reconciler checks the same descriptor afterwards.

use serde::Serialize;
use serde_json::{json, Value};

use crate::domain::{ActionKind, AuthorId, Batch, EventId, SourceId};

/// Longest timeout the model may request (one week, in minutes)
pub const MAX_TIMEOUT_MINUTES: i64 = 60 * 24 * 7;

/// Longest finite ban the model may request (one year, in minutes)
pub const MAX_BAN_MINUTES: i64 = 60 * 24 * 365;

/// The events one author may be targeted for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorScope {
    pub author: AuthorId,
    pub events: Vec<EventId>,
}

/// Identifier constraints derived from one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    pub source: SourceId,
    pub authors: Vec<AuthorScope>,
}

/// Derive the schema of a batch
pub fn build_schema(batch: &Batch) -> SchemaDescriptor {
    let authors = batch
        .authors()
        .into_iter()
        .map(|author| AuthorScope {
            events: batch.events_by(&author),
            author,
        })
        .collect();

    SchemaDescriptor {
        source: batch.source.clone(),
        authors,
    }
}

impl SchemaDescriptor {
    pub fn allows_author(&self, author: &AuthorId) -> bool {
        self.authors.iter().any(|scope| &scope.author == author)
    }

    /// Events `author` may be targeted for, oldest first
    pub fn events_for(&self, author: &AuthorId) -> &[EventId] {
        self.authors
            .iter()
            .find(|scope| &scope.author == author)
            .map(|scope| scope.events.as_slice())
            .unwrap_or(&[])
    }

    /// Render as a JSON Schema document for structured output
    pub fn to_json_schema(&self) -> Value {
        let kinds: Vec<&str> = ActionKind::ALL.iter().map(|k| k.as_str()).collect();

        let per_author: Vec<Value> = self
            .authors
            .iter()
            .map(|scope| {
                let targets = if scope.events.is_empty() {
                    json!({ "type": "array", "items": { "type": "string" }, "maxItems": 0 })
                } else {
                    json!({
                        "type": "array",
                        "items": { "type": "string", "enum": scope.events },
                    })
                };

                json!({
                    "type": "object",
                    "properties": {
                        "author_id": { "type": "string", "enum": [scope.author] },
                        "action": { "type": "string", "enum": kinds },
                        "reason": { "type": "string" },
                        "target_ids": targets,
                        "timeout_duration": {
                            "type": "integer",
                            "minimum": 0,
                            "maximum": MAX_TIMEOUT_MINUTES,
                        },
                        "ban_duration": {
                            "type": "integer",
                            "minimum": -1,
                            "maximum": MAX_BAN_MINUTES,
                        },
                    },
                    "required": [
                        "author_id",
                        "action",
                        "reason",
                        "target_ids",
                        "timeout_duration",
                        "ban_duration",
                    ],
                    "additionalProperties": false,
                })
            })
            .collect();

        json!({
            "type": "object",
            "properties": {
                "source_id": { "type": "string", "enum": [self.source] },
                "actions": {
                    "type": "array",
                    "items": { "oneOf": per_author },
                    "minItems": self.authors.len(),
                    "maxItems": self.authors.len(),
                },
            },
            "required": ["source_id", "actions"],
            "additionalProperties": false,
        })
    }
}
