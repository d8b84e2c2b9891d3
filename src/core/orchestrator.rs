//! Conversation construction and the per-cycle fan-in call.
//!
//! Every non-empty batch of a cycle becomes one conversation. All of them are
//! handed to the generation backend in a single `generate_batch` call, so a
//! cycle costs one backend round-trip regardless of how many sources were
//! active.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::{GenerationBackend, PolicyProvider};
use crate::config::POLICY_MARKER;
use crate::domain::{AuthorId, EnrichedBatch, Event, SourceId};

use super::faults::Fault;
use super::schema::{build_schema, SchemaDescriptor};

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
}

/// One part of a multimodal user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// One conversation of a flush cycle, paired with the schema of its batch
#[derive(Debug, Clone)]
pub struct ConversationRequest {
    pub source: SourceId,
    pub messages: Vec<ChatMessage>,
    pub schema: SchemaDescriptor,
}

/// Raw outputs of one fan-in call, positionally aligned with the requests
#[derive(Debug, Clone, Default)]
pub struct InferenceOutcome {
    /// `None` where no usable output exists
    pub outputs: Vec<Option<String>>,

    /// Set when the whole call failed
    pub fault: Option<Fault>,
}

impl InferenceOutcome {
    fn failed(count: usize, fault: Fault) -> Self {
        Self {
            outputs: vec![None; count],
            fault: Some(fault),
        }
    }
}

/// Builds conversations and performs the single backend call per cycle
pub struct InferenceOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    policy: Arc<dyn PolicyProvider>,
    system_prompt: String,
    timeout: Duration,
}

impl InferenceOrchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        policy: Arc<dyn PolicyProvider>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            policy,
            system_prompt: system_prompt.into(),
            timeout,
        }
    }

    /// System instruction for one source, with its policy text injected
    pub fn system_instruction(&self, source: &SourceId) -> String {
        let policy = self.policy.policy_text(source);

        if self.system_prompt.contains(POLICY_MARKER) {
            self.system_prompt.replace(POLICY_MARKER, &policy)
        } else if policy.is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\nPolicy:\n{}", self.system_prompt, policy)
        }
    }

    /// One conversation per non-empty batch; empty batches are skipped
    pub fn prepare(&self, batches: &[EnrichedBatch]) -> (Vec<ConversationRequest>, Vec<Fault>) {
        let mut requests = Vec::with_capacity(batches.len());
        let mut faults = Vec::new();

        for enriched in batches {
            if enriched.is_empty() {
                debug!(source = %enriched.source(), "Skipping empty batch");
                faults.push(Fault::EmptyBatch(enriched.source().clone()));
                continue;
            }

            let schema = build_schema(&enriched.batch);
            let messages = vec![
                ChatMessage {
                    role: Role::System,
                    content: MessageContent::Text(self.system_instruction(enriched.source())),
                },
                ChatMessage {
                    role: Role::User,
                    content: MessageContent::Parts(user_content(enriched)),
                },
            ];

            requests.push(ConversationRequest {
                source: enriched.source().clone(),
                messages,
                schema,
            });
        }

        (requests, faults)
    }

    /// Submit every conversation of the cycle in one backend call
    pub async fn infer(&self, requests: &[ConversationRequest]) -> InferenceOutcome {
        if requests.is_empty() {
            return InferenceOutcome::default();
        }

        info!(
            backend = self.backend.name(),
            conversations = requests.len(),
            "Submitting cycle to generation backend"
        );

        match tokio::time::timeout(self.timeout, self.backend.generate_batch(requests)).await {
            Ok(Ok(outputs)) if outputs.len() == requests.len() => InferenceOutcome {
                outputs: outputs.into_iter().map(Some).collect(),
                fault: None,
            },
            Ok(Ok(outputs)) => {
                let detail = format!(
                    "expected {} outputs, got {}",
                    requests.len(),
                    outputs.len()
                );
                warn!(%detail, "Backend returned a misaligned result");
                InferenceOutcome::failed(requests.len(), Fault::BackendUnavailable(detail))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Generation backend failed");
                InferenceOutcome::failed(requests.len(), Fault::BackendUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Generation backend timed out");
                InferenceOutcome::failed(requests.len(), Fault::BackendTimeout(self.timeout))
            }
        }
    }
}

/// Author-grouped JSON payload followed by labelled images
fn user_content(enriched: &EnrichedBatch) -> Vec<ContentPart> {
    let mut entries: Vec<(&Event, bool)> = enriched
        .context
        .iter()
        .map(|e| (e, true))
        .chain(enriched.batch.events.iter().map(|e| (e, false)))
        .collect();
    entries.sort_by(|a, b| a.0.timestamp.cmp(&b.0.timestamp));

    let mut authors: Vec<AuthorId> = enriched.batch.authors();
    for (event, _) in &entries {
        if !authors.contains(&event.author) {
            authors.push(event.author.clone());
        }
    }

    let mut images: Vec<(String, String)> = Vec::new();
    let mut seen_images: HashSet<String> = HashSet::new();

    let authors_json: Vec<serde_json::Value> = authors
        .iter()
        .map(|author| {
            let messages: Vec<serde_json::Value> = entries
                .iter()
                .filter(|(event, _)| &event.author == author)
                .map(|(event, is_history)| {
                    let image_ids: Vec<String> = event
                        .media
                        .iter()
                        .map(|media| {
                            let id = media.content_id();
                            if seen_images.insert(id.clone()) {
                                images.push((id.clone(), media.url.clone()));
                            }
                            id
                        })
                        .collect();

                    let content = if event.content.is_empty() && !image_ids.is_empty() {
                        "[Images only]".to_string()
                    } else {
                        event.content.clone()
                    };

                    json!({
                        "event_id": event.id,
                        "timestamp": event.timestamp.to_rfc3339(),
                        "content": content,
                        "image_ids": image_ids,
                        "is_history": is_history,
                    })
                })
                .collect();

            json!({
                "author_id": author,
                "message_count": messages.len(),
                "messages": messages,
            })
        })
        .collect();

    let payload = json!({
        "source_id": enriched.source(),
        "message_count": entries.len(),
        "unique_author_count": authors.len(),
        "total_images": images.len(),
        "authors": authors_json,
    });

    let mut parts = vec![ContentPart::Text {
        text: payload.to_string(),
    }];
    for (id, url) in images {
        parts.push(ContentPart::Text {
            text: format!("Image (ID: {}):", id),
        });
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url },
        });
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticPolicy;
    use crate::domain::{Batch, MediaRef};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    struct EchoBackend;

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate_batch(&self, conversations: &[ConversationRequest]) -> Result<Vec<String>> {
            Ok(conversations.iter().map(|c| c.source.to_string()).collect())
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn orchestrator(prompt: &str) -> InferenceOrchestrator {
        InferenceOrchestrator::new(
            Arc::new(EchoBackend),
            Arc::new(StaticPolicy::new("No spam.").with_source("memes", "Images only.")),
            prompt,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_policy_injection() {
        let with_marker = orchestrator("Rules: <|POLICY|>. Reply in JSON.");
        assert_eq!(
            with_marker.system_instruction(&"memes".into()),
            "Rules: Images only.. Reply in JSON."
        );

        let without_marker = orchestrator("Moderate.");
        assert_eq!(
            without_marker.system_instruction(&"general".into()),
            "Moderate.\n\nPolicy:\nNo spam."
        );
    }

    #[test]
    fn test_prepare_skips_empty_and_groups_by_author() {
        let now = Utc::now();
        let active = EnrichedBatch {
            batch: Batch::new(
                "s1".into(),
                vec![
                    Event::new("e1", "s1", "u1", now, "hi"),
                    Event::new("e2", "s1", "u2", now + ChronoDuration::seconds(1), "")
                        .with_media(vec![MediaRef::new("https://cdn.example/cat.png")]),
                ],
            ),
            context: vec![Event::new("e0", "s1", "u1", now - ChronoDuration::seconds(30), "earlier")],
        };
        let empty = EnrichedBatch::from_sealed(Batch::new("s2".into(), vec![]));

        let (requests, faults) = orchestrator("Moderate.").prepare(&[active, empty]);

        assert_eq!(requests.len(), 1);
        assert_eq!(faults, vec![Fault::EmptyBatch("s2".into())]);

        let request = &requests[0];
        assert_eq!(request.source.as_str(), "s1");
        assert_eq!(request.messages[0].role, Role::System);

        let MessageContent::Parts(parts) = &request.messages[1].content else {
            panic!("user message should be multimodal");
        };
        // payload + label + image
        assert_eq!(parts.len(), 3);
        let ContentPart::Text { text } = &parts[0] else {
            panic!("first part should be the payload");
        };
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["unique_author_count"], 2);
        assert_eq!(payload["message_count"], 3);
        let u1 = &payload["authors"][0];
        assert_eq!(u1["author_id"], "u1");
        assert_eq!(u1["messages"][0]["event_id"], "e0");
        assert_eq!(u1["messages"][0]["is_history"], true);
        assert_eq!(payload["authors"][1]["messages"][0]["content"], "[Images only]");

        // Context events never widen the schema
        assert_eq!(request.schema.events_for(&"u1".into()).len(), 1);
    }

    #[tokio::test]
    async fn test_infer_without_requests_makes_no_call() {
        let outcome = orchestrator("Moderate.").infer(&[]).await;
        assert!(outcome.outputs.is_empty());
        assert!(outcome.fault.is_none());
    }
}
