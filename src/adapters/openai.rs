//! OpenAI-compatible chat completions backend.
//!
//! Endpoint: POST {base_url}/chat/completions
//! Auth: optional Bearer token
//!
//! Each conversation is sent with a strict `json_schema` response format
//! built from its batch, so the server's guided decoding enforces the same
//! identifier constraints the reconciler checks afterwards.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::BackendSettings;
use crate::core::{ChatMessage, ConversationRequest};

use super::GenerationBackend;

const SCHEMA_NAME: &str = "moderation_response";

#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self::new(
            settings.base_url.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request_body<'a>(&'a self, conversation: &'a ConversationRequest) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: &conversation.messages,
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": SCHEMA_NAME,
                    "strict": true,
                    "schema": conversation.schema.to_json_schema(),
                }
            }),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn complete(&self, conversation: &ConversationRequest) -> Result<String> {
        let response = self
            .authorized(self.client.post(self.endpoint("chat/completions")))
            .json(&self.request_body(conversation))
            .send()
            .await
            .context("Failed to reach generation backend")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Backend error ({}): {}", status, text);
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Malformed completion response")?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    /// Requests run concurrently. A failed request yields an empty output for
    /// its conversation; the call fails only if every request failed.
    async fn generate_batch(&self, conversations: &[ConversationRequest]) -> Result<Vec<String>> {
        let mut tasks = JoinSet::new();
        for (idx, conversation) in conversations.iter().cloned().enumerate() {
            let backend = self.clone();
            tasks.spawn(async move { (idx, backend.complete(&conversation).await) });
        }

        let mut outputs = vec![String::new(); conversations.len()];
        let mut last_error = None;
        let mut succeeded = 0;

        while let Some(joined) = tasks.join_next().await {
            let (idx, result) = joined.context("Completion task panicked")?;
            match result {
                Ok(text) => {
                    debug!(idx, chars = text.len(), "Completion received");
                    outputs[idx] = text;
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(idx, source = %conversations[idx].source, error = %e, "Completion failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(outputs),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(self.endpoint("models")))
            .send()
            .await
            .context("Failed to reach generation backend")?;

        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("Backend health check failed ({})", response.status())
        }
    }
}
