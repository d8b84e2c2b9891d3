//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use warden::adapters::{EnforcementSink, GenerationBackend, NoHistory, StaticPolicy};
use warden::config::ResolvedConfig;
use warden::core::{BatchHandler, ConversationRequest, CycleReport, FlushPipeline};
use warden::domain::{ActionRecord, Batch, Event, SourceId};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn event(id: &str, source: &str, author: &str, offset_secs: i64, content: &str) -> Event {
    Event::new(
        id,
        source,
        author,
        base_time() + chrono::Duration::seconds(offset_secs),
        content,
    )
}

/// One raw action entry as a model would emit it
pub fn raw_action(author: &str, action: &str, targets: &[&str], timeout: i64, ban: i64) -> serde_json::Value {
    json!({
        "author_id": author,
        "action": action,
        "reason": "policy violation",
        "target_ids": targets,
        "timeout_duration": timeout,
        "ban_duration": ban,
    })
}

pub fn raw_response(source: &str, actions: Vec<serde_json::Value>) -> String {
    json!({ "source_id": source, "actions": actions }).to_string()
}

/// Backend answering from a per-source script and recording every call
#[derive(Default)]
pub struct ScriptedBackend {
    responses: HashMap<String, String>,
    calls: Mutex<Vec<Vec<SourceId>>>,
    hang_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, source: &str, raw: impl Into<String>) -> Self {
        self.responses.insert(source.to_string(), raw.into());
        self
    }

    /// Never answer the next `n` calls
    pub fn hang_first(self, n: usize) -> Self {
        self.hang_calls.store(n, Ordering::SeqCst);
        self
    }

    /// Sources carried by each call, in call order
    pub fn calls(&self) -> Vec<Vec<SourceId>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_batch(&self, conversations: &[ConversationRequest]) -> Result<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .push(conversations.iter().map(|c| c.source.clone()).collect());

        let hang = self
            .hang_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        Ok(conversations
            .iter()
            .map(|c| {
                self.responses
                    .get(c.source.as_str())
                    .cloned()
                    .unwrap_or_else(|| raw_response(c.source.as_str(), vec![]))
            })
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink recording every invocation
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(SourceId, Vec<ActionRecord>)>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<(SourceId, Vec<ActionRecord>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EnforcementSink for RecordingSink {
    async fn on_actions(&self, source: &SourceId, actions: Vec<ActionRecord>) -> Result<()> {
        self.calls.lock().unwrap().push((source.clone(), actions));
        Ok(())
    }
}

pub fn pipeline(backend: Arc<ScriptedBackend>, sink: Arc<RecordingSink>) -> FlushPipeline {
    FlushPipeline::from_config(
        &ResolvedConfig::default(),
        Arc::new(NoHistory),
        Arc::new(StaticPolicy::new("Be kind.")),
        backend,
        sink,
    )
}

/// Batch handler keeping every cycle report
pub struct ReportingHandler {
    pipeline: FlushPipeline,
    reports: Mutex<Vec<CycleReport>>,
}

impl ReportingHandler {
    pub fn new(pipeline: FlushPipeline) -> Self {
        Self {
            pipeline,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchHandler for ReportingHandler {
    async fn handle(&self, batches: Vec<Batch>) {
        let report = self.pipeline.run_cycle(batches).await;
        self.reports.lock().unwrap().push(report);
    }
}
