//! JSON Lines enforcement sink.
//!
//! Writes one line per routed action. Used by the CLI to hand decisions to
//! whatever performs enforcement downstream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::EnforcementSink;
use crate::domain::{ActionRecord, SourceId};

#[derive(Serialize)]
struct RoutedLine<'a> {
    source: &'a SourceId,
    #[serde(flatten)]
    action: &'a ActionRecord,
}

/// Writes routed actions as JSON lines
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> EnforcementSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn on_actions(&self, source: &SourceId, actions: Vec<ActionRecord>) -> Result<()> {
        let mut writer = self.writer.lock().await;
        for action in &actions {
            let json = serde_json::to_string(&RoutedLine { source, action })?;
            writer
                .write_all(format!("{}\n", json).as_bytes())
                .await
                .context("Failed to write action line")?;
        }
        writer.flush().await?;
        Ok(())
    }
}
