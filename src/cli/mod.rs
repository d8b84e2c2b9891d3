//! Command-line interface for warden.
//!
//! Provides commands for running the batching pipeline over a stream of
//! events, inspecting the schema a batch would be constrained by, reconciling
//! a stored model response offline, and checking configuration and backend
//! health.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{GenerationBackend, JsonLinesSink, MemoryEventLog, OpenAiBackend, StaticPolicy};
use crate::config::{self, ResolvedConfig};
use crate::core::{build_schema, FlushPipeline, ResponseReconciler};
use crate::domain::{Batch, Event, SourceId};
use crate::ingest::{BatchScheduler, IngestQueue};

/// warden - batched LLM moderation with reconciled output
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (discovered from .warden/config.yaml if not provided)
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Batch events through the backend and print routed actions as JSON lines
    Run {
        /// JSONL events file (reads from stdin if not provided)
        #[arg(short, long)]
        events: Option<PathBuf>,
    },

    /// Print the JSON Schema each batch of events would be constrained by
    Schema {
        /// JSONL events file (reads from stdin if not provided)
        #[arg(short, long)]
        events: Option<PathBuf>,
    },

    /// Reconcile a stored raw model response against its batch
    Reconcile {
        /// JSONL events the response was generated for
        #[arg(short, long)]
        events: PathBuf,

        /// Raw model output
        #[arg(short, long)]
        response: PathBuf,

        /// Source to reconcile (required when the events span several)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,

    /// Check that the generation backend is reachable
    Health,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = resolve_config(self.config.as_deref())?;

        match self.command {
            Commands::Run { events } => run_events(&cfg, events.as_deref()).await,
            Commands::Schema { events } => print_schemas(events.as_deref()),
            Commands::Reconcile {
                events,
                response,
                source,
            } => reconcile_offline(&cfg, &events, &response, source.as_deref()),
            Commands::Config => show_config(&cfg),
            Commands::Health => check_health(&cfg).await,
        }
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    match explicit {
        Some(path) => config::load_config(Some(path)),
        None => config::config().cloned(),
    }
}

/// Read JSONL events from a file or stdin
fn read_events(path: Option<&Path>) -> Result<Vec<Event>> {
    let content = match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read events file: {}", p.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read events from stdin")?;
            buffer
        }
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", idx + 1))
        })
        .collect()
}

/// Group events into batches the way a flush would
fn seal(events: Vec<Event>) -> Vec<Batch> {
    let mut queue = IngestQueue::new();
    for event in events {
        queue.push(event);
    }
    queue.take_all()
}

async fn run_events(cfg: &ResolvedConfig, path: Option<&Path>) -> Result<()> {
    let events = read_events(path)?;
    if events.is_empty() {
        eprintln!("No events to process");
        return Ok(());
    }

    // The replayed events double as the authoritative history
    let history = Arc::new(MemoryEventLog::new());
    for event in &events {
        history.record(event.clone()).await;
    }

    let pipeline = Arc::new(FlushPipeline::from_config(
        cfg,
        history,
        Arc::new(StaticPolicy::from_settings(&cfg.policy)),
        Arc::new(OpenAiBackend::from_settings(&cfg.backend)),
        Arc::new(JsonLinesSink::new(tokio::io::stdout())),
    ));

    let scheduler = Arc::new(BatchScheduler::new(cfg.batching.flush_interval()));
    let handle = scheduler.start(pipeline);

    let count = events.len();
    for event in events {
        scheduler.enqueue(event).await?;
    }
    eprintln!("[Enqueued {} events, draining]", count);

    handle.stop().await
}

fn print_schemas(path: Option<&Path>) -> Result<()> {
    for batch in seal(read_events(path)?) {
        let schema = build_schema(&batch).to_json_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
    }
    Ok(())
}

fn reconcile_offline(
    cfg: &ResolvedConfig,
    events: &Path,
    response: &Path,
    source: Option<&str>,
) -> Result<()> {
    let batches = seal(read_events(Some(events))?);
    let raw = std::fs::read_to_string(response)
        .with_context(|| format!("Failed to read response file: {}", response.display()))?;

    let batch = match source {
        Some(id) => {
            let id = SourceId::from(id);
            batches
                .into_iter()
                .find(|b| b.source == id)
                .with_context(|| format!("No events for source {}", id))?
        }
        None => {
            let mut batches = batches.into_iter();
            let first = batches.next().context("No events to reconcile against")?;
            if batches.next().is_some() {
                anyhow::bail!("Events span several sources; pass --source");
            }
            first
        }
    };

    let reconciliation =
        ResponseReconciler::new(cfg.reconcile.clone()).reconcile(&raw, &build_schema(&batch));

    for action in &reconciliation.actions {
        println!("{}", serde_json::to_string(action)?);
    }
    for fault in &reconciliation.faults {
        eprintln!("[{}]", fault);
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    print!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}

async fn check_health(cfg: &ResolvedConfig) -> Result<()> {
    let backend = OpenAiBackend::from_settings(&cfg.backend);
    backend
        .health_check()
        .await
        .with_context(|| format!("Backend at {} is not healthy", cfg.backend.base_url))?;

    println!("Backend {} at {}: OK", backend.name(), cfg.backend.base_url);
    Ok(())
}
