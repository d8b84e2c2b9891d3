//! Configuration for warden.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (WARDEN_BASE_URL, WARDEN_MODEL, WARDEN_API_KEY)
//! 2. Config file (explicit path, or .warden/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .warden/config.yaml
//! - Falls back to ~/.warden/config.yaml

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 10.0;

/// Marker in the system prompt replaced by the per-source policy text
pub const POLICY_MARKER: &str = "<|POLICY|>";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a moderation assistant for an online community. \
You receive a JSON document listing recent messages grouped by author. Messages marked \
is_history are context only. Decide, for every author, whether an action is required \
under the policy below. Only reference author and message identifiers that appear in \
the input. Reply with a single JSON object matching the supplied schema.\n\n\
Policy:\n<|POLICY|>";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub batching: Option<BatchingConfig>,
    #[serde(default)]
    pub reconcile: Option<ReconcileConfig>,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchingConfig {
    pub flush_interval_secs: Option<f64>,
    pub inference_timeout_secs: Option<u64>,
    pub enrichment_timeout_secs: Option<u64>,
    pub history_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconcileConfig {
    pub repair_lookback: Option<usize>,
    pub safe_timeout_minutes: Option<u32>,
    pub safe_ban_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    pub system_prompt: Option<String>,
    pub default_rules: Option<String>,
    /// Per-source rules that replace `default_rules`
    #[serde(default)]
    pub sources: HashMap<String, String>,
}

/// Flush cycle timing
#[derive(Debug, Clone, Serialize)]
pub struct BatchingSettings {
    pub flush_interval_secs: f64,
    pub inference_timeout_secs: u64,
    /// Budget for each history refresh before the sealed batch is used as is
    pub enrichment_timeout_secs: u64,
    pub history_limit: usize,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            inference_timeout_secs: 60,
            enrichment_timeout_secs: 10,
            history_limit: 20,
        }
    }
}

impl BatchingSettings {
    /// Flush window; values that do not fit a `Duration` fall back to the default
    pub fn flush_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.flush_interval_secs.max(0.0)).unwrap_or_else(|e| {
            warn!(
                flush_interval_secs = self.flush_interval_secs,
                error = %e,
                "Invalid flush interval, using default"
            );
            Duration::from_secs_f64(DEFAULT_FLUSH_INTERVAL_SECS)
        })
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn enrichment_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment_timeout_secs)
    }
}

/// Response repair parameters
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSettings {
    /// How many of an author's most recent events may stand in for an unknown target
    pub repair_lookback: usize,
    /// Timeout used when the model proposes conflicting durations
    pub safe_timeout_minutes: u32,
    /// Ban length used when the model proposes conflicting durations
    pub safe_ban_minutes: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            repair_lookback: 3,
            safe_timeout_minutes: 10,
            safe_ban_minutes: 1440,
        }
    }
}

/// OpenAI-compatible endpoint settings
#[derive(Debug, Clone, Serialize)]
pub struct BackendSettings {
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: String::new(),
            api_key: None,
        }
    }
}

/// Instruction and policy text
#[derive(Debug, Clone, Serialize)]
pub struct PolicySettings {
    pub system_prompt: String,
    pub default_rules: String,
    pub sources: HashMap<String, String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            default_rules: "Be respectful. No spam, harassment, or illegal content.".to_string(),
            sources: HashMap::new(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub batching: BatchingSettings,
    pub reconcile: ReconcileSettings,
    pub backend: BackendSettings,
    pub policy: PolicySettings,
}

impl ResolvedConfig {
    /// Merge a parsed config file over the defaults
    fn from_file(config: ConfigFile, config_file: Option<PathBuf>) -> Self {
        let mut resolved = Self {
            config_file,
            ..Default::default()
        };

        if let Some(batching) = config.batching {
            let b = &mut resolved.batching;
            b.flush_interval_secs = batching.flush_interval_secs.unwrap_or(b.flush_interval_secs);
            b.inference_timeout_secs = batching
                .inference_timeout_secs
                .unwrap_or(b.inference_timeout_secs);
            b.enrichment_timeout_secs = batching
                .enrichment_timeout_secs
                .unwrap_or(b.enrichment_timeout_secs);
            b.history_limit = batching.history_limit.unwrap_or(b.history_limit);
        }

        if let Some(reconcile) = config.reconcile {
            let r = &mut resolved.reconcile;
            r.repair_lookback = reconcile.repair_lookback.unwrap_or(r.repair_lookback);
            r.safe_timeout_minutes = reconcile
                .safe_timeout_minutes
                .unwrap_or(r.safe_timeout_minutes);
            r.safe_ban_minutes = reconcile.safe_ban_minutes.unwrap_or(r.safe_ban_minutes);
        }

        if let Some(backend) = config.backend {
            let b = &mut resolved.backend;
            if let Some(base_url) = backend.base_url {
                b.base_url = base_url;
            }
            if let Some(model) = backend.model {
                b.model = model;
            }
            b.api_key = backend.api_key;
        }

        if let Some(policy) = config.policy {
            let p = &mut resolved.policy;
            if let Some(prompt) = policy.system_prompt {
                p.system_prompt = prompt;
            }
            if let Some(rules) = policy.default_rules {
                p.default_rules = rules;
            }
            p.sources = policy.sources;
        }

        resolved
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("WARDEN_BASE_URL") {
            self.backend.base_url = base_url;
        }
        if let Some(model) = lookup("WARDEN_MODEL") {
            self.backend.model = model;
        }
        if let Some(api_key) = lookup("WARDEN_API_KEY") {
            self.backend.api_key = Some(api_key);
        }
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(".warden").join("config.yaml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let home_config = dirs::home_dir()?.join(".warden").join("config.yaml");
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from an explicit file, or by discovery when `None`
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let mut resolved = match config_file {
        Some(path) => {
            let file = load_config_file(&path)?;
            ResolvedConfig::from_file(file, Some(path))
        }
        None => ResolvedConfig::default(),
    };

    resolved.apply_env(|key| std::env::var(key).ok());
    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config(None).map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
