//! Policy text from configuration.

use std::collections::HashMap;

use super::PolicyProvider;
use crate::config::PolicySettings;
use crate::domain::SourceId;

/// Default rules plus per-source overrides
#[derive(Debug, Clone)]
pub struct StaticPolicy {
    default_rules: String,
    sources: HashMap<String, String>,
}

impl StaticPolicy {
    pub fn new(default_rules: impl Into<String>) -> Self {
        Self {
            default_rules: default_rules.into(),
            sources: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &PolicySettings) -> Self {
        Self {
            default_rules: settings.default_rules.clone(),
            sources: settings.sources.clone(),
        }
    }

    /// Rules for one source, replacing the defaults
    pub fn with_source(mut self, source: impl Into<String>, rules: impl Into<String>) -> Self {
        self.sources.insert(source.into(), rules.into());
        self
    }
}

impl PolicyProvider for StaticPolicy {
    fn policy_text(&self, source: &SourceId) -> String {
        self.sources
            .get(source.as_str())
            .map(|rules| rules.trim())
            .filter(|rules| !rules.is_empty())
            .unwrap_or_else(|| self.default_rules.trim())
            .to_string()
    }
}
