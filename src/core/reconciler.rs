//! Validation and repair of model output.
//!
//! Every raw output is checked against the schema of the batch it was
//! generated for. A structurally invalid response is discarded whole. A
//! structurally valid one is repaired candidate by candidate so that every
//! surviving record only names authors and events that exist in the batch,
//! then collapsed to at most one record per author.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ReconcileSettings;
use crate::domain::{ActionDuration, ActionKind, ActionRecord, AuthorId, EventId};

use super::faults::Fault;
use super::schema::{SchemaDescriptor, MAX_BAN_MINUTES, MAX_TIMEOUT_MINUTES};

/// Reason used when the model gives none worth keeping
pub const FALLBACK_REASON: &str = "Automated moderation action";

const TRIVIAL_REASONS: [&str; 6] = ["", "n/a", "na", "null", "none", "nulldoer"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResponse {
    source_id: String,
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    author_id: String,
    action: String,
    reason: String,
    target_ids: Vec<String>,
    timeout_duration: i64,
    ban_duration: i64,
}

/// A candidate after identifier repair and evidence gating
#[derive(Debug)]
struct Candidate {
    author: AuthorId,
    kind: ActionKind,
    targets: Vec<EventId>,
    duration: Option<ActionDuration>,
    /// Both duration fields were set to different values
    conflicting: bool,
    reason: String,
}

/// Outcome of reconciling one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Validated records in batch author order (may include no-ops)
    pub actions: Vec<ActionRecord>,

    /// Degradations encountered on the way
    pub faults: Vec<Fault>,
}

impl Reconciliation {
    fn rejected(fault: Fault) -> Self {
        Self {
            actions: Vec::new(),
            faults: vec![fault],
        }
    }
}

/// Validates, repairs and deduplicates model output
#[derive(Debug, Clone, Default)]
pub struct ResponseReconciler {
    settings: ReconcileSettings,
}

impl ResponseReconciler {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self { settings }
    }

    /// Reconcile a raw model output against the schema of its batch
    pub fn reconcile(&self, raw: &str, schema: &SchemaDescriptor) -> Reconciliation {
        let violation = |detail: String| {
            warn!(source = %schema.source, %detail, "Discarding model response");
            Reconciliation::rejected(Fault::SchemaViolation {
                source_id: schema.source.clone(),
                detail,
            })
        };

        let Some(payload) = extract_json(raw) else {
            return violation("no JSON object found".to_string());
        };

        let response: RawResponse = match serde_json::from_str(payload) {
            Ok(response) => response,
            Err(e) => return violation(e.to_string()),
        };

        if response.source_id.trim() != schema.source.as_str() {
            return violation(format!(
                "source_id mismatch: expected {}, got {}",
                schema.source, response.source_id
            ));
        }

        let mut kinds = Vec::with_capacity(response.actions.len());
        for (idx, action) in response.actions.iter().enumerate() {
            let Some(kind) = ActionKind::parse(&action.action) else {
                return violation(format!("actions[{}]: unknown action '{}'", idx, action.action));
            };
            if !(0..=MAX_TIMEOUT_MINUTES).contains(&action.timeout_duration) {
                return violation(format!(
                    "actions[{}]: timeout_duration {} out of range",
                    idx, action.timeout_duration
                ));
            }
            if !(-1..=MAX_BAN_MINUTES).contains(&action.ban_duration) {
                return violation(format!(
                    "actions[{}]: ban_duration {} out of range",
                    idx, action.ban_duration
                ));
            }
            kinds.push(kind);
        }

        let mut faults = Vec::new();
        let mut candidates: HashMap<AuthorId, Vec<Candidate>> = HashMap::new();

        for (action, kind) in response.actions.into_iter().zip(kinds) {
            if let Some(candidate) = self.repair(action, kind, schema, &mut faults) {
                candidates
                    .entry(candidate.author.clone())
                    .or_default()
                    .push(candidate);
            }
        }

        let mut actions = Vec::new();
        for scope in &schema.authors {
            if let Some(group) = candidates.remove(&scope.author) {
                actions.push(self.merge(scope.author.clone(), group, schema, &mut faults));
            }
        }

        Reconciliation { actions, faults }
    }

    /// Check the author, repair targets, apply the evidence rule
    fn repair(
        &self,
        action: RawAction,
        kind: ActionKind,
        schema: &SchemaDescriptor,
        faults: &mut Vec<Fault>,
    ) -> Option<Candidate> {
        let author = AuthorId::new(action.author_id.trim());
        let requested = dedup_ids(&action.target_ids);

        if !schema.allows_author(&author) {
            warn!(source = %schema.source, %author, "Dropping action for author outside the batch");
            faults.push(Fault::IdentifierMismatch {
                source_id: schema.source.clone(),
                author,
                unknown: requested,
            });
            return None;
        }

        let authored = schema.events_for(&author);
        let (mut targets, unknown): (Vec<EventId>, Vec<EventId>) =
            requested.into_iter().partition(|id| authored.contains(id));

        if !unknown.is_empty() {
            let substitutes: Vec<EventId> = authored
                .iter()
                .rev()
                .take(self.settings.repair_lookback)
                .filter(|id| !targets.contains(id))
                .take(unknown.len())
                .cloned()
                .collect();

            debug!(
                source = %schema.source,
                %author,
                unknown = ?unknown,
                substitutes = ?substitutes,
                "Substituting recent events for unknown targets"
            );
            faults.push(Fault::IdentifierMismatch {
                source_id: schema.source.clone(),
                author: author.clone(),
                unknown,
            });
            targets.extend(substitutes);
        }

        let kind = if kind.requires_evidence() && targets.is_empty() {
            debug!(source = %schema.source, %author, %kind, "No evidence left, downgrading to no-op");
            ActionKind::NoOp
        } else {
            kind
        };

        let (own, other) = match kind {
            ActionKind::Timeout => (action.timeout_duration, action.ban_duration),
            ActionKind::Ban => (action.ban_duration, action.timeout_duration),
            _ => (0, 0),
        };
        let duration = ActionDuration::from_raw_minutes(own);
        let conflicting = duration.is_some()
            && ActionDuration::from_raw_minutes(other).is_some_and(|d| Some(d) != duration);

        Some(Candidate {
            author,
            kind,
            targets,
            duration,
            conflicting,
            reason: normalize_reason(&action.reason),
        })
    }

    /// Collapse every candidate of one author into a single record
    fn merge(
        &self,
        author: AuthorId,
        group: Vec<Candidate>,
        schema: &SchemaDescriptor,
        faults: &mut Vec<Fault>,
    ) -> ActionRecord {
        let kind = group
            .iter()
            .map(|c| c.kind)
            .max()
            .unwrap_or(ActionKind::NoOp);

        let mut targets: Vec<EventId> = Vec::new();
        for id in group.iter().flat_map(|c| c.targets.iter()) {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }

        let chosen: Vec<&Candidate> = group.iter().filter(|c| c.kind == kind).collect();
        let reason = chosen
            .first()
            .map(|c| c.reason.clone())
            .unwrap_or_else(|| FALLBACK_REASON.to_string());

        let mut durations: Vec<ActionDuration> = Vec::new();
        for duration in chosen.iter().filter_map(|c| c.duration) {
            if !durations.contains(&duration) {
                durations.push(duration);
            }
        }

        let duration = if durations.len() > 1 || chosen.iter().any(|c| c.conflicting) {
            warn!(
                source = %schema.source,
                %author,
                %kind,
                proposed = ?durations,
                "Conflicting durations, using safe default"
            );
            faults.push(Fault::ContradictoryParameters {
                source_id: schema.source.clone(),
                author: author.clone(),
                kind,
            });
            self.safe_duration(kind)
        } else {
            durations.first().copied()
        };

        ActionRecord {
            author,
            kind,
            targets,
            duration,
            reason,
        }
    }

    fn safe_duration(&self, kind: ActionKind) -> Option<ActionDuration> {
        match kind {
            ActionKind::Timeout => Some(ActionDuration::Minutes(self.settings.safe_timeout_minutes)),
            ActionKind::Ban => Some(ActionDuration::Minutes(self.settings.safe_ban_minutes)),
            _ => None,
        }
    }
}

/// Strip code fences and surrounding prose, returning the JSON object text.
///
/// At each opening brace only the leading JSON value is parsed, so trailing
/// text is ignored. The last top-level object found wins.
fn extract_json(raw: &str) -> Option<&str> {
    let mut found = None;
    let mut cursor = 0;

    while let Some(offset) = raw[cursor..].find('{') {
        let start = cursor + offset;
        let mut values = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<serde_json::Value>();

        match values.next() {
            Some(Ok(value)) if value.is_object() => {
                let end = start + values.byte_offset();
                found = Some(&raw[start..end]);
                cursor = end;
            }
            _ => cursor = start + 1,
        }
    }

    found
}

fn dedup_ids(raw: &[String]) -> Vec<EventId> {
    let mut ids: Vec<EventId> = Vec::new();
    for id in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let id = EventId::from(id);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn normalize_reason(reason: &str) -> String {
    let cleaned = reason.trim();
    let lowered = cleaned.to_lowercase();

    if TRIVIAL_REASONS.contains(&lowered.as_str())
        || cleaned.chars().count() < 3
        || !cleaned.chars().any(char::is_alphabetic)
    {
        return FALLBACK_REASON.to_string();
    }

    cleaned.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_prose() {
        let raw = "Sure, here you go:\n```json\n{\"a\": {\"b\": 1}}\n```\nDone.";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn test_extract_json_skips_reasoning_prefix() {
        let raw = "<think>the user wrote {bad}</think>\n{\"source_id\": \"s1\", \"actions\": []}";
        assert_eq!(extract_json(raw), Some("{\"source_id\": \"s1\", \"actions\": []}"));
    }

    #[test]
    fn test_extract_json_ignores_braces_in_trailing_prose() {
        let raw = "```json\n{\"source_id\": \"s1\", \"actions\": []}\n```\nNote: I used the {schema} provided.";
        assert_eq!(extract_json(raw), Some("{\"source_id\": \"s1\", \"actions\": []}"));
    }

    #[test]
    fn test_extract_json_prefers_last_object() {
        let raw = "draft {\"actions\": [1]} then final {\"actions\": []} ok";
        assert_eq!(extract_json(raw), Some("{\"actions\": []}"));
    }

    #[test]
    fn test_extract_json_none_without_object() {
        assert_eq!(extract_json("no decisions today"), None);
        assert_eq!(extract_json("{ not json }"), None);
    }

    #[test]
    fn test_normalize_reason() {
        assert_eq!(normalize_reason("  spamming links "), "spamming links");
        assert_eq!(normalize_reason("N/A"), FALLBACK_REASON);
        assert_eq!(normalize_reason("ok"), FALLBACK_REASON);
        assert_eq!(normalize_reason("!!!"), FALLBACK_REASON);
    }

    #[test]
    fn test_dedup_ids_trims_and_drops_blanks() {
        let ids = dedup_ids(&["e1".to_string(), " e1 ".to_string(), "".to_string(), "e2".to_string()]);
        assert_eq!(ids, vec![EventId::from("e1"), EventId::from("e2")]);
    }
}
