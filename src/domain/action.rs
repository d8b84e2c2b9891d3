//! Validated moderation decisions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::event::{AuthorId, EventId};

/// Kind of action the model may request.
///
/// Variants are declared from least to most severe; the derived ordering is
/// used when several candidates for one author have to be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Nothing to do
    #[serde(rename = "null")]
    NoOp,

    /// Escalate to human review
    Review,

    /// Remove the targeted events
    Delete,

    /// Warn the author
    Warn,

    /// Temporarily mute the author
    Timeout,

    /// Remove the author from the source
    Kick,

    /// Ban the author
    Ban,
}

impl ActionKind {
    /// All kinds, in severity order
    pub const ALL: [ActionKind; 7] = [
        ActionKind::NoOp,
        ActionKind::Review,
        ActionKind::Delete,
        ActionKind::Warn,
        ActionKind::Timeout,
        ActionKind::Kick,
        ActionKind::Ban,
    ];

    /// Wire name used in model output and schemas
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NoOp => "null",
            ActionKind::Review => "review",
            ActionKind::Delete => "delete",
            ActionKind::Warn => "warn",
            ActionKind::Timeout => "timeout",
            ActionKind::Kick => "kick",
            ActionKind::Ban => "ban",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(value.trim()))
    }

    /// Kinds that may only be acted on with at least one target event
    pub fn requires_evidence(&self) -> bool {
        matches!(self, ActionKind::Kick | ActionKind::Ban)
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, ActionKind::NoOp)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a timeout or ban lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDuration {
    Minutes(u32),
    Permanent,
}

impl ActionDuration {
    /// Interpret a raw model value: `-1` is permanent, `0` or less means absent
    pub fn from_raw_minutes(raw: i64) -> Option<Self> {
        match raw {
            -1 => Some(Self::Permanent),
            n if n > 0 => u32::try_from(n).ok().map(Self::Minutes),
            _ => None,
        }
    }
}

/// A reconciled decision about one author in one batch.
///
/// `author` is always an author of the batch it came from and every entry of
/// `targets` is an event that author produced in that batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub author: AuthorId,
    pub kind: ActionKind,
    pub targets: Vec<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<ActionDuration>,
    pub reason: String,
}

impl ActionRecord {
    pub fn is_noop(&self) -> bool {
        self.kind.is_noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ActionKind::parse("null"), Some(ActionKind::NoOp));
        assert_eq!(ActionKind::parse("BAN"), Some(ActionKind::Ban));
        assert_eq!(ActionKind::parse("mute"), None);

        let json = serde_json::to_string(&ActionKind::NoOp).unwrap();
        assert_eq!(json, "\"null\"");
    }

    #[test]
    fn test_severity_order() {
        assert!(ActionKind::Ban > ActionKind::Kick);
        assert!(ActionKind::Warn > ActionKind::Delete);
        assert!(ActionKind::Review > ActionKind::NoOp);
    }

    #[test]
    fn test_duration_from_raw() {
        assert_eq!(ActionDuration::from_raw_minutes(-1), Some(ActionDuration::Permanent));
        assert_eq!(ActionDuration::from_raw_minutes(0), None);
        assert_eq!(ActionDuration::from_raw_minutes(30), Some(ActionDuration::Minutes(30)));
    }
}
