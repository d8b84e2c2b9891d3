//! Reconciliation Integration Tests
//!
//! Tests that model output is confined to the batch that produced it,
//! repaired where possible and collapsed to one record per author.

mod common;

use common::{event, raw_action, raw_response};
use warden::config::ReconcileSettings;
use warden::core::{build_schema, Fault, ResponseReconciler, SchemaDescriptor, FALLBACK_REASON};
use warden::domain::{ActionDuration, ActionKind, Batch, EventId};

/// u1 wrote e1, e3, e5; u2 wrote e2, e4
fn schema() -> SchemaDescriptor {
    build_schema(&Batch::new(
        "s1".into(),
        vec![
            event("e1", "s1", "u1", 0, "hello"),
            event("e2", "s1", "u2", 1, "buy followers"),
            event("e3", "s1", "u1", 2, "anyone here?"),
            event("e4", "s1", "u2", 3, "buy followers now"),
            event("e5", "s1", "u1", 4, "ok"),
        ],
    ))
}

fn ids(ids: &[&str]) -> Vec<EventId> {
    ids.iter().map(|id| EventId::from(*id)).collect()
}

#[test]
fn test_actions_never_escape_their_batch() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u1", "delete", &["e2", "e3"], 0, 0),
            raw_action("u2", "timeout", &["e4", "e999"], 30, 0),
            raw_action("intruder", "ban", &["e1"], 0, -1),
        ],
    );

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions.len(), 2);
    for record in &result.actions {
        assert!(schema.allows_author(&record.author));
        let authored = schema.events_for(&record.author);
        assert!(record.targets.iter().all(|t| authored.contains(t)));
    }
    assert!(result.faults.iter().any(|f| matches!(
        f,
        Fault::IdentifierMismatch { author, .. } if author.as_str() == "intruder"
    )));
}

#[test]
fn test_reconciling_twice_is_identical() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u1", "warn", &["e404"], 0, 0),
            raw_action("u2", "ban", &["e2"], 0, 60),
            raw_action("u2", "ban", &["e4"], 0, 120),
        ],
    );
    let reconciler = ResponseReconciler::default();

    assert_eq!(reconciler.reconcile(&raw, &schema), reconciler.reconcile(&raw, &schema));
}

#[test]
fn test_at_most_one_record_per_author() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u2", "delete", &["e2"], 0, 0),
            raw_action("u1", "null", &[], 0, 0),
            raw_action("u2", "warn", &["e4", "e2"], 0, 0),
        ],
    );

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    // Batch author order, most severe kind, union of targets
    assert_eq!(result.actions.len(), 2);
    assert_eq!(result.actions[0].author.as_str(), "u1");
    assert_eq!(result.actions[0].kind, ActionKind::NoOp);
    assert_eq!(result.actions[1].author.as_str(), "u2");
    assert_eq!(result.actions[1].kind, ActionKind::Warn);
    assert_eq!(result.actions[1].targets, ids(&["e2", "e4"]));
    assert!(result.faults.is_empty());
}

#[test]
fn test_kick_and_ban_need_evidence() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u1", "ban", &[], 0, -1),
            raw_action("u2", "kick", &[], 0, 0),
        ],
    );

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions.len(), 2);
    assert!(result.actions.iter().all(|a| a.kind == ActionKind::NoOp));
    assert!(result.actions.iter().all(|a| a.duration.is_none()));
}

#[test]
fn test_unrepairable_ban_downgrades_to_noop() {
    let schema = schema();
    let raw = raw_response("s1", vec![raw_action("u2", "ban", &["e1"], 0, 1440)]);
    let reconciler = ResponseReconciler::new(ReconcileSettings {
        repair_lookback: 0,
        ..Default::default()
    });

    let result = reconciler.reconcile(&raw, &schema);

    assert_eq!(result.actions[0].kind, ActionKind::NoOp);
    assert!(result.actions[0].targets.is_empty());
    assert_eq!(result.faults.len(), 1);
}

/// A hallucinated target is replaced by the author's latest event
#[test]
fn test_unknown_target_is_substituted() {
    let schema = schema();
    let raw = raw_response("s1", vec![raw_action("u1", "delete", &["e404"], 0, 0)]);

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].kind, ActionKind::Delete);
    assert_eq!(result.actions[0].targets, ids(&["e5"]));
    assert_eq!(
        result.faults,
        vec![Fault::IdentifierMismatch {
            source_id: "s1".into(),
            author: "u1".into(),
            unknown: ids(&["e404"]),
        }]
    );
}

#[test]
fn test_substitution_skips_targets_already_kept() {
    let schema = schema();
    let raw = raw_response("s1", vec![raw_action("u1", "delete", &["e5", "e2", "e9"], 0, 0)]);

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    // e2 belongs to u2 and e9 to nobody; two substitutes from u1's recent events
    assert_eq!(result.actions[0].targets, ids(&["e5", "e3", "e1"]));
}

/// Conflicting ban lengths fall back to the safe default
#[test]
fn test_conflicting_durations_use_safe_default() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u2", "ban", &["e2"], 0, 60),
            raw_action("u2", "ban", &["e4"], 0, 120),
        ],
    );

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions.len(), 1);
    let record = &result.actions[0];
    assert_eq!(record.kind, ActionKind::Ban);
    assert_eq!(record.duration, Some(ActionDuration::Minutes(1440)));
    assert_eq!(record.targets, ids(&["e2", "e4"]));
    assert!(result
        .faults
        .iter()
        .any(|f| matches!(f, Fault::ContradictoryParameters { kind: ActionKind::Ban, .. })));
}

#[test]
fn test_ban_carrying_a_timeout_uses_safe_default() {
    let schema = schema();
    let raw = raw_response("s1", vec![raw_action("u2", "ban", &["e2"], 30, 60)]);

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions[0].kind, ActionKind::Ban);
    assert_eq!(result.actions[0].duration, Some(ActionDuration::Minutes(1440)));
    assert_eq!(
        result.faults,
        vec![Fault::ContradictoryParameters {
            source_id: "s1".into(),
            author: "u2".into(),
            kind: ActionKind::Ban,
        }]
    );
}

#[test]
fn test_agreeing_durations_are_kept() {
    let schema = schema();
    let raw = raw_response(
        "s1",
        vec![
            raw_action("u2", "timeout", &["e2"], 45, 0),
            raw_action("u2", "timeout", &["e4"], 45, 0),
            raw_action("u1", "ban", &["e1"], 0, -1),
        ],
    );

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions[0].duration, Some(ActionDuration::Permanent));
    assert_eq!(result.actions[1].duration, Some(ActionDuration::Minutes(45)));
    assert!(result.faults.is_empty());
}

#[test]
fn test_malformed_output_yields_nothing() {
    let schema = schema();
    let reconciler = ResponseReconciler::default();

    let cases = [
        "I cannot help with that.".to_string(),
        raw_response("s2", vec![raw_action("u1", "warn", &["e1"], 0, 0)]),
        raw_response("s1", vec![raw_action("u1", "obliterate", &["e1"], 0, 0)]),
        raw_response("s1", vec![raw_action("u1", "timeout", &["e1"], 99_999, 0)]),
        r#"{"source_id": "s1", "actions": [], "extra": true}"#.to_string(),
    ];

    for raw in &cases {
        let result = reconciler.reconcile(raw, &schema);
        assert!(result.actions.is_empty(), "accepted: {}", raw);
        assert_eq!(result.faults.len(), 1);
        assert!(result.faults[0].is_schema_violation());
    }
}

#[test]
fn test_fenced_output_and_trivial_reason() {
    let schema = schema();
    let mut action = raw_action("u2", "warn", &["e2"], 0, 0);
    action["reason"] = "n/a".into();
    let raw = format!("```json\n{}\n```", raw_response("s1", vec![action]));

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].reason, FALLBACK_REASON);
}

#[test]
fn test_braces_in_trailing_note_keep_the_response() {
    let schema = schema();
    let body = raw_response("s1", vec![raw_action("u2", "warn", &["e2"], 0, 0)]);
    let raw = format!("```json\n{}\n```\nNote: I used the {{schema}} provided.", body);

    let result = ResponseReconciler::default().reconcile(&raw, &schema);

    assert!(result.faults.is_empty());
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].kind, ActionKind::Warn);
    assert_eq!(result.actions[0].targets, ids(&["e2"]));
}
