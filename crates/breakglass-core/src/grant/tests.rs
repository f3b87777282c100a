use std::sync::Arc;

use super::*;
use crate::audit::{AuditError, AuditEvent, AuditSink, MemoryAuditSink, actions};
use crate::clock::{Clock, ManualClock, NS_PER_HOUR};
use crate::config::EngineConfig;
use crate::error::GrantError;
use crate::policy::AccessLevel;
use crate::store::{GrantStore, SqliteGrantStore};
use crate::subject::{StaffRole, StaticSubjectRegistry, SubjectRegistry};
use crate::sweeper::ExpirySweeper;

const T0: u64 = 1_700_000_000_000_000_000;
const REASON: &str = "Patient coding unclear in ER, need urgent record view";

struct Harness {
    engine: GrantLifecycleEngine,
    store: Arc<SqliteGrantStore>,
    audit: Arc<MemoryAuditSink>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = Arc::new(SqliteGrantStore::in_memory().unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let clock = Arc::new(ManualClock::new(T0));
    let registry = Arc::new(StaticSubjectRegistry::new());
    registry.insert("nurse-1", StaffRole::Nurse);
    registry.insert("dr-1", StaffRole::Physician);
    registry.insert("desk-1", StaffRole::Receptionist);

    let store_dyn: Arc<dyn GrantStore> = store.clone();
    let registry_dyn: Arc<dyn SubjectRegistry> = registry;
    let audit_dyn: Arc<dyn AuditSink> = audit.clone();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let engine = GrantLifecycleEngine::new(
        store_dyn,
        registry_dyn,
        audit_dyn,
        clock_dyn,
        EngineConfig::default(),
    );
    Harness {
        engine,
        store,
        audit,
        clock,
    }
}

fn request() -> GrantRequest {
    GrantRequest {
        reason: REASON.to_string(),
        emergency_type: "trauma".to_string(),
        ..GrantRequest::default()
    }
}

fn sweeper(h: &Harness) -> ExpirySweeper {
    let store: Arc<dyn GrantStore> = h.store.clone();
    let audit: Arc<dyn AuditSink> = h.audit.clone();
    let clock: Arc<dyn Clock> = h.clock.clone();
    ExpirySweeper::new(store, audit, clock, 100, std::time::Duration::from_secs(60))
}

#[test]
fn request_creates_pending_grant_with_policy_defaults() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();

    assert_eq!(grant.status, GrantStatus::PendingApproval);
    assert_eq!(grant.access_level, AccessLevel::ViewOnly);
    assert_eq!(grant.request_type, RequestType::SelfRequest);
    assert_eq!(grant.requested_at_ns, T0);
    assert_eq!(grant.expires_at_ns, T0 + 4 * NS_PER_HOUR);
    assert_eq!(grant.version, 1);
    assert!(grant.activated_at_ns.is_none());

    let events = h.audit.events_for_grant(&grant.id);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, actions::REQUESTED);
    assert_eq!(events[0].prior_status, None);
    assert_eq!(events[0].new_status, Some(GrantStatus::PendingApproval));
    assert_eq!(events[0].actor, "nurse-1");
}

#[test]
fn requested_duration_is_clamped_to_level_maximum() {
    let h = harness();
    let grant = h
        .engine
        .request_grant(
            "nurse-1",
            GrantRequest {
                duration_hours: Some(100),
                ..request()
            },
        )
        .unwrap();
    assert_eq!(grant.expires_at_ns, T0 + 8 * NS_PER_HOUR);
}

#[test]
fn zero_duration_is_rejected_on_every_create_path() {
    let h = harness();
    let zero = GrantRequest {
        duration_hours: Some(0),
        ..request()
    };

    for result in [
        h.engine.request_grant("nurse-1", zero.clone()),
        h.engine.self_activate("nurse-1", zero),
        h.engine.admin_grant(
            "nurse-1",
            "admin-1",
            AdminGrantRequest {
                access_level: AccessLevel::ViewOnly,
                reason: REASON.to_string(),
                emergency_type: "trauma".to_string(),
                duration_hours: Some(0),
                access_scope: None,
            },
        ),
    ] {
        let err = result.unwrap_err();
        assert!(
            matches!(err, GrantError::Validation { ref field, .. } if field == "duration_hours"),
            "{err}"
        );
    }

    // Nothing was created; an activated grant would otherwise be born
    // expired.
    assert!(h.store.grants_for_subject("nurse-1").unwrap().is_empty());
}

#[test]
fn short_reason_is_rejected() {
    let h = harness();
    let err = h
        .engine
        .request_grant(
            "nurse-1",
            GrantRequest {
                reason: "too short".to_string(),
                ..request()
            },
        )
        .unwrap_err();
    assert!(matches!(err, GrantError::Validation { ref field, .. } if field == "reason"));
}

#[test]
fn missing_emergency_type_is_rejected() {
    let h = harness();
    let err = h
        .engine
        .self_activate(
            "nurse-1",
            GrantRequest {
                emergency_type: "  ".to_string(),
                ..request()
            },
        )
        .unwrap_err();
    assert!(matches!(err, GrantError::Validation { ref field, .. } if field == "emergency_type"));
}

#[test]
fn ineligible_roles_and_unknown_subjects_are_rejected() {
    let h = harness();
    for subject in ["desk-1", "stranger"] {
        let err = h.engine.request_grant(subject, request()).unwrap_err();
        assert!(matches!(err, GrantError::IneligibleSubject { .. }), "{subject}");
    }
}

#[test]
fn emergency_level_cannot_be_self_serviced() {
    let h = harness();
    let req = GrantRequest {
        access_level: Some(AccessLevel::Emergency),
        ..request()
    };
    let err = h.engine.request_grant("nurse-1", req.clone()).unwrap_err();
    assert!(matches!(err, GrantError::LevelNotSelfServiceable { .. }));

    let err = h.engine.self_activate("nurse-1", req).unwrap_err();
    assert!(matches!(err, GrantError::LevelNotSelfServiceable { .. }));
}

#[test]
fn admin_path_may_grant_emergency_level() {
    let h = harness();
    let grant = h
        .engine
        .admin_grant(
            "dr-1",
            "admin-1",
            AdminGrantRequest {
                access_level: AccessLevel::Emergency,
                reason: REASON.to_string(),
                emergency_type: "mass_casualty".to_string(),
                duration_hours: Some(48),
                access_scope: None,
            },
        )
        .unwrap();

    assert_eq!(grant.status, GrantStatus::Active);
    assert_eq!(grant.access_level, AccessLevel::Emergency);
    assert_eq!(grant.request_type, RequestType::AdminGrant);
    assert_eq!(grant.approved_by.as_deref(), Some("admin-1"));
    assert_eq!(grant.activated_at_ns, Some(T0));
    // Clamped to the emergency maximum of 24 hours.
    assert_eq!(grant.expires_at_ns, T0 + 24 * NS_PER_HOUR);
}

#[test]
fn pending_duplicates_are_permitted_but_active_duplicates_are_not() {
    let h = harness();
    let first = h.engine.request_grant("nurse-1", request()).unwrap();
    // Only *active* duplicates are blocked; a second pending request for
    // the same subject is permitted.
    let second = h.engine.request_grant("nurse-1", request()).unwrap();
    assert_ne!(first.id, second.id);

    h.engine.approve(&first.id, "admin-1", None).unwrap();
    let err = h.engine.request_grant("nurse-1", request()).unwrap_err();
    assert!(matches!(err, GrantError::DuplicateActiveGrant { .. }));
    let err = h.engine.self_activate("nurse-1", request()).unwrap_err();
    assert!(matches!(err, GrantError::DuplicateActiveGrant { .. }));
    let err = h
        .engine
        .admin_grant(
            "nurse-1",
            "admin-1",
            AdminGrantRequest {
                access_level: AccessLevel::ViewOnly,
                reason: REASON.to_string(),
                emergency_type: "trauma".to_string(),
                duration_hours: None,
                access_scope: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GrantError::DuplicateActiveGrant { .. }));
}

#[test]
fn approve_activates_and_enables_access_recording() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();
    h.clock.advance(60 * 1_000_000_000);

    let approved = h.engine.approve(&grant.id, "admin-1", Some("ok")).unwrap();
    assert_eq!(approved.status, GrantStatus::Active);
    assert_eq!(approved.approved_by.as_deref(), Some("admin-1"));
    assert_eq!(approved.approved_at_ns, Some(h.clock.now_ns()));
    assert_eq!(approved.activated_at_ns, Some(h.clock.now_ns()));
    assert!(h.engine.has_active_grant("nurse-1").unwrap());

    let updated = h
        .engine
        .record_access(
            "nurse-1",
            AccessRecordRequest {
                record_ref: "patient123".to_string(),
                action: "view".to_string(),
                details: None,
            },
        )
        .unwrap();
    assert_eq!(updated.accessed_records.len(), 1);
    assert_eq!(updated.accessed_records[0].record_ref, "patient123");

    let events = h.audit.events_for_grant(&grant.id);
    let actions_seen: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions_seen,
        vec![actions::REQUESTED, actions::APPROVED, actions::ACCESS_RECORDED]
    );
}

#[test]
fn approve_and_reject_require_pending_status() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();
    h.engine.approve(&grant.id, "admin-1", None).unwrap();

    let err = h.engine.approve(&grant.id, "admin-1", None).unwrap_err();
    assert!(matches!(
        err,
        GrantError::InvalidTransition { current: GrantStatus::Active, .. }
    ));
    let err = h.engine.reject(&grant.id, "admin-1", "late").unwrap_err();
    assert!(matches!(err, GrantError::InvalidTransition { .. }));

    let err = h.engine.approve("no-such-grant", "admin-1", None).unwrap_err();
    assert!(matches!(err, GrantError::NotFound { .. }));
}

#[test]
fn approve_fails_once_request_window_elapsed() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();
    h.clock.set(grant.expires_at_ns + 1);

    let err = h.engine.approve(&grant.id, "admin-1", None).unwrap_err();
    assert!(matches!(err, GrantError::Validation { ref field, .. } if field == "expires_at"));
}

#[test]
fn reject_closes_request_as_revoked() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();

    let err = h.engine.reject(&grant.id, "admin-1", "").unwrap_err();
    assert!(matches!(err, GrantError::Validation { ref field, .. } if field == "reason"));

    let rejected = h
        .engine
        .reject(&grant.id, "admin-1", "no justification on file")
        .unwrap();
    assert_eq!(rejected.status, GrantStatus::Revoked);
    assert_eq!(rejected.revoked_by.as_deref(), Some("admin-1"));
    assert_eq!(
        rejected.revocation_reason.as_deref(),
        Some("no justification on file")
    );
    assert!(!h.engine.has_active_grant("nurse-1").unwrap());
}

#[test]
fn self_activation_is_immediately_observable() {
    let h = harness();
    let grant = h.engine.self_activate("nurse-1", request()).unwrap();
    assert_eq!(grant.status, GrantStatus::Active);
    assert_eq!(grant.activated_at_ns, Some(T0));

    let active = h.engine.active_grant("nurse-1").unwrap().unwrap();
    assert_eq!(active.id, grant.id);
}

#[test]
fn revocation_is_effective_immediately() {
    let h = harness();
    let grant = h.engine.self_activate("nurse-1", request()).unwrap();
    h.engine
        .revoke(&grant.id, "admin-1", "policy violation during session")
        .unwrap();

    assert!(!h.engine.has_active_grant("nurse-1").unwrap());
    let err = h
        .engine
        .record_access(
            "nurse-1",
            AccessRecordRequest {
                record_ref: "patient123".to_string(),
                action: "view".to_string(),
                details: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GrantError::NoActiveGrant { .. }));

    // Revoked is terminal.
    let err = h.engine.revoke(&grant.id, "admin-1", "again").unwrap_err();
    assert!(matches!(err, GrantError::InvalidTransition { .. }));
}

#[test]
fn record_access_requires_active_unexpired_grant() {
    let h = harness();
    let req = AccessRecordRequest {
        record_ref: "patient123".to_string(),
        action: "view".to_string(),
        details: None,
    };

    let err = h.engine.record_access("nurse-1", req.clone()).unwrap_err();
    assert!(matches!(err, GrantError::NoActiveGrant { .. }));

    let grant = h.engine.self_activate("nurse-1", request()).unwrap();
    h.engine.record_access("nurse-1", req.clone()).unwrap();

    // One minute past expiry the append must fail, even though the status
    // column still says active.
    h.clock.set(grant.expires_at_ns + 60 * 1_000_000_000);
    let err = h.engine.record_access("nurse-1", req).unwrap_err();
    assert!(matches!(err, GrantError::NoActiveGrant { .. }));
}

#[test]
fn access_entries_fall_within_the_active_window() {
    let h = harness();
    let grant = h.engine.self_activate("nurse-1", request()).unwrap();
    for i in 0..3 {
        h.clock.advance(NS_PER_HOUR / 2);
        h.engine
            .record_access(
                "nurse-1",
                AccessRecordRequest {
                    record_ref: format!("patient-{i}"),
                    action: "view".to_string(),
                    details: Some("er triage".to_string()),
                },
            )
            .unwrap();
    }

    let stored = h.engine.get(&grant.id).unwrap();
    assert_eq!(stored.accessed_records.len(), 3);
    let activated = stored.activated_at_ns.unwrap();
    for entry in &stored.accessed_records {
        assert!(entry.timestamp_ns >= activated);
        assert!(entry.timestamp_ns < stored.expires_at_ns);
    }
}

#[test]
fn expired_grant_is_swept_on_demand_and_stops_blocking() {
    let h = harness();
    let old = h.engine.self_activate("nurse-1", request()).unwrap();
    h.clock.set(old.expires_at_ns + 1);

    // The expired session no longer counts as active...
    assert!(!h.engine.has_active_grant("nurse-1").unwrap());

    // ...and does not block a new activation; it is completed in passing.
    let fresh = h.engine.self_activate("nurse-1", request()).unwrap();
    assert_ne!(fresh.id, old.id);
    assert_eq!(h.engine.get(&old.id).unwrap().status, GrantStatus::Completed);

    let swept: Vec<AuditEvent> = h
        .audit
        .events_for_grant(&old.id)
        .into_iter()
        .filter(|e| e.action == actions::SWEPT)
        .collect();
    assert_eq!(swept.len(), 1);
}

#[test]
fn review_abuse_flags_the_grant() {
    let h = harness();
    let grant = h.engine.self_activate("nurse-1", request()).unwrap();
    h.clock.set(grant.expires_at_ns + 1);
    sweeper(&h).sweep_once().unwrap();

    let flagged = h
        .engine
        .review(
            &grant.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Abuse,
                notes: Some("Accessed unrelated patient".to_string()),
                follow_up_required: false,
                follow_up_actions: Vec::new(),
            },
        )
        .unwrap();
    assert_eq!(flagged.status, GrantStatus::Flagged);
    let review = flagged.review.as_ref().unwrap();
    assert_eq!(review.outcome, ReviewOutcome::Abuse);
    assert_eq!(review.reviewed_by, "admin-1");
    let investigation = flagged.investigation.as_ref().unwrap();
    assert_eq!(investigation.investigator, "admin-1");

    // Flagged is terminal: a second review fails.
    let err = h
        .engine
        .review(
            &grant.id,
            "admin-2",
            ReviewRequest {
                outcome: ReviewOutcome::Cleared,
                notes: None,
                follow_up_required: false,
                follow_up_actions: Vec::new(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, GrantError::InvalidTransition { .. }));
}

#[test]
fn review_cleared_and_questionable_close_as_reviewed() {
    let h = harness();
    let first = h.engine.self_activate("nurse-1", request()).unwrap();
    let second = h.engine.self_activate("dr-1", request()).unwrap();
    h.clock.set(first.expires_at_ns.max(second.expires_at_ns) + 1);
    sweeper(&h).sweep_once().unwrap();

    let cleared = h
        .engine
        .review(
            &first.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Cleared,
                notes: None,
                follow_up_required: false,
                follow_up_actions: Vec::new(),
            },
        )
        .unwrap();
    assert_eq!(cleared.status, GrantStatus::Reviewed);
    assert!(!cleared.review.as_ref().unwrap().follow_up_required);
    assert!(cleared.investigation.is_none());

    let questionable = h
        .engine
        .review(
            &second.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Questionable,
                notes: Some("unusual volume".to_string()),
                follow_up_required: false,
                follow_up_actions: vec!["interview staff member".to_string()],
            },
        )
        .unwrap();
    assert_eq!(questionable.status, GrantStatus::Reviewed);
    // Questionable outcomes always require follow-up.
    assert!(questionable.review.as_ref().unwrap().follow_up_required);
}

#[test]
fn flag_requires_a_reviewable_status() {
    let h = harness();
    let grant = h.engine.self_activate("nurse-1", request()).unwrap();

    // Active grants cannot be flagged; they must finish first.
    let err = h.engine.flag(&grant.id, "admin-1", "suspicious").unwrap_err();
    assert!(matches!(err, GrantError::InvalidTransition { .. }));

    h.clock.set(grant.expires_at_ns + 1);
    sweeper(&h).sweep_once().unwrap();
    let flagged = h
        .engine
        .flag(&grant.id, "admin-1", "accessed records out of scope")
        .unwrap();
    assert_eq!(flagged.status, GrantStatus::Flagged);
    assert!(flagged.investigation.is_some());

    let err = h.engine.flag(&grant.id, "admin-1", "again").unwrap_err();
    assert!(matches!(err, GrantError::InvalidTransition { .. }));
}

#[test]
fn every_transition_pairs_with_exactly_one_audit_event() {
    let h = harness();
    let grant = h.engine.request_grant("nurse-1", request()).unwrap();
    h.engine.approve(&grant.id, "admin-1", None).unwrap();
    h.clock.set(grant.expires_at_ns + 1);
    sweeper(&h).sweep_once().unwrap();
    h.engine
        .review(
            &grant.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Cleared,
                notes: None,
                follow_up_required: false,
                follow_up_actions: Vec::new(),
            },
        )
        .unwrap();

    let events = h.audit.events_for_grant(&grant.id);
    let actions_seen: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions_seen,
        vec![
            actions::REQUESTED,
            actions::APPROVED,
            actions::SWEPT,
            actions::REVIEWED,
        ]
    );
    for event in &events {
        assert!(event.timestamp_ns >= T0);
        assert!(!event.actor.is_empty());
    }
}

#[test]
fn audit_sink_failure_does_not_abort_the_mutation() {
    struct FailingSink;
    impl AuditSink for FailingSink {
        fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Database(rusqlite::Error::InvalidQuery))
        }
    }

    let store = Arc::new(SqliteGrantStore::in_memory().unwrap());
    let registry = Arc::new(StaticSubjectRegistry::new());
    registry.insert("nurse-1", StaffRole::Nurse);
    let store_dyn: Arc<dyn GrantStore> = store.clone();
    let registry_dyn: Arc<dyn SubjectRegistry> = registry;
    let engine = GrantLifecycleEngine::new(
        store_dyn,
        registry_dyn,
        Arc::new(FailingSink),
        Arc::new(ManualClock::new(T0)),
        EngineConfig::default(),
    );

    let grant = engine.self_activate("nurse-1", request()).unwrap();
    assert_eq!(store.get(&grant.id).unwrap().unwrap().status, GrantStatus::Active);
}
