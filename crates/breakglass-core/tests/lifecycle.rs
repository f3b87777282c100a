//! End-to-end lifecycle scenarios across the engine, sweeper, review
//! coordinator, and statistics aggregator.

use std::sync::Arc;
use std::time::Duration;

use breakglass_core::clock::NS_PER_HOUR;
use breakglass_core::{
    AccessLevel, AccessRecordRequest, AuditSink, Clock, EngineConfig, ExpirySweeper,
    GrantLifecycleEngine, GrantRequest, GrantStatus, GrantStore, ManualClock, MemoryAuditSink,
    ReviewCoordinator, ReviewOutcome, ReviewRequest, SqliteGrantStore, StaffRole,
    StaticSubjectRegistry, StatisticsAggregator, SubjectRegistry,
};

const T0: u64 = 1_700_000_000_000_000_000;
const REASON: &str = "Unresponsive patient in ER bay 3, need full chart now";

struct World {
    engine: Arc<GrantLifecycleEngine>,
    store: Arc<SqliteGrantStore>,
    audit: Arc<MemoryAuditSink>,
    clock: Arc<ManualClock>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn world() -> World {
    init_tracing();
    let store = Arc::new(SqliteGrantStore::in_memory().unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let clock = Arc::new(ManualClock::new(T0));
    let registry = Arc::new(StaticSubjectRegistry::new());
    registry.insert("dr-grey", StaffRole::Physician);
    registry.insert("nurse-ratched", StaffRole::Nurse);
    registry.insert("pharm-1", StaffRole::Pharmacist);

    let store_dyn: Arc<dyn GrantStore> = store.clone();
    let registry_dyn: Arc<dyn SubjectRegistry> = registry;
    let audit_dyn: Arc<dyn AuditSink> = audit.clone();
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let engine = Arc::new(GrantLifecycleEngine::new(
        store_dyn,
        registry_dyn,
        audit_dyn,
        clock_dyn,
        EngineConfig::default(),
    ));
    World {
        engine,
        store,
        audit,
        clock,
    }
}

fn sweeper(w: &World, interval: Duration) -> ExpirySweeper {
    let store: Arc<dyn GrantStore> = w.store.clone();
    let audit: Arc<dyn AuditSink> = w.audit.clone();
    let clock: Arc<dyn Clock> = w.clock.clone();
    ExpirySweeper::new(store, audit, clock, 10, interval)
}

fn request(level: AccessLevel) -> GrantRequest {
    GrantRequest {
        reason: REASON.to_string(),
        emergency_type: "trauma".to_string(),
        access_level: Some(level),
        duration_hours: None,
        access_scope: None,
    }
}

#[test]
fn session_runs_from_activation_through_review() {
    let w = world();
    let coordinator = ReviewCoordinator::new(w.store.clone(), w.engine.clone());

    let grant = w
        .engine
        .self_activate("dr-grey", request(AccessLevel::FullClinical))
        .unwrap();
    for record in ["patient-881", "patient-882"] {
        w.engine
            .record_access(
                "dr-grey",
                AccessRecordRequest {
                    record_ref: record.to_string(),
                    action: "view".to_string(),
                    details: None,
                },
            )
            .unwrap();
    }

    // Session window elapses; the sweep completes the grant.
    w.clock.set(grant.expires_at_ns + 60 * 1_000_000_000);
    let report = sweeper(&w, Duration::from_secs(60)).sweep_once().unwrap();
    assert_eq!(report.transitioned, 1);

    // Review is mandatory: the session surfaces in the queue.
    let pending = coordinator.pending_reviews().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, grant.id);
    assert_eq!(pending[0].accessed_records.len(), 2);

    coordinator
        .review(
            &grant.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Cleared,
                notes: Some("justified ER access".to_string()),
                follow_up_required: false,
                follow_up_actions: Vec::new(),
            },
        )
        .unwrap();
    assert_eq!(coordinator.pending_count().unwrap(), 0);
    assert_eq!(
        w.engine.get(&grant.id).unwrap().status,
        GrantStatus::Reviewed
    );
}

#[test]
fn sweep_is_idempotent_and_audits_once() {
    let w = world();
    let grant = w
        .engine
        .self_activate("nurse-ratched", request(AccessLevel::ViewOnly))
        .unwrap();
    w.clock.set(grant.expires_at_ns + 1);

    let s = sweeper(&w, Duration::from_secs(60));
    let first = s.sweep_once().unwrap();
    assert_eq!(first.transitioned, 1);

    // Second run in immediate succession is a no-op for the same grant.
    let second = s.sweep_once().unwrap();
    assert_eq!(second.transitioned, 0);
    assert_eq!(second.scanned, 0);

    let swept_events = w
        .audit
        .events_for_grant(&grant.id)
        .into_iter()
        .filter(|e| e.action == "grant.swept")
        .count();
    assert_eq!(swept_events, 1);
    assert_eq!(
        w.engine.get(&grant.id).unwrap().status,
        GrantStatus::Completed
    );
}

#[test]
fn one_active_grant_per_subject_holds_across_entry_points() {
    let w = world();
    let active = w
        .engine
        .self_activate("pharm-1", request(AccessLevel::ViewOnly))
        .unwrap();

    assert!(w
        .engine
        .self_activate("pharm-1", request(AccessLevel::ViewOnly))
        .is_err());
    assert!(w
        .engine
        .request_grant("pharm-1", request(AccessLevel::ViewOnly))
        .is_err());

    // After revocation the subject may start a fresh session.
    w.engine
        .revoke(&active.id, "admin-1", "shift ended early today")
        .unwrap();
    w.engine
        .self_activate("pharm-1", request(AccessLevel::ViewOnly))
        .unwrap();
}

#[test]
fn statistics_roll_up_by_status_outcome_and_type() {
    let w = world();

    // Session 1: reviewed as cleared, two accesses.
    let first = w
        .engine
        .self_activate("dr-grey", request(AccessLevel::FullClinical))
        .unwrap();
    for record in ["p-1", "p-2"] {
        w.engine
            .record_access(
                "dr-grey",
                AccessRecordRequest {
                    record_ref: record.to_string(),
                    action: "view".to_string(),
                    details: None,
                },
            )
            .unwrap();
    }

    // Session 2: different emergency type, later flagged as abuse.
    let second = w
        .engine
        .self_activate(
            "nurse-ratched",
            GrantRequest {
                emergency_type: "cardiac".to_string(),
                ..request(AccessLevel::ViewOnly)
            },
        )
        .unwrap();

    w.clock
        .set(first.expires_at_ns.max(second.expires_at_ns) + 1);
    sweeper(&w, Duration::from_secs(60)).sweep_once().unwrap();

    w.engine
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
    w.engine
        .review(
            &second.id,
            "admin-1",
            ReviewRequest {
                outcome: ReviewOutcome::Abuse,
                notes: Some("unrelated patient".to_string()),
                follow_up_required: true,
                follow_up_actions: vec!["suspend access".to_string()],
            },
        )
        .unwrap();

    // A pending request outside the window must not appear in the range.
    w.engine
        .request_grant("pharm-1", request(AccessLevel::ViewOnly))
        .unwrap();

    let stats = StatisticsAggregator::new(w.store.clone())
        .aggregate(T0, T0 + NS_PER_HOUR)
        .unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("reviewed"), Some(&1));
    assert_eq!(stats.by_status.get("flagged"), Some(&1));
    assert_eq!(stats.by_outcome.get("cleared"), Some(&1));
    assert_eq!(stats.by_outcome.get("abuse"), Some(&1));
    assert_eq!(stats.by_emergency_type.get("trauma"), Some(&1));
    assert_eq!(stats.by_emergency_type.get("cardiac"), Some(&1));
    assert!((stats.mean_accessed_records - 1.0).abs() < f64::EPSILON);
}

#[test]
fn unreviewed_grants_are_excluded_from_outcome_counts() {
    let w = world();
    let grant = w
        .engine
        .self_activate("dr-grey", request(AccessLevel::ViewOnly))
        .unwrap();
    w.clock.set(grant.expires_at_ns + 1);
    sweeper(&w, Duration::from_secs(60)).sweep_once().unwrap();

    let stats = StatisticsAggregator::new(w.store.clone())
        .aggregate(T0, T0 + NS_PER_HOUR)
        .unwrap();
    assert_eq!(stats.total, 1);
    assert!(stats.by_outcome.is_empty());
    assert_eq!(stats.by_status.get("completed"), Some(&1));
}

#[tokio::test(flavor = "multi_thread")]
async fn sweeper_run_loop_completes_expired_grants() {
    let w = world();
    let grant = w
        .engine
        .self_activate("dr-grey", request(AccessLevel::ViewOnly))
        .unwrap();
    w.clock.set(grant.expires_at_ns + 1);

    let s = sweeper(&w, Duration::from_millis(10));
    let shutdown = s.shutdown_handle();
    let task = tokio::spawn(async move { s.run().await });

    // Give the loop a few ticks to observe the expired grant.
    for _ in 0..50 {
        if w.engine.get(&grant.id).unwrap().status == GrantStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        w.engine.get(&grant.id).unwrap().status,
        GrantStatus::Completed
    );

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    task.await.unwrap();
}
