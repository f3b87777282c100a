//! Expiry sweeper.
//!
//! Background task that transitions active grants whose window has elapsed
//! to `completed`, using the same conditional-write discipline as every
//! other transition. Running two sweepers concurrently is safe: the
//! compare-and-set on the grant version guarantees each grant is
//! transitioned (and audited) exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink, SWEEPER_ACTOR, actions};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::grant::GrantStatus;
use crate::store::GrantStore;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Grants examined by the pass.
    pub scanned: usize,
    /// Grants transitioned to `completed` by this pass.
    pub transitioned: usize,
}

/// Periodic task completing expired active grants.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn GrantStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    page_size: usize,
    interval: std::time::Duration,
    shutdown: Arc<AtomicBool>,
}

impl ExpirySweeper {
    /// Creates a sweeper over the given store and audit sink.
    #[must_use]
    pub fn new(
        store: Arc<dyn GrantStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        page_size: usize,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            page_size,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle for requesting shutdown of the run loop.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Performs one sweep pass, paging through expired active grants.
    ///
    /// Idempotent: a grant already moved on by a concurrent actor is
    /// skipped without a second audit event.
    ///
    /// # Errors
    ///
    /// Returns an error only for storage faults; lost races are absorbed.
    pub fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now_ns();
        let mut report = SweepReport::default();

        loop {
            let page = self.store.expired_active_page(now, self.page_size)?;
            if page.is_empty() {
                break;
            }
            report.scanned += page.len();

            let mut progressed = false;
            for mut grant in page {
                grant.status = GrantStatus::Completed;
                match self.store.update(&grant) {
                    Ok(_) => {
                        progressed = true;
                        report.transitioned += 1;
                        debug!(grant_id = %grant.id, subject = %grant.subject, "expired grant completed");
                        let event = AuditEvent {
                            actor: SWEEPER_ACTOR.to_string(),
                            action: actions::SWEPT.to_string(),
                            grant_id: grant.id.clone(),
                            subject: grant.subject.clone(),
                            description: "active window elapsed; grant completed".to_string(),
                            prior_status: Some(GrantStatus::Active),
                            new_status: Some(GrantStatus::Completed),
                            changes: json!({ "expires_at_ns": grant.expires_at_ns }),
                            timestamp_ns: now,
                        };
                        if let Err(err) = self.audit.record(&event) {
                            warn!(grant_id = %grant.id, error = %err, "audit sink failed; event dropped");
                        }
                    }
                    // Another actor moved the grant on first.
                    Err(StoreError::VersionConflict { .. } | StoreError::NotFound { .. }) => {}
                    Err(other) => return Err(other),
                }
            }

            // Every grant in the page was won by a concurrent actor; stop
            // rather than spin against a hot store.
            if !progressed {
                break;
            }
        }

        if report.transitioned > 0 {
            info!(
                transitioned = report.transitioned,
                scanned = report.scanned,
                "expiry sweep pass finished"
            );
        }
        Ok(report)
    }

    /// Runs the sweeper loop until shutdown is requested.
    ///
    /// Each pass runs on the blocking pool so the store's synchronous I/O
    /// never stalls the async runtime.
    pub async fn run(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            page_size = self.page_size,
            "expiry sweeper started"
        );
        while !self.shutdown.load(Ordering::Relaxed) {
            let sweeper = self.clone();
            match tokio::task::spawn_blocking(move || sweeper.sweep_once()).await {
                Ok(Ok(_report)) => {}
                Ok(Err(err)) => warn!(error = %err, "sweep pass failed"),
                Err(err) => warn!(error = %err, "sweep task panicked"),
            }
            tokio::time::sleep(self.interval).await;
        }
        info!("expiry sweeper stopped");
    }
}
