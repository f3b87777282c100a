//! Grant lifecycle engine.
//!
//! The engine owns the break-glass state machine: it validates every
//! operation against the grant's current state, performs a single atomic
//! conditional write, and emits one audit event per transition. It holds no
//! mutable state of its own; "does this subject have active access" is
//! always answered from the store, never cached.
//!
//! # Concurrency
//!
//! Every transition is read-validate-write with a compare-and-set on the
//! grant version. A lost race surfaces as
//! [`GrantError::ConcurrentModification`], the only error kind for which a
//! retry with a fresh read is sanctioned. The one-active-grant-per-subject
//! invariant is enforced by the store's partial unique index, so two
//! simultaneous create-or-activate calls for one subject cannot both
//! succeed.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::state::{
    AccessEntry, AccessGrant, GrantStatus, Investigation, RequestType, ReviewOutcome, ReviewRecord,
};
use crate::audit::{AuditEvent, AuditSink, SWEEPER_ACTOR, actions};
use crate::clock::{Clock, NS_PER_HOUR};
use crate::config::EngineConfig;
use crate::error::{GrantError, StoreError};
use crate::policy::{AccessLevel, AccessLevelPolicy};
use crate::store::GrantStore;
use crate::subject::SubjectRegistry;

/// Internal retry bound for `record_access` appends. Concurrent appends to
/// the same grant are independent; a version conflict here just means
/// another append landed first.
const ACCESS_APPEND_RETRIES: u32 = 3;

/// Parameters for `request_grant` and `self_activate`.
#[derive(Debug, Clone, Default)]
pub struct GrantRequest {
    /// Mandatory justification.
    pub reason: String,
    /// Required category tag (e.g. "trauma").
    pub emergency_type: String,
    /// Requested tier; defaults to `view_only`.
    pub access_level: Option<AccessLevel>,
    /// Requested duration; clamped by policy.
    pub duration_hours: Option<u64>,
    /// Optional scope restriction.
    pub access_scope: Option<String>,
}

/// Parameters for `admin_grant`.
#[derive(Debug, Clone)]
pub struct AdminGrantRequest {
    /// The tier to grant; `emergency` is permitted on this path.
    pub access_level: AccessLevel,
    /// Mandatory justification.
    pub reason: String,
    /// Required category tag.
    pub emergency_type: String,
    /// Requested duration; clamped by policy.
    pub duration_hours: Option<u64>,
    /// Optional scope restriction.
    pub access_scope: Option<String>,
}

/// Parameters for `record_access`.
#[derive(Debug, Clone)]
pub struct AccessRecordRequest {
    /// Opaque reference to the accessed record.
    pub record_ref: String,
    /// The action performed.
    pub action: String,
    /// Free-text detail.
    pub details: Option<String>,
}

/// Parameters for `review`.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// The judgment rendered. Required.
    pub outcome: ReviewOutcome,
    /// Reviewer notes.
    pub notes: Option<String>,
    /// Whether follow-up is required. Forced true for `questionable`.
    pub follow_up_required: bool,
    /// Follow-up actions, if any.
    pub follow_up_actions: Vec<String>,
}

/// The break-glass grant lifecycle engine.
pub struct GrantLifecycleEngine {
    store: Arc<dyn GrantStore>,
    registry: Arc<dyn SubjectRegistry>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: AccessLevelPolicy,
    config: EngineConfig,
}

impl GrantLifecycleEngine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn GrantStore>,
        registry: Arc<dyn SubjectRegistry>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let policy = AccessLevelPolicy::new(config.default_duration_hours);
        Self {
            store,
            registry,
            audit,
            clock,
            policy,
            config,
        }
    }

    /// Returns the access level policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &AccessLevelPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------
    // Create paths
    // ------------------------------------------------------------------

    /// Creates a grant in `pending_approval` for later admin approval.
    ///
    /// # Errors
    ///
    /// Fails with `IneligibleSubject`, `DuplicateActiveGrant`,
    /// `Validation`, or `LevelNotSelfServiceable`.
    pub fn request_grant(
        &self,
        subject: &str,
        req: GrantRequest,
    ) -> Result<AccessGrant, GrantError> {
        let level = self.validate_self_service(subject, &req)?;
        let now = self.clock.now_ns();
        self.ensure_no_active_grant(subject, now)?;

        let grant = self.build_grant(
            subject,
            RequestType::SelfRequest,
            GrantStatus::PendingApproval,
            level,
            &req,
            now,
            None,
        );
        self.store.insert(&grant).map_err(GrantError::from_store)?;

        info!(grant_id = %grant.id, subject, level = %level, "break-glass access requested");
        self.emit(AuditEvent {
            actor: subject.to_string(),
            action: actions::REQUESTED.to_string(),
            grant_id: grant.id.clone(),
            subject: subject.to_string(),
            description: format!("break-glass access requested at level {level}"),
            prior_status: None,
            new_status: Some(GrantStatus::PendingApproval),
            changes: json!({
                "reason": grant.reason,
                "emergency_type": grant.emergency_type,
                "access_level": level.as_str(),
                "expires_at_ns": grant.expires_at_ns,
            }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    /// Creates and immediately activates a grant. Elevated access is
    /// effective as soon as this call returns: a concurrent
    /// [`Self::active_grant`] query will observe it.
    ///
    /// # Errors
    ///
    /// Same failure kinds as [`Self::request_grant`].
    pub fn self_activate(
        &self,
        subject: &str,
        req: GrantRequest,
    ) -> Result<AccessGrant, GrantError> {
        let level = self.validate_self_service(subject, &req)?;
        let now = self.clock.now_ns();
        self.ensure_no_active_grant(subject, now)?;

        let mut grant = self.build_grant(
            subject,
            RequestType::SelfActivation,
            GrantStatus::Active,
            level,
            &req,
            now,
            None,
        );
        grant.activated_at_ns = Some(now);
        self.store.insert(&grant).map_err(GrantError::from_store)?;

        info!(grant_id = %grant.id, subject, level = %level, "break-glass access self-activated");
        self.emit(AuditEvent {
            actor: subject.to_string(),
            action: actions::SELF_ACTIVATED.to_string(),
            grant_id: grant.id.clone(),
            subject: subject.to_string(),
            description: format!("break-glass access self-activated at level {level}"),
            prior_status: None,
            new_status: Some(GrantStatus::Active),
            changes: json!({
                "reason": grant.reason,
                "emergency_type": grant.emergency_type,
                "access_level": level.as_str(),
                "expires_at_ns": grant.expires_at_ns,
            }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    /// Creates a grant directly in `active` on an administrator's
    /// authority. The `emergency` level is permitted only on this path.
    ///
    /// # Errors
    ///
    /// Fails with `IneligibleSubject`, `DuplicateActiveGrant`, or
    /// `Validation`.
    pub fn admin_grant(
        &self,
        subject: &str,
        admin_id: &str,
        req: AdminGrantRequest,
    ) -> Result<AccessGrant, GrantError> {
        self.ensure_eligible(subject)?;
        self.validate_reason(&req.reason)?;
        validate_required("emergency_type", &req.emergency_type)?;
        validate_required("admin_id", admin_id)?;
        validate_duration(req.duration_hours)?;

        let now = self.clock.now_ns();
        self.ensure_no_active_grant(subject, now)?;

        let level = req.access_level;
        let request = GrantRequest {
            reason: req.reason,
            emergency_type: req.emergency_type,
            access_level: Some(level),
            duration_hours: req.duration_hours,
            access_scope: req.access_scope,
        };
        let mut grant = self.build_grant(
            subject,
            RequestType::AdminGrant,
            GrantStatus::Active,
            level,
            &request,
            now,
            Some(admin_id),
        );
        grant.activated_at_ns = Some(now);
        self.store.insert(&grant).map_err(GrantError::from_store)?;

        info!(grant_id = %grant.id, subject, admin_id, level = %level, "break-glass access granted by admin");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::ADMIN_GRANTED.to_string(),
            grant_id: grant.id.clone(),
            subject: subject.to_string(),
            description: format!("break-glass access granted to {subject} at level {level}"),
            prior_status: None,
            new_status: Some(GrantStatus::Active),
            changes: json!({
                "reason": grant.reason,
                "emergency_type": grant.emergency_type,
                "access_level": level.as_str(),
                "expires_at_ns": grant.expires_at_ns,
            }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    // ------------------------------------------------------------------
    // Approval and termination
    // ------------------------------------------------------------------

    /// Approves a pending request into `active`.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `InvalidTransition` if the grant is not
    /// pending, `Validation` if the request window has already elapsed, or
    /// `ConcurrentModification` on a lost race.
    pub fn approve(
        &self,
        grant_id: &str,
        admin_id: &str,
        notes: Option<&str>,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("admin_id", admin_id)?;
        let mut grant = self.get(grant_id)?;
        require_status(&grant, GrantStatus::PendingApproval, "approve")?;

        let now = self.clock.now_ns();
        if now >= grant.expires_at_ns {
            return Err(GrantError::Validation {
                field: "expires_at".to_string(),
                reason: "grant request window has already elapsed".to_string(),
            });
        }
        // Clear any expired-but-unswept active grant so the activation does
        // not trip the uniqueness index.
        self.sweep_subject(&grant.subject, now)?;

        grant.status = GrantStatus::Active;
        grant.approved_by = Some(admin_id.to_string());
        grant.approved_at_ns = Some(now);
        grant.activated_at_ns = Some(now);
        grant.version = self.store.update(&grant).map_err(GrantError::from_store)?;

        info!(grant_id, admin_id, subject = %grant.subject, "break-glass request approved");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::APPROVED.to_string(),
            grant_id: grant_id.to_string(),
            subject: grant.subject.clone(),
            description: "break-glass request approved".to_string(),
            prior_status: Some(GrantStatus::PendingApproval),
            new_status: Some(GrantStatus::Active),
            changes: json!({ "notes": notes }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    /// Rejects a pending request, closing it as `revoked`.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `InvalidTransition` if the grant is not
    /// pending, or `Validation` if `reason` is empty.
    pub fn reject(
        &self,
        grant_id: &str,
        admin_id: &str,
        reason: &str,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("admin_id", admin_id)?;
        validate_required("reason", reason)?;
        let mut grant = self.get(grant_id)?;
        require_status(&grant, GrantStatus::PendingApproval, "reject")?;

        let now = self.clock.now_ns();
        grant.status = GrantStatus::Revoked;
        grant.revoked_by = Some(admin_id.to_string());
        grant.revoked_at_ns = Some(now);
        grant.revocation_reason = Some(reason.to_string());
        grant.version = self.store.update(&grant).map_err(GrantError::from_store)?;

        info!(grant_id, admin_id, subject = %grant.subject, "break-glass request rejected");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::REJECTED.to_string(),
            grant_id: grant_id.to_string(),
            subject: grant.subject.clone(),
            description: "break-glass request rejected".to_string(),
            prior_status: Some(GrantStatus::PendingApproval),
            new_status: Some(GrantStatus::Revoked),
            changes: json!({ "reason": reason }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    /// Revokes an active grant, effective immediately: subsequent
    /// [`Self::record_access`] calls fail.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `InvalidTransition` if the grant is not
    /// active, `Validation` if `reason` is empty, or
    /// `ConcurrentModification` on a lost race.
    pub fn revoke(
        &self,
        grant_id: &str,
        admin_id: &str,
        reason: &str,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("admin_id", admin_id)?;
        validate_required("reason", reason)?;
        let mut grant = self.get(grant_id)?;
        require_status(&grant, GrantStatus::Active, "revoke")?;

        let now = self.clock.now_ns();
        grant.status = GrantStatus::Revoked;
        grant.revoked_by = Some(admin_id.to_string());
        grant.revoked_at_ns = Some(now);
        grant.revocation_reason = Some(reason.to_string());
        grant.version = self.store.update(&grant).map_err(GrantError::from_store)?;

        info!(grant_id, admin_id, subject = %grant.subject, "break-glass grant revoked");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::REVOKED.to_string(),
            grant_id: grant_id.to_string(),
            subject: grant.subject.clone(),
            description: "break-glass grant revoked".to_string(),
            prior_status: Some(GrantStatus::Active),
            new_status: Some(GrantStatus::Revoked),
            changes: json!({ "reason": reason }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    // ------------------------------------------------------------------
    // Access recording
    // ------------------------------------------------------------------

    /// Appends one record access to the subject's active grant. This is the
    /// only path by which clinical access during an emergency gets logged.
    ///
    /// Appends to the same grant may arrive concurrently; each append
    /// re-validates that the grant is still active and unexpired at the
    /// moment it lands. A bounded internal retry absorbs version conflicts
    /// between independent appends.
    ///
    /// # Errors
    ///
    /// Fails with `NoActiveGrant` if the subject has no active, unexpired
    /// grant, `Validation` on missing fields, or `ConcurrentModification`
    /// if the retry bound is exhausted.
    pub fn record_access(
        &self,
        subject: &str,
        req: AccessRecordRequest,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("record_ref", &req.record_ref)?;
        validate_required("action", &req.action)?;

        let mut last_conflict: Option<String> = None;
        for _ in 0..ACCESS_APPEND_RETRIES {
            let now = self.clock.now_ns();
            let Some(mut grant) = self
                .store
                .active_grant_for_subject(subject)
                .map_err(GrantError::from_store)?
            else {
                return Err(GrantError::NoActiveGrant {
                    subject: subject.to_string(),
                });
            };
            if !grant.is_active_at(now) {
                return Err(GrantError::NoActiveGrant {
                    subject: subject.to_string(),
                });
            }

            grant.accessed_records.push(AccessEntry {
                record_ref: req.record_ref.clone(),
                action: req.action.clone(),
                details: req.details.clone(),
                timestamp_ns: now,
            });
            match self.store.update(&grant) {
                Ok(version) => {
                    grant.version = version;
                    debug!(grant_id = %grant.id, subject, record_ref = %req.record_ref, "record access logged");
                    self.emit(AuditEvent {
                        actor: subject.to_string(),
                        action: actions::ACCESS_RECORDED.to_string(),
                        grant_id: grant.id.clone(),
                        subject: subject.to_string(),
                        description: format!(
                            "record {} accessed ({})",
                            req.record_ref, req.action
                        ),
                        prior_status: Some(GrantStatus::Active),
                        new_status: Some(GrantStatus::Active),
                        changes: json!({
                            "record_ref": req.record_ref,
                            "action": req.action,
                            "details": req.details,
                        }),
                        timestamp_ns: now,
                    });
                    return Ok(grant);
                }
                Err(StoreError::VersionConflict { grant_id, .. }) => {
                    last_conflict = Some(grant_id);
                }
                Err(other) => return Err(GrantError::from_store(other)),
            }
        }
        Err(GrantError::ConcurrentModification {
            grant_id: last_conflict.unwrap_or_default(),
        })
    }

    // ------------------------------------------------------------------
    // Post-use review
    // ------------------------------------------------------------------

    /// Records the mandatory post-use review. `cleared` and `questionable`
    /// close the grant as `reviewed`; `abuse` flags it and opens an
    /// investigation.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `InvalidTransition` unless the grant is
    /// `completed` or `expired`, or `ConcurrentModification` on a lost
    /// race.
    pub fn review(
        &self,
        grant_id: &str,
        admin_id: &str,
        req: ReviewRequest,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("admin_id", admin_id)?;
        let mut grant = self.get(grant_id)?;
        if !grant.status.is_reviewable() {
            return Err(GrantError::InvalidTransition {
                grant_id: grant_id.to_string(),
                current: grant.status,
                attempted: "review",
            });
        }

        let now = self.clock.now_ns();
        let outcome = req.outcome;
        grant.review = Some(ReviewRecord {
            reviewed_by: admin_id.to_string(),
            reviewed_at_ns: now,
            outcome,
            notes: req.notes.clone(),
            follow_up_required: req.follow_up_required || outcome == ReviewOutcome::Questionable,
            follow_up_actions: req.follow_up_actions.clone(),
        });
        let prior = grant.status;
        grant.status = if outcome == ReviewOutcome::Abuse {
            grant.investigation = Some(Investigation {
                investigator: admin_id.to_string(),
                started_at_ns: now,
            });
            GrantStatus::Flagged
        } else {
            GrantStatus::Reviewed
        };
        grant.version = self.store.update(&grant).map_err(GrantError::from_store)?;

        info!(grant_id, admin_id, outcome = %outcome, "break-glass session reviewed");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::REVIEWED.to_string(),
            grant_id: grant_id.to_string(),
            subject: grant.subject.clone(),
            description: format!("post-use review recorded with outcome {outcome}"),
            prior_status: Some(prior),
            new_status: Some(grant.status),
            changes: json!({
                "outcome": outcome.as_str(),
                "notes": req.notes,
                "follow_up_required": req.follow_up_required,
                "follow_up_actions": req.follow_up_actions,
            }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    /// Flags a completed or expired grant for investigation without a full
    /// review.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound`, `InvalidTransition` unless the grant is
    /// `completed` or `expired`, `Validation` if `reason` is empty, or
    /// `ConcurrentModification` on a lost race.
    pub fn flag(
        &self,
        grant_id: &str,
        admin_id: &str,
        reason: &str,
    ) -> Result<AccessGrant, GrantError> {
        validate_required("admin_id", admin_id)?;
        validate_required("reason", reason)?;
        let mut grant = self.get(grant_id)?;
        if !grant.status.is_reviewable() {
            return Err(GrantError::InvalidTransition {
                grant_id: grant_id.to_string(),
                current: grant.status,
                attempted: "flag",
            });
        }

        let now = self.clock.now_ns();
        let prior = grant.status;
        grant.status = GrantStatus::Flagged;
        grant.investigation = Some(Investigation {
            investigator: admin_id.to_string(),
            started_at_ns: now,
        });
        grant.version = self.store.update(&grant).map_err(GrantError::from_store)?;

        info!(grant_id, admin_id, "break-glass session flagged for investigation");
        self.emit(AuditEvent {
            actor: admin_id.to_string(),
            action: actions::FLAGGED.to_string(),
            grant_id: grant_id.to_string(),
            subject: grant.subject.clone(),
            description: "session flagged for investigation".to_string(),
            prior_status: Some(prior),
            new_status: Some(GrantStatus::Flagged),
            changes: json!({ "reason": reason }),
            timestamp_ns: now,
        });
        Ok(grant)
    }

    // ------------------------------------------------------------------
    // Read paths
    // ------------------------------------------------------------------

    /// Looks up a grant by ID.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` if no such grant exists.
    pub fn get(&self, grant_id: &str) -> Result<AccessGrant, GrantError> {
        self.store
            .get(grant_id)
            .map_err(GrantError::from_store)?
            .ok_or_else(|| GrantError::NotFound {
                grant_id: grant_id.to_string(),
            })
    }

    /// Returns all grants for a subject, most recent first.
    pub fn grants_for_subject(&self, subject: &str) -> Result<Vec<AccessGrant>, GrantError> {
        self.store
            .grants_for_subject(subject)
            .map_err(GrantError::from_store)
    }

    /// Returns the subject's active, unexpired grant, if any. This query is
    /// the single source of truth for "does this subject have elevated
    /// access right now"; nothing is cached on the subject record.
    pub fn active_grant(&self, subject: &str) -> Result<Option<AccessGrant>, GrantError> {
        let now = self.clock.now_ns();
        let grant = self
            .store
            .active_grant_for_subject(subject)
            .map_err(GrantError::from_store)?;
        Ok(grant.filter(|g| g.is_active_at(now)))
    }

    /// Returns true if the subject currently holds elevated access.
    pub fn has_active_grant(&self, subject: &str) -> Result<bool, GrantError> {
        Ok(self.active_grant(subject)?.is_some())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_self_service(
        &self,
        subject: &str,
        req: &GrantRequest,
    ) -> Result<AccessLevel, GrantError> {
        self.ensure_eligible(subject)?;
        self.validate_reason(&req.reason)?;
        validate_required("emergency_type", &req.emergency_type)?;
        validate_duration(req.duration_hours)?;
        let level = req.access_level.unwrap_or(AccessLevel::ViewOnly);
        if level.is_admin_only() {
            return Err(GrantError::LevelNotSelfServiceable { level });
        }
        Ok(level)
    }

    fn ensure_eligible(&self, subject: &str) -> Result<(), GrantError> {
        if self.registry.is_eligible(subject) {
            Ok(())
        } else {
            Err(GrantError::IneligibleSubject {
                subject: subject.to_string(),
            })
        }
    }

    fn validate_reason(&self, reason: &str) -> Result<(), GrantError> {
        let len = reason.trim().chars().count();
        if len < self.config.min_reason_chars {
            return Err(GrantError::Validation {
                field: "reason".to_string(),
                reason: format!(
                    "justification must be at least {} characters, got {len}",
                    self.config.min_reason_chars
                ),
            });
        }
        Ok(())
    }

    /// Blocks creation when the subject already holds an active, unexpired
    /// grant. An active-but-expired grant is swept to `completed` on the
    /// spot so it neither blocks the caller nor trips the uniqueness index.
    /// Pending requests do not block.
    fn ensure_no_active_grant(&self, subject: &str, now: u64) -> Result<(), GrantError> {
        let Some(existing) = self
            .store
            .active_grant_for_subject(subject)
            .map_err(GrantError::from_store)?
        else {
            return Ok(());
        };
        if existing.is_active_at(now) {
            return Err(GrantError::DuplicateActiveGrant {
                subject: subject.to_string(),
            });
        }
        self.complete_expired(existing, now)?;
        Ok(())
    }

    /// On-demand sweep of the subject's expired active grant, if present.
    fn sweep_subject(&self, subject: &str, now: u64) -> Result<(), GrantError> {
        if let Some(existing) = self
            .store
            .active_grant_for_subject(subject)
            .map_err(GrantError::from_store)?
        {
            if !existing.is_active_at(now) {
                self.complete_expired(existing, now)?;
            }
        }
        Ok(())
    }

    /// Transitions one expired active grant to `completed`, with the same
    /// conditional-write discipline as the background sweeper. A lost race
    /// means someone else already moved the grant on, which is fine.
    fn complete_expired(&self, mut grant: AccessGrant, now: u64) -> Result<(), GrantError> {
        grant.status = GrantStatus::Completed;
        match self.store.update(&grant) {
            Ok(_) => {
                info!(grant_id = %grant.id, subject = %grant.subject, "expired grant swept to completed");
                self.emit(AuditEvent {
                    actor: SWEEPER_ACTOR.to_string(),
                    action: actions::SWEPT.to_string(),
                    grant_id: grant.id.clone(),
                    subject: grant.subject.clone(),
                    description: "active window elapsed; grant completed".to_string(),
                    prior_status: Some(GrantStatus::Active),
                    new_status: Some(GrantStatus::Completed),
                    changes: json!({ "expires_at_ns": grant.expires_at_ns }),
                    timestamp_ns: now,
                });
                Ok(())
            }
            Err(StoreError::VersionConflict { .. } | StoreError::NotFound { .. }) => Ok(()),
            Err(other) => Err(GrantError::from_store(other)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_grant(
        &self,
        subject: &str,
        request_type: RequestType,
        status: GrantStatus,
        level: AccessLevel,
        req: &GrantRequest,
        now: u64,
        approved_by: Option<&str>,
    ) -> AccessGrant {
        let hours = self.policy.effective_duration_hours(level, req.duration_hours);
        AccessGrant {
            id: Uuid::new_v4().to_string(),
            subject: subject.to_string(),
            request_type,
            reason: req.reason.trim().to_string(),
            emergency_type: req.emergency_type.trim().to_string(),
            access_scope: req.access_scope.clone(),
            access_level: level,
            status,
            requested_at_ns: now,
            approved_by: approved_by.map(ToString::to_string),
            approved_at_ns: approved_by.map(|_| now),
            activated_at_ns: None,
            expires_at_ns: now + hours * NS_PER_HOUR,
            revoked_by: None,
            revoked_at_ns: None,
            revocation_reason: None,
            accessed_records: Vec::new(),
            review: None,
            investigation: None,
            version: 1,
        }
    }

    /// Appends one audit event. A sink failure is logged and swallowed:
    /// losing an audit record is degraded-but-recoverable, while blocking
    /// an emergency mutation on a logging outage is not acceptable.
    fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event) {
            warn!(
                grant_id = %event.grant_id,
                action = %event.action,
                error = %err,
                "audit sink failed; event dropped"
            );
        }
    }
}

/// Rejects an explicit zero-hour duration. A grant must always carry a
/// window in which it can be used, so `expires_at` stays strictly after
/// activation.
fn validate_duration(requested: Option<u64>) -> Result<(), GrantError> {
    if requested == Some(0) {
        return Err(GrantError::Validation {
            field: "duration_hours".to_string(),
            reason: "duration must be at least one hour".to_string(),
        });
    }
    Ok(())
}

/// Rejects empty or whitespace-only required string fields.
fn validate_required(field: &str, value: &str) -> Result<(), GrantError> {
    if value.trim().is_empty() {
        return Err(GrantError::Validation {
            field: field.to_string(),
            reason: "required field is empty".to_string(),
        });
    }
    Ok(())
}

/// Requires the grant to be in `expected`, naming the attempted operation
/// in the failure.
fn require_status(
    grant: &AccessGrant,
    expected: GrantStatus,
    attempted: &'static str,
) -> Result<(), GrantError> {
    if grant.status == expected {
        Ok(())
    } else {
        Err(GrantError::InvalidTransition {
            grant_id: grant.id.clone(),
            current: grant.status,
            attempted,
        })
    }
}
