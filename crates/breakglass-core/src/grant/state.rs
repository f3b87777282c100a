//! Grant entity and lifecycle state types.

use serde::{Deserialize, Serialize};

use crate::error::GrantError;
use crate::policy::AccessLevel;

/// The lifecycle status of an access grant.
///
/// # State Machine
///
/// ```text
/// [pending_approval] --approve--> active
/// [pending_approval] --reject---> revoked*
/// active --revoke--> revoked*
/// active --sweep--> completed
/// completed/expired --review(cleared/questionable)--> reviewed*
/// completed/expired --review(abuse)--> flagged*
/// completed/expired --flag--> flagged*
/// ```
///
/// `expired` behaves identically to `completed` for everything downstream;
/// the engine never produces it but accepts it wherever `completed` is
/// accepted, for stores that recorded it historically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum GrantStatus {
    /// Awaiting administrator approval.
    PendingApproval,
    /// Elevated access is in effect.
    Active,
    /// The active window ended; post-use review is mandatory.
    Completed,
    /// Alias terminal-pre-review state with identical downstream semantics
    /// to [`GrantStatus::Completed`].
    Expired,
    /// Revoked by an administrator, or a rejected request.
    Revoked,
    /// Review recorded; no further transitions.
    Reviewed,
    /// Flagged for investigation; no further transitions.
    Flagged,
}

impl GrantStatus {
    /// Returns the wire-stable string form of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Reviewed => "reviewed",
            Self::Flagged => "flagged",
        }
    }

    /// Parses a status from its wire string.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Validation`] if the string is not a known
    /// status.
    pub fn parse(s: &str) -> Result<Self, GrantError> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "reviewed" => Ok(Self::Reviewed),
            "flagged" => Ok(Self::Flagged),
            other => Err(GrantError::Validation {
                field: "status".to_string(),
                reason: format!("unrecognized status: {other}"),
            }),
        }
    }

    /// Returns true if no transition is permitted out of this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Reviewed | Self::Flagged)
    }

    /// Returns true if this status admits a post-use review or flag.
    #[must_use]
    pub const fn is_reviewable(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

impl std::fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a grant entered the system. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RequestType {
    /// Staff member requested access, pending admin approval.
    SelfRequest,
    /// Staff member activated access immediately.
    SelfActivation,
    /// Administrator granted access directly.
    AdminGrant,
}

impl RequestType {
    /// Returns the wire-stable string form of this request type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SelfRequest => "self_request",
            Self::SelfActivation => "self_activation",
            Self::AdminGrant => "admin_grant",
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The administrative judgment rendered after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReviewOutcome {
    /// Access was justified.
    Cleared,
    /// Access warrants follow-up but not investigation.
    Questionable,
    /// Access was abusive; the grant is flagged for investigation.
    Abuse,
}

impl ReviewOutcome {
    /// Returns the wire-stable string form of this outcome.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cleared => "cleared",
            Self::Questionable => "questionable",
            Self::Abuse => "abuse",
        }
    }
}

impl std::fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record access performed during an active grant window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    /// Opaque reference to the record that was accessed.
    pub record_ref: String,
    /// The action performed (view, update, ...).
    pub action: String,
    /// Free-text detail supplied by the caller.
    pub details: Option<String>,
    /// When the access was recorded, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

/// Post-use review record. Set exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Administrator who performed the review.
    pub reviewed_by: String,
    /// When the review was recorded.
    pub reviewed_at_ns: u64,
    /// The judgment rendered.
    pub outcome: ReviewOutcome,
    /// Reviewer notes.
    pub notes: Option<String>,
    /// Whether follow-up actions are required.
    pub follow_up_required: bool,
    /// Follow-up actions, if any.
    pub follow_up_actions: Vec<String>,
}

/// Investigation marker, set when a grant is flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investigation {
    /// Administrator who opened the investigation.
    pub investigator: String,
    /// When the investigation was opened.
    pub started_at_ns: u64,
}

/// One instance of break-glass access, with its full lifecycle and audit
/// trail. Persisted as a JSON document; lifecycle fields are set exactly
/// once and never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Opaque unique identifier, assigned at creation.
    pub id: String,
    /// Staff member the grant applies to.
    pub subject: String,
    /// How the grant entered the system.
    pub request_type: RequestType,
    /// Mandatory justification, minimum length enforced at creation.
    pub reason: String,
    /// Required category tag (e.g. "trauma").
    pub emergency_type: String,
    /// Optional caller-supplied scope restriction.
    pub access_scope: Option<String>,
    /// The access tier in effect.
    pub access_level: AccessLevel,
    /// Current lifecycle status.
    pub status: GrantStatus,
    /// When the grant was requested.
    pub requested_at_ns: u64,
    /// Administrator who approved a self-request.
    pub approved_by: Option<String>,
    /// When the approval happened.
    pub approved_at_ns: Option<u64>,
    /// When the grant entered `active`.
    pub activated_at_ns: Option<u64>,
    /// When the active window ends.
    pub expires_at_ns: u64,
    /// Administrator who revoked or rejected the grant.
    pub revoked_by: Option<String>,
    /// When the revocation happened.
    pub revoked_at_ns: Option<u64>,
    /// Mandatory justification for revocation or rejection.
    pub revocation_reason: Option<String>,
    /// Record accesses performed during the active window. Append-only.
    pub accessed_records: Vec<AccessEntry>,
    /// Post-use review, set exactly once.
    pub review: Option<ReviewRecord>,
    /// Investigation marker, set when flagged.
    pub investigation: Option<Investigation>,
    /// Optimistic-concurrency counter, bumped by the store on every
    /// successful conditional write.
    pub version: u64,
}

impl AccessGrant {
    /// Returns true if the grant is active and unexpired at `now_ns`.
    #[must_use]
    pub fn is_active_at(&self, now_ns: u64) -> bool {
        self.status == GrantStatus::Active && now_ns < self.expires_at_ns
    }
}
