//! Error types for the break-glass grant engine.
//!
//! Errors are split in two layers: [`StoreError`] covers persistence faults
//! (database errors, version conflicts, uniqueness violations) and
//! [`GrantError`] is the typed contract returned to callers of the engine.
//! The engine maps store-level conflicts onto the caller-facing kinds so the
//! controller layer never sees raw database errors for expected races.

use thiserror::Error;

use crate::grant::GrantStatus;
use crate::policy::AccessLevel;

/// Errors raised by the grant persistence layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to serialize or deserialize a grant document.
    #[error("grant document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conditional write failed because the stored version moved on.
    #[error("version conflict on grant {grant_id}: expected version {expected_version}")]
    VersionConflict {
        /// The grant whose conditional write failed.
        grant_id: String,
        /// The version the writer expected to find.
        expected_version: u64,
    },

    /// Insert or activation would create a second active grant for a subject.
    #[error("subject {subject} already has an active grant")]
    DuplicateActiveSubject {
        /// The subject that already holds an active grant.
        subject: String,
    },

    /// No grant with the given ID exists.
    #[error("grant not found: {grant_id}")]
    NotFound {
        /// The grant ID that was not found.
        grant_id: String,
    },
}

/// Errors returned by grant lifecycle operations.
///
/// Every kind is terminal for the call that produced it except
/// [`GrantError::ConcurrentModification`], for which a retry with a fresh
/// read is the sanctioned caller strategy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GrantError {
    /// A required field is missing or malformed.
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// The offending field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The subject's role is not in the break-glass allow-list.
    #[error("subject {subject} is not eligible for break-glass access")]
    IneligibleSubject {
        /// The ineligible subject.
        subject: String,
    },

    /// The subject already holds an active, unexpired grant.
    #[error("subject {subject} already has an active grant")]
    DuplicateActiveGrant {
        /// The subject with an existing active grant.
        subject: String,
    },

    /// The operation is not valid for the grant's current status.
    #[error("invalid transition for grant {grant_id}: cannot {attempted} from {current}")]
    InvalidTransition {
        /// The grant ID.
        grant_id: String,
        /// The grant's current status.
        current: GrantStatus,
        /// The operation that was attempted.
        attempted: &'static str,
    },

    /// No grant with the given ID exists.
    #[error("grant not found: {grant_id}")]
    NotFound {
        /// The grant ID that was not found.
        grant_id: String,
    },

    /// Another actor raced ahead; retry with a fresh read.
    #[error("concurrent modification of grant {grant_id}")]
    ConcurrentModification {
        /// The grant that was modified concurrently.
        grant_id: String,
    },

    /// `record_access` found no active, unexpired grant for the subject.
    #[error("no active grant for subject {subject}")]
    NoActiveGrant {
        /// The subject without an active grant.
        subject: String,
    },

    /// The requested level is only grantable through the admin path.
    #[error("access level {level} cannot be self-serviced")]
    LevelNotSelfServiceable {
        /// The admin-only level that was requested.
        level: AccessLevel,
    },

    /// Persistence fault unrelated to an expected race.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GrantError {
    /// Maps store-level conflict errors onto their caller-facing kinds.
    ///
    /// `VersionConflict` becomes [`GrantError::ConcurrentModification`],
    /// `DuplicateActiveSubject` becomes [`GrantError::DuplicateActiveGrant`],
    /// and `NotFound` keeps its meaning. Everything else is wrapped as
    /// [`GrantError::Store`].
    #[must_use]
    pub fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { grant_id, .. } => {
                Self::ConcurrentModification { grant_id }
            }
            StoreError::DuplicateActiveSubject { subject } => {
                Self::DuplicateActiveGrant { subject }
            }
            StoreError::NotFound { grant_id } => Self::NotFound { grant_id },
            other => Self::Store(other),
        }
    }
}
