//! Grant persistence.
//!
//! The engine talks to storage through the [`GrantStore`] trait. Every
//! mutation is a conditional write: inserts enforce the one-active-grant
//! invariant, updates are compare-and-set on `(id, version)`. The shipped
//! backend is [`SqliteGrantStore`]; any other backend must provide the same
//! conditional-write and indexed-lookup semantics.

mod sqlite;


pub use sqlite::SqliteGrantStore;

use crate::error::StoreError;
use crate::grant::AccessGrant;

/// Abstract persistence for grant records.
///
/// # Concurrency Contract
///
/// - `insert` fails with [`StoreError::DuplicateActiveSubject`] if the grant
///   is active and the subject already has an active grant.
/// - `update` succeeds only if the stored version equals `grant.version`;
///   on success the stored version (and the persisted document's `version`
///   field) becomes `grant.version + 1`. A lost race yields
///   [`StoreError::VersionConflict`].
/// - An `update` that moves a grant into the active status is subject to the
///   same uniqueness rule as `insert`.
pub trait GrantStore: Send + Sync {
    /// Persists a newly created grant.
    fn insert(&self, grant: &AccessGrant) -> Result<(), StoreError>;

    /// Looks up a grant by ID.
    fn get(&self, grant_id: &str) -> Result<Option<AccessGrant>, StoreError>;

    /// Conditionally replaces a grant, returning the new stored version.
    fn update(&self, grant: &AccessGrant) -> Result<u64, StoreError>;

    /// Returns the subject's active grant, if one exists.
    fn active_grant_for_subject(&self, subject: &str) -> Result<Option<AccessGrant>, StoreError>;

    /// Returns all grants for a subject, most recently requested first.
    fn grants_for_subject(&self, subject: &str) -> Result<Vec<AccessGrant>, StoreError>;

    /// Returns up to `limit` grants that are active but expired at `now_ns`,
    /// ordered by expiry time ascending. Sweeper read path.
    fn expired_active_page(&self, now_ns: u64, limit: usize)
        -> Result<Vec<AccessGrant>, StoreError>;

    /// Returns all completed or expired grants without a recorded review,
    /// ordered by expiry time descending. Review coordinator read path.
    fn pending_review(&self) -> Result<Vec<AccessGrant>, StoreError>;

    /// Returns all grants requested within `[from_ns, to_ns]`. Statistics
    /// read path.
    fn requested_in_range(&self, from_ns: u64, to_ns: u64)
        -> Result<Vec<AccessGrant>, StoreError>;
}
