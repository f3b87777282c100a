//! Post-use review coordination.
//!
//! Review is mandatory, not optional: every session that reached `active`
//! surfaces here once its window closes, ordered most recently expired
//! first. The write paths delegate to the engine so review transitions get
//! the same conditional-write and audit treatment as everything else.

use std::sync::Arc;

use crate::error::GrantError;
use crate::grant::{AccessGrant, GrantLifecycleEngine, ReviewRequest};
use crate::store::GrantStore;

/// Surfaces grants awaiting review and records review outcomes.
pub struct ReviewCoordinator {
    store: Arc<dyn GrantStore>,
    engine: Arc<GrantLifecycleEngine>,
}

impl ReviewCoordinator {
    /// Creates a coordinator over the given store and engine.
    #[must_use]
    pub fn new(store: Arc<dyn GrantStore>, engine: Arc<GrantLifecycleEngine>) -> Self {
        Self { store, engine }
    }

    /// Returns all completed or expired grants with no review recorded,
    /// ordered by expiry time descending.
    pub fn pending_reviews(&self) -> Result<Vec<AccessGrant>, GrantError> {
        self.store.pending_review().map_err(GrantError::from_store)
    }

    /// Returns the number of grants awaiting review.
    pub fn pending_count(&self) -> Result<usize, GrantError> {
        Ok(self.pending_reviews()?.len())
    }

    /// Records a review. See [`GrantLifecycleEngine::review`].
    pub fn review(
        &self,
        grant_id: &str,
        admin_id: &str,
        req: ReviewRequest,
    ) -> Result<AccessGrant, GrantError> {
        self.engine.review(grant_id, admin_id, req)
    }

    /// Flags a grant for investigation. See [`GrantLifecycleEngine::flag`].
    pub fn flag(
        &self,
        grant_id: &str,
        admin_id: &str,
        reason: &str,
    ) -> Result<AccessGrant, GrantError> {
        self.engine.flag(grant_id, admin_id, reason)
    }
}
