//! Read-only statistics over historical grants.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::GrantStore;

/// Rollups over grants requested within a date range.
///
/// Maps are keyed by the wire string form of the status, outcome, or
/// emergency type so the rollup serializes cleanly for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantStatistics {
    /// Total grants in the range.
    pub total: u64,
    /// Counts by current status.
    pub by_status: BTreeMap<String, u64>,
    /// Counts by review outcome. Unreviewed grants are excluded.
    pub by_outcome: BTreeMap<String, u64>,
    /// Counts by emergency type.
    pub by_emergency_type: BTreeMap<String, u64>,
    /// Mean number of record accesses per grant. Zero when the range is
    /// empty.
    pub mean_accessed_records: f64,
}

/// Pure read-side aggregator; performs no mutation.
pub struct StatisticsAggregator {
    store: Arc<dyn GrantStore>,
}

impl StatisticsAggregator {
    /// Creates an aggregator over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }

    /// Aggregates all grants requested within `[from_ns, to_ns]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate(&self, from_ns: u64, to_ns: u64) -> Result<GrantStatistics, StoreError> {
        let grants = self.store.requested_in_range(from_ns, to_ns)?;
        let mut stats = GrantStatistics {
            total: grants.len() as u64,
            ..GrantStatistics::default()
        };

        let mut total_accesses: u64 = 0;
        for grant in &grants {
            *stats
                .by_status
                .entry(grant.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_emergency_type
                .entry(grant.emergency_type.clone())
                .or_default() += 1;
            if let Some(review) = &grant.review {
                *stats
                    .by_outcome
                    .entry(review.outcome.as_str().to_string())
                    .or_default() += 1;
            }
            total_accesses += grant.accessed_records.len() as u64;
        }

        if !grants.is_empty() {
            stats.mean_accessed_records = total_accesses as f64 / grants.len() as f64;
        }
        Ok(stats)
    }
}
