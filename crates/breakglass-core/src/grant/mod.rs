//! Break-glass grant entity, state machine, and lifecycle engine.
//!
//! # Key Concepts
//!
//! - **Grant**: one instance of break-glass access with its own lifecycle,
//!   scope, and audit trail
//! - **One active grant per subject**: enforced by the store, never assumed
//! - **Mandatory review**: every session that reached `active` surfaces in
//!   the review queue once its window closes

mod engine;
mod state;

#[cfg(test)]
mod tests;

pub use engine::{
    AccessRecordRequest, AdminGrantRequest, GrantLifecycleEngine, GrantRequest, ReviewRequest,
};
pub use state::{
    AccessEntry, AccessGrant, GrantStatus, Investigation, RequestType, ReviewOutcome, ReviewRecord,
};
