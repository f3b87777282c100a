//! breakglass-core - Break-Glass Emergency-Access Grant Engine
//!
//! This crate implements the grant engine that lets eligible clinical staff
//! obtain time-limited elevated access to records outside normal
//! authorization, under mandatory justification, audit, and post-use
//! review.
//!
//! # Architecture
//!
//! ```text
//! caller (HTTP/controller layer, out of scope)
//!    |
//!    v
//! GrantLifecycleEngine --- SubjectRegistry (eligibility)
//!    |        \----------- AccessLevelPolicy (actions, max duration)
//!    v
//! GrantStore (conditional writes) ---> AuditSink (append-only)
//!    ^                ^
//! ExpirySweeper   ReviewCoordinator / StatisticsAggregator
//! ```
//!
//! # Invariants
//!
//! - At most one `active`, unexpired grant per subject, enforced by the
//!   store's partial unique index
//! - Every status transition is a single compare-and-set write paired with
//!   exactly one audit event
//! - Record accesses are appended only while the grant is active and
//!   unexpired, re-validated per append
//! - Review is mandatory for every session that reached `active`
//!
//! # Modules
//!
//! - [`grant`]: the `AccessGrant` entity, state machine, and
//!   [`grant::GrantLifecycleEngine`]
//! - [`policy`]: access levels, permitted actions, duration bounds
//! - [`store`]: the [`store::GrantStore`] trait and `SQLite` backend
//! - [`audit`]: append-only audit trail
//! - [`sweeper`]: periodic expiry sweep
//! - [`review`]: post-use review queue
//! - [`stats`]: read-only rollups
//! - [`subject`]: staff roles and the eligibility registry seam
//! - [`clock`]: injectable time source
//! - [`config`]: TOML-loadable engine tunables

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod grant;
pub mod policy;
pub mod review;
pub mod stats;
pub mod store;
pub mod subject;
pub mod sweeper;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, SqliteAuditSink};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{GrantError, StoreError};
pub use grant::{
    AccessGrant, AccessRecordRequest, AdminGrantRequest, GrantLifecycleEngine, GrantRequest,
    GrantStatus, RequestType, ReviewOutcome, ReviewRequest,
};
pub use policy::{AccessAction, AccessLevel, AccessLevelPolicy};
pub use review::ReviewCoordinator;
pub use stats::{GrantStatistics, StatisticsAggregator};
pub use store::{GrantStore, SqliteGrantStore};
pub use subject::{StaffRole, StaticSubjectRegistry, SubjectRegistry};
pub use sweeper::{ExpirySweeper, SweepReport};
