//! Append-only audit trail.
//!
//! Every state-changing grant operation emits exactly one [`AuditEvent`]
//! recording the actor, the prior and new status, and a structured change
//! set. Sink failures never abort the originating grant mutation: blocking
//! emergency access on a logging outage would defeat the subsystem's
//! purpose, so the engine logs the failure and carries on.

// Mutex poisoning indicates a panic in another thread, which is
// unrecoverable.
#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grant::GrantStatus;

/// Audit table schema, kept separate from the grant store so the trail can
/// live in its own database file.
const AUDIT_SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS audit_events (
    seq_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    actor        TEXT    NOT NULL,
    action       TEXT    NOT NULL,
    grant_id     TEXT    NOT NULL,
    subject      TEXT    NOT NULL,
    description  TEXT    NOT NULL,
    prior_status TEXT,
    new_status   TEXT,
    changes      TEXT    NOT NULL,
    timestamp_ns INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_grant ON audit_events (grant_id);
";

/// Dotted action names used in [`AuditEvent::action`].
pub mod actions {
    /// A self-request was created in `pending_approval`.
    pub const REQUESTED: &str = "grant.requested";
    /// A grant was created and activated in one step by its subject.
    pub const SELF_ACTIVATED: &str = "grant.self_activated";
    /// An administrator granted access directly.
    pub const ADMIN_GRANTED: &str = "grant.admin_granted";
    /// A pending request was approved into `active`.
    pub const APPROVED: &str = "grant.approved";
    /// A pending request was rejected.
    pub const REJECTED: &str = "grant.rejected";
    /// An active grant was revoked.
    pub const REVOKED: &str = "grant.revoked";
    /// A record access was logged during an active window.
    pub const ACCESS_RECORDED: &str = "grant.access_recorded";
    /// A post-use review was recorded.
    pub const REVIEWED: &str = "grant.reviewed";
    /// A grant was flagged for investigation.
    pub const FLAGGED: &str = "grant.flagged";
    /// An expired active grant was swept to `completed`.
    pub const SWEPT: &str = "grant.swept";
}

/// Actor recorded for sweeper-driven transitions.
pub const SWEEPER_ACTOR: &str = "system:expiry-sweeper";

/// Errors raised by audit sinks.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditError {
    /// Database error from `SQLite`.
    #[error("audit database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to serialize the change set.
    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One audit record for a state-changing grant action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Who performed the action (subject, admin ID, or a system actor such
    /// as `system:expiry-sweeper`).
    pub actor: String,
    /// Dotted action name, e.g. `grant.approved`.
    pub action: String,
    /// The grant the action applies to.
    pub grant_id: String,
    /// The grant's subject.
    pub subject: String,
    /// Human-readable description of what happened.
    pub description: String,
    /// Status before the action, absent for creations.
    pub prior_status: Option<GrantStatus>,
    /// Status after the action, absent for non-transitioning actions.
    pub new_status: Option<GrantStatus>,
    /// Structured change set (actor-supplied reasons, notes, access refs).
    pub changes: serde_json::Value,
    /// When the action happened, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

/// Append-only write sink for audit events.
pub trait AuditSink: Send + Sync {
    /// Appends one event to the trail.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// `SQLite`-backed audit sink with read-back support for compliance tooling.
#[derive(Clone)]
pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditSink {
    /// Opens or creates an audit trail at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(AUDIT_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory audit sink for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(AUDIT_SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns all events recorded for a grant, in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decoding fails.
    pub fn events_for_grant(&self, grant_id: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT actor, action, grant_id, subject, description, prior_status, new_status, changes, timestamp_ns
             FROM audit_events WHERE grant_id = ?1 ORDER BY seq_id ASC",
        )?;
        let rows = stmt.query_map(params![grant_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, u64>(8)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (actor, action, grant_id, subject, description, prior, new, changes, timestamp_ns) =
                row?;
            events.push(AuditEvent {
                actor,
                action,
                grant_id,
                subject,
                description,
                prior_status: prior.as_deref().and_then(|s| GrantStatus::parse(s).ok()),
                new_status: new.as_deref().and_then(|s| GrantStatus::parse(s).ok()),
                changes: serde_json::from_str(&changes)?,
                timestamp_ns,
            });
        }
        Ok(events)
    }

    /// Returns the total number of recorded events.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn event_count(&self) -> Result<u64, AuditError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        Ok(count.unsigned_abs())
    }
}

impl AuditSink for SqliteAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let changes = serde_json::to_string(&event.changes)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_events
             (actor, action, grant_id, subject, description, prior_status, new_status, changes, timestamp_ns)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.actor,
                event.action,
                event.grant_id,
                event.subject,
                event.description,
                event.prior_status.map(|s| s.as_str()),
                event.new_status.map(|s| s.as_str()),
                changes,
                event.timestamp_ns,
            ],
        )?;
        Ok(())
    }
}

/// In-memory collecting sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns a snapshot of events recorded for one grant.
    #[must_use]
    pub fn events_for_grant(&self, grant_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.grant_id == grant_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
