//! `SQLite`-backed grant store.
//!
//! Grants are persisted as JSON documents alongside indexed columns for the
//! lookups the engine performs. WAL mode allows concurrent reads while a
//! write is in progress; the partial unique index on active subjects makes
//! the one-active-grant invariant a storage guarantee rather than an
//! application convention.

// Page limits fit in i64; mutex poisoning indicates a panic in another
// thread, which is unrecoverable.
#![allow(clippy::cast_possible_wrap, clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags, Row, params};

use super::GrantStore;
use crate::error::StoreError;
use crate::grant::AccessGrant;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Column reference SQLite names when the partial unique index enforcing
/// one active grant per subject is violated; the failure message reads
/// "UNIQUE constraint failed: grants.subject".
const ACTIVE_SUBJECT_INDEX: &str = "grants.subject";

/// Grant store backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteGrantStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGrantStore {
    /// Opens or creates a grant store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory grant store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_doc(row: &Row<'_>) -> rusqlite::Result<String> {
        row.get::<_, String>(0)
    }

    fn decode(doc: &str) -> Result<AccessGrant, StoreError> {
        Ok(serde_json::from_str(doc)?)
    }

    fn query_docs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AccessGrant>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let docs = stmt
            .query_map(params, Self::row_to_doc)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        docs.iter().map(|doc| Self::decode(doc)).collect()
    }

    /// Maps a unique-constraint failure on the active-subject index to
    /// [`StoreError::DuplicateActiveSubject`]; other errors pass through.
    fn map_constraint(err: rusqlite::Error, subject: &str) -> StoreError {
        if let rusqlite::Error::SqliteFailure(ref ffi_err, Some(ref msg)) = err {
            if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains(ACTIVE_SUBJECT_INDEX)
            {
                return StoreError::DuplicateActiveSubject {
                    subject: subject.to_string(),
                };
            }
        }
        StoreError::Database(err)
    }
}

impl GrantStore for SqliteGrantStore {
    fn insert(&self, grant: &AccessGrant) -> Result<(), StoreError> {
        let doc = serde_json::to_string(grant)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO grants (id, subject, status, requested_at_ns, expires_at_ns, has_review, version, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                grant.id,
                grant.subject,
                grant.status.as_str(),
                grant.requested_at_ns,
                grant.expires_at_ns,
                i64::from(grant.review.is_some()),
                grant.version,
                doc,
            ],
        )
        .map_err(|e| Self::map_constraint(e, &grant.subject))?;
        Ok(())
    }

    fn get(&self, grant_id: &str) -> Result<Option<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT doc FROM grants WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![grant_id], Self::row_to_doc)?;
        match rows.next() {
            Some(doc) => Ok(Some(Self::decode(&doc?)?)),
            None => Ok(None),
        }
    }

    fn update(&self, grant: &AccessGrant) -> Result<u64, StoreError> {
        let expected_version = grant.version;
        let new_version = expected_version + 1;

        // The persisted document carries the post-write version so a fresh
        // read always sees a self-consistent record.
        let mut updated = grant.clone();
        updated.version = new_version;
        let doc = serde_json::to_string(&updated)?;

        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute(
                "UPDATE grants
                 SET status = ?1, expires_at_ns = ?2, has_review = ?3, version = ?4, doc = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    updated.status.as_str(),
                    updated.expires_at_ns,
                    i64::from(updated.review.is_some()),
                    new_version,
                    doc,
                    updated.id,
                    expected_version,
                ],
            )
            .map_err(|e| Self::map_constraint(e, &updated.subject))?;

        if affected == 1 {
            return Ok(new_version);
        }

        // Distinguish a lost race from a missing grant.
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM grants WHERE id = ?1",
                params![updated.id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        if exists {
            Err(StoreError::VersionConflict {
                grant_id: updated.id,
                expected_version,
            })
        } else {
            Err(StoreError::NotFound {
                grant_id: updated.id,
            })
        }
    }

    fn active_grant_for_subject(&self, subject: &str) -> Result<Option<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT doc FROM grants WHERE subject = ?1 AND status = 'active'")?;
        let mut rows = stmt.query_map(params![subject], Self::row_to_doc)?;
        match rows.next() {
            Some(doc) => Ok(Some(Self::decode(&doc?)?)),
            None => Ok(None),
        }
    }

    fn grants_for_subject(&self, subject: &str) -> Result<Vec<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_docs(
            &conn,
            "SELECT doc FROM grants WHERE subject = ?1 ORDER BY requested_at_ns DESC",
            params![subject],
        )
    }

    fn expired_active_page(
        &self,
        now_ns: u64,
        limit: usize,
    ) -> Result<Vec<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_docs(
            &conn,
            "SELECT doc FROM grants
             WHERE status = 'active' AND expires_at_ns <= ?1
             ORDER BY expires_at_ns ASC
             LIMIT ?2",
            params![now_ns, limit as i64],
        )
    }

    fn pending_review(&self) -> Result<Vec<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_docs(
            &conn,
            "SELECT doc FROM grants
             WHERE status IN ('completed', 'expired') AND has_review = 0
             ORDER BY expires_at_ns DESC",
            [],
        )
    }

    fn requested_in_range(
        &self,
        from_ns: u64,
        to_ns: u64,
    ) -> Result<Vec<AccessGrant>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_docs(
            &conn,
            "SELECT doc FROM grants
             WHERE requested_at_ns >= ?1 AND requested_at_ns <= ?2
             ORDER BY requested_at_ns ASC",
            params![from_ns, to_ns],
        )
    }
}
