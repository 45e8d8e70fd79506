//! SQLite persistence layer for gitlocalize.
//!
//! Provides a [`Database`] handle with WAL-mode journaling, automatic schema
//! migrations, and query helpers for the segment store, the resource catalog
//! and the sync ledger.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// Shared handle to the gitlocalize SQLite store.
///
/// One connection behind a `Mutex`; clone an `Arc<Database>` to share it
/// between the engine, the background worker and the CLI.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at `path` with WAL journaling, foreign
    /// keys and a busy timeout.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening segment store");

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        debug!("segment store ready");
        Ok(Self::wrap(conn))
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Bring the schema up to the latest version.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("schema is up to date");
        Ok(())
    }

    /// Lock the connection. A poisoned lock is recovered.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("segment store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one SQLite transaction: committed on `Ok`, rolled back on
    /// `Err`. Any error type that absorbs a [`DatabaseError`] works, so
    /// catalog and sync code can share one scope.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let result = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gitlocalize.db");
        {
            let db = Database::new(&path).unwrap();
            db.initialize().unwrap();
            db.ensure_languages("en", &["fr".to_string()]).unwrap();
        }
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        let languages = queries::list_target_languages(&db.conn()).unwrap();
        assert_eq!(languages.len(), 1);
        assert_eq!(languages[0].code, "fr");
    }

    #[test]
    fn test_transaction_commit() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| -> Result<(), DatabaseError> {
            queries::get_or_create_segment(conn, "Hello")?;
            Ok(())
        })
        .unwrap();

        let found = queries::find_segment_by_text(&db.conn(), "Hello").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_transaction_rollback() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            queries::get_or_create_segment(conn, "Goodbye")?;
            Err(DatabaseError::NotFound {
                entity: "resource".into(),
                id: "42".into(),
            })
        });
        assert!(result.is_err());
        assert!(queries::find_segment_by_text(&db.conn(), "Goodbye")
            .unwrap()
            .is_none());
    }
}
