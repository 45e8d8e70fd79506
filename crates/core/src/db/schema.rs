//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "catalog and segment store",
        r#"
        CREATE TABLE IF NOT EXISTS languages (
            code        TEXT PRIMARY KEY,
            is_active   INTEGER NOT NULL DEFAULT 1,
            is_default  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS resources (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            object_id           TEXT    NOT NULL UNIQUE,
            path                TEXT    NOT NULL UNIQUE,
            current_revision_id INTEGER,
            parent_id           INTEGER REFERENCES resources (id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources (parent_id);

        CREATE TABLE IF NOT EXISTS segments (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            text    TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS translations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            segment_id  INTEGER NOT NULL REFERENCES segments (id) ON DELETE CASCADE,
            language    TEXT    NOT NULL REFERENCES languages (code),
            text        TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            UNIQUE (segment_id, language)
        );

        CREATE TABLE IF NOT EXISTS translated_pages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id     INTEGER NOT NULL REFERENCES resources (id) ON DELETE CASCADE,
            language        TEXT    NOT NULL REFERENCES languages (code),
            submission_id   INTEGER NOT NULL,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            UNIQUE (resource_id, language)
        );
        "#,
    ),
    (
        2,
        "submissions and sync log",
        r#"
        CREATE TABLE IF NOT EXISTS sync_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL CHECK (action IN ('pull', 'push')),
            commit_id   TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_log_created_at ON sync_log (created_at);

        CREATE TABLE IF NOT EXISTS sync_log_resources (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            log_id      INTEGER NOT NULL REFERENCES sync_log (id) ON DELETE CASCADE,
            resource_id INTEGER NOT NULL REFERENCES resources (id) ON DELETE CASCADE,
            language    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_log_resources_log ON sync_log_resources (log_id);

        CREATE TABLE IF NOT EXISTS resource_submissions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id INTEGER NOT NULL REFERENCES resources (id) ON DELETE CASCADE,
            revision_id INTEGER NOT NULL,
            created_at  TEXT    NOT NULL,
            pushed_at   TEXT,
            push_log_id INTEGER REFERENCES sync_log (id) ON DELETE SET NULL,
            UNIQUE (resource_id, revision_id)
        );

        CREATE INDEX IF NOT EXISTS idx_submissions_push_log ON resource_submissions (push_log_id);

        CREATE TABLE IF NOT EXISTS submission_segments (
            submission_id   INTEGER NOT NULL REFERENCES resource_submissions (id) ON DELETE CASCADE,
            segment_id      INTEGER NOT NULL REFERENCES segments (id),
            position        INTEGER NOT NULL,
            PRIMARY KEY (submission_id, position)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
