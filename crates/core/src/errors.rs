//! Error types for the gitlocalize core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the repository adapter.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// A path inside the tree could not be represented.
    #[error("invalid tree path '{0}'")]
    InvalidPath(String),

    /// The project manifest could not be serialized.
    #[error("failed to write project manifest: {0}")]
    InvalidManifest(String),
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors from the synchronization engine and sync managers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another sync cycle is already running on this engine.
    #[error("sync already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// The background worker has shut down and can no longer accept triggers.
    #[error("sync queue is closed")]
    QueueClosed,

    /// The background worker panicked or was cancelled.
    #[error("sync worker failed: {0}")]
    WorkerFailed(String),

    /// Underlying repository error during sync.
    #[error("sync Git error: {0}")]
    GitError(#[from] GitError),

    /// Database error during sync.
    #[error("sync database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// Catalog error that is not handled per file or per branch.
    #[error("sync catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    /// Codec error on content the sync itself generated.
    #[error("sync codec error: {0}")]
    CodecError(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// Catalog errors
// ---------------------------------------------------------------------------

/// Errors from the resource catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A changed file does not map to any known resource and language.
    #[error("unrecognized translation file '{0}'")]
    UnrecognizedFile(String),

    /// The resource's parent has no translated page in this language yet.
    #[error("parent of resource '{resource}' is not translated into '{language}' yet")]
    ParentNotTranslated { resource: String, language: String },

    /// Database error while reading or writing catalog rows.
    #[error("catalog database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        Self::DatabaseError(DatabaseError::SqliteError(e))
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors from the PO file codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The content is not valid UTF-8.
    #[error("translation file is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A line could not be parsed.
    #[error("PO syntax error on line {line}: {detail}")]
    Syntax { line: usize, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = CatalogError::UnrecognizedFile("locales/fr/nope.po".into());
        assert_eq!(
            err.to_string(),
            "unrecognized translation file 'locales/fr/nope.po'"
        );

        let err = CatalogError::ParentNotTranslated {
            resource: "pages/about".into(),
            language: "fr".into(),
        };
        assert!(err.to_string().contains("pages/about"));
        assert!(err.to_string().contains("'fr'"));

        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = CodecError::Syntax {
            line: 3,
            detail: "unterminated string".into(),
        };
        assert_eq!(
            err.to_string(),
            "PO syntax error on line 3: unterminated string"
        );
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::RefNotFound("HEAD".into());
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let db_err = DatabaseError::NotFound {
            entity: "sync_log".into(),
            id: "7".into(),
        };
        let sync_err: SyncError = db_err.into();
        assert!(matches!(sync_err, SyncError::DatabaseError(_)));
    }

    #[test]
    fn test_catalog_error_from_sqlite() {
        let err: CatalogError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(
            err,
            CatalogError::DatabaseError(DatabaseError::SqliteError(_))
        ));
    }
}
