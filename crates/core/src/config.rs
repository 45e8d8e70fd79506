//! TOML-based configuration system for gitlocalize.
//!
//! Secrets are never stored in the file. The remote token is referenced by
//! environment variable name (`token_env`) and resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Process-level settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Translation repository settings.
    pub repository: RepositoryConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/gitlocalize")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl DaemonConfig {
    /// Path of the SQLite database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("gitlocalize.db")
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Location and credentials of the translation repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Local working copy.
    pub path: PathBuf,

    /// Clone URL used when `path` does not exist yet.
    #[serde(default)]
    pub url: Option<String>,

    /// Remote name (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch to pull from and push to (default `main`).
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Environment variable holding an access token for the remote.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Author name on sync commits.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Author email on sync commits.
    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_author_name() -> String {
    "gitlocalize".into()
}
fn default_author_email() -> String {
    "gitlocalize@localhost".into()
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Which [`SyncManager`](crate::sync::SyncManager) implementation to build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncManagerKind {
    /// `trigger()` runs the sync on the caller's thread.
    #[default]
    Immediate,
    /// `trigger()` enqueues the sync for a background worker.
    Background,
}

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Orchestrator implementation.
    #[serde(default)]
    pub manager: SyncManagerKind,

    /// Language tag of the source content.
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Active target language tags.
    #[serde(default)]
    pub languages: Vec<String>,

    /// Line width used when serializing PO files.
    #[serde(default = "default_wrap_width")]
    pub wrap_width: usize,

    /// Commit message for pushes.
    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    /// Directory holding source `.pot` templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    /// Directory holding per-language `.po` files.
    #[serde(default = "default_locales_dir")]
    pub locales_dir: String,

    /// Name of the project manifest written at the repository root.
    #[serde(default = "default_config_file")]
    pub config_file: String,
}

fn default_source_language() -> String {
    "en".into()
}
fn default_wrap_width() -> usize {
    200
}
fn default_commit_message() -> String {
    "Updates to source content".into()
}
fn default_templates_dir() -> String {
    "templates".into()
}
fn default_locales_dir() -> String {
    "locales".into()
}
fn default_config_file() -> String {
    "l10n.toml".into()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            manager: SyncManagerKind::default(),
            source_language: default_source_language(),
            languages: Vec::new(),
            wrap_width: default_wrap_width(),
            commit_message: default_commit_message(),
            templates_dir: default_templates_dir(),
            locales_dir: default_locales_dir(),
            config_file: default_config_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A missing variable logs a warning but does not fail; pushing to a
    /// local or anonymous remote needs no token.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.repository.token_env {
            self.repository.token = resolve_optional_env(env_name, "repository.token_env");
        }
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.path".into(),
                detail: "repository path must not be empty".into(),
            });
        }
        if self.repository.branch.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repository.branch".into(),
                detail: "branch must not be empty".into(),
            });
        }
        if self.sync.source_language.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.source_language".into(),
                detail: "source language must not be empty".into(),
            });
        }
        if self.sync.languages.contains(&self.sync.source_language) {
            return Err(ConfigError::InvalidValue {
                field: "sync.languages".into(),
                detail: format!(
                    "'{}' is the source language and cannot be a target",
                    self.sync.source_language
                ),
            });
        }
        if self.sync.wrap_width < 20 {
            return Err(ConfigError::InvalidValue {
                field: "sync.wrap_width".into(),
                detail: "wrap width must be at least 20".into(),
            });
        }
        for (field, dir) in [
            ("sync.templates_dir", &self.sync.templates_dir),
            ("sync.locales_dir", &self.sync.locales_dir),
        ] {
            if dir.is_empty() || dir.contains('\\') || dir.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must be a relative, slash-separated directory".into(),
                });
            }
        }
        if self.sync.templates_dir == self.sync.locales_dir {
            return Err(ConfigError::InvalidValue {
                field: "sync.locales_dir".into(),
                detail: "templates and locales must live in different directories".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
