//! Domain model types shared by the database layer, the resource catalog and
//! the sync reconcilers.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision so
//! that lexical order matches chronological order in SQL.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time in the format used by every timestamp column.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Catalog side
// ---------------------------------------------------------------------------

/// A language known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Language {
    /// RFC 5646 tag, e.g. `fr` or `pt-BR`.
    pub code: String,
    pub is_active: bool,
    pub is_default: bool,
}

/// A translatable content unit tied to a CMS page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub id: i64,
    /// Stable identity of the CMS object.
    pub object_id: String,
    /// Slash-separated path used to name the resource's files.
    pub path: String,
    pub current_revision_id: Option<i64>,
    pub parent_id: Option<i64>,
}

/// A snapshot of a resource's source content queued for translation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSubmission {
    pub id: i64,
    pub resource_id: i64,
    pub revision_id: i64,
    pub created_at: String,
    pub pushed_at: Option<String>,
    pub push_log_id: Option<i64>,
}

impl ResourceSubmission {
    /// Whether a push has already recorded this submission.
    pub fn is_pushed(&self) -> bool {
        self.push_log_id.is_some()
    }
}

/// A distinct unit of extracted source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub id: i64,
    pub text: String,
}

/// Translated text for one segment in one language.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Translation {
    pub id: i64,
    pub segment_id: i64,
    pub language: String,
    pub text: String,
    pub updated_at: String,
}

/// What happened when a translation was written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TranslationOutcome {
    Created,
    Updated,
    /// Stored text already matched; nothing was written.
    Unchanged,
    /// An empty text removed the stored translation.
    Cleared,
}

/// A materialized translated revision of a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslatedPage {
    pub id: i64,
    pub resource_id: i64,
    pub language: String,
    pub submission_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Sync log
// ---------------------------------------------------------------------------

/// Kind of sync action recorded in the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Pull,
    Push,
}

impl SyncAction {
    /// Parse an action column value. Unknown values read as `Pull`.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "push" => Self::Push,
            _ => Self::Pull,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pull or push invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLogEntry {
    pub id: i64,
    pub action: SyncAction,
    /// Empty when the push produced no commit (yet).
    pub commit_id: String,
    pub created_at: String,
}

/// A (resource, language) pair touched by a sync log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncLogResource {
    pub id: i64,
    pub log_id: i64,
    pub resource_id: i64,
    /// `None` for push entries, which cover every language of the resource.
    pub language: Option<String>,
}
