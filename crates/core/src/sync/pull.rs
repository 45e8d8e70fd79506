//! Import translations committed to the repository since the last sync.
//!
//! The pull log entry is recorded in its own transaction before any file is
//! read, which moves the watermark to the current head. Each changed file is
//! then imported in a transaction of its own: a file that cannot be mapped or
//! parsed is rolled back and skipped, while a database failure aborts the
//! whole pull.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::observer::{SyncEvent, SyncObserver};
use super::propagate::{propagate, PropagationReport};
use crate::catalog::ResourceCatalog;
use crate::db::{queries, Database};
use crate::errors::{CatalogError, DatabaseError, SyncError};
use crate::models::{SyncAction, TranslationOutcome};
use crate::po::PoFile;
use crate::repo::{ChangedFile, Repository};

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub log_id: i64,
    pub head_commit_id: String,
    pub previous_commit_id: Option<String>,
    /// True when the head had already been imported.
    pub up_to_date: bool,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub translations_created: usize,
    pub translations_updated: usize,
    pub translations_unchanged: usize,
    /// Translations removed because the translator emptied the `msgstr`.
    pub translations_cleared: usize,
    pub unknown_segments: usize,
    pub propagation: PropagationReport,
}

#[derive(Debug, Default)]
struct FileImport {
    language: String,
    changed_entries: usize,
    created: usize,
    updated: usize,
    unchanged: usize,
    cleared: usize,
    unknown: usize,
    propagation: PropagationReport,
}

impl PullReport {
    fn add(&mut self, file: &FileImport) {
        self.files_imported += 1;
        self.translations_created += file.created;
        self.translations_updated += file.updated;
        self.translations_unchanged += file.unchanged;
        self.translations_cleared += file.cleared;
        self.unknown_segments += file.unknown;
        self.propagation.merge(file.propagation);
    }
}

/// Errors that skip one file instead of aborting the pull.
fn is_file_error(err: &SyncError) -> bool {
    matches!(
        err,
        SyncError::CatalogError(CatalogError::UnrecognizedFile(_)) | SyncError::CodecError(_)
    )
}

/// Import every translation file changed between the last synced commit
/// and the repository head.
#[instrument(skip_all)]
pub fn pull(
    db: &Database,
    repo: &dyn Repository,
    catalog: &dyn ResourceCatalog,
    observer: &dyn SyncObserver,
) -> Result<PullReport, SyncError> {
    let head = repo.head_commit_id()?.unwrap_or_default();

    let (log, previous) = db.transaction(|conn| -> Result<_, DatabaseError> {
        let previous = queries::last_synced_commit_id(conn)?;
        let log = queries::insert_sync_log(conn, SyncAction::Pull, &head)?;
        Ok((log, previous))
    })?;

    let mut report = PullReport {
        log_id: log.id,
        head_commit_id: head.clone(),
        previous_commit_id: previous.clone(),
        ..PullReport::default()
    };

    if head.is_empty() || previous.as_deref() == Some(head.as_str()) {
        report.up_to_date = true;
        observer.on_event(&SyncEvent::PullUpToDate { head });
        return Ok(report);
    }

    observer.on_event(&SyncEvent::PullStarted {
        head: head.clone(),
        since: previous.clone(),
    });

    let layout = catalog.layout();
    let changed = repo.changed_files(previous.as_deref(), &head)?;
    for file in changed
        .iter()
        .filter(|f| layout.is_translation_file(&f.path))
    {
        let imported =
            db.transaction(|conn| import_file(conn, catalog, observer, log.id, file));
        match imported {
            Ok(import) => {
                observer.on_event(&SyncEvent::FileImported {
                    path: file.path.clone(),
                    language: import.language.clone(),
                    changed_entries: import.changed_entries,
                });
                report.add(&import);
            }
            Err(err) if is_file_error(&err) => {
                report.files_skipped += 1;
                observer.on_event(&SyncEvent::FileSkipped {
                    path: file.path.clone(),
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    debug!(
        imported = report.files_imported,
        skipped = report.files_skipped,
        "pull finished"
    );
    Ok(report)
}

fn import_file(
    conn: &Connection,
    catalog: &dyn ResourceCatalog,
    observer: &dyn SyncObserver,
    log_id: i64,
    file: &ChangedFile,
) -> Result<FileImport, SyncError> {
    let (resource, language) = catalog.get_by_filename(conn, &file.path)?;
    queries::insert_sync_log_resource(conn, log_id, resource.id, Some(&language.code))?;

    let old = PoFile::parse_bytes(&file.old_content)?;
    let new = PoFile::parse_bytes(&file.new_content)?;

    let mut import = FileImport {
        language: language.code.clone(),
        ..FileImport::default()
    };
    for entry in new.changed_entries(&old) {
        import.changed_entries += 1;
        let Some(segment) = queries::find_segment_by_text(conn, &entry.msgid)? else {
            if entry.msgstr.is_empty() {
                continue;
            }
            import.unknown += 1;
            observer.on_event(&SyncEvent::UnknownSegment {
                path: file.path.clone(),
                msgid: entry.msgid.clone(),
            });
            continue;
        };
        match queries::save_translation(conn, segment.id, &language.code, &entry.msgstr)? {
            TranslationOutcome::Created => import.created += 1,
            TranslationOutcome::Updated => import.updated += 1,
            TranslationOutcome::Unchanged => import.unchanged += 1,
            TranslationOutcome::Cleared => import.cleared += 1,
        }
    }

    import.propagation = propagate(conn, catalog, observer, &resource, &language)?;
    Ok(import)
}
