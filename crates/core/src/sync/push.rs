//! Export current source content and translations to the repository.
//!
//! The next tree is regenerated from the catalog in memory. Submission
//! bookkeeping commits to the database before anything is written to git, so
//! a crash between the two leaves submissions marked pushed and the next
//! push only has to rewrite files, never to re-record submissions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::observer::{SyncEvent, SyncObserver};
use crate::catalog::ResourceCatalog;
use crate::db::{queries, Database};
use crate::errors::{DatabaseError, SyncError};
use crate::models::SyncAction;
use crate::po::PoFile;
use crate::repo::{Repository, TreeReader, TreeWriter};

/// Settings for generated files and commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub wrap_width: usize,
    pub commit_message: String,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            wrap_width: 200,
            commit_message: "Updates to source content".into(),
        }
    }
}

/// Outcome of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    /// `None` when every current submission had already been pushed, in
    /// which case every other field is zero as well.
    pub log_id: Option<i64>,
    pub commit_id: Option<String>,
    pub submissions_pushed: usize,
    pub resources_written: usize,
    pub files_written: usize,
    pub pushed_to_remote: bool,
}

/// Replace the file at `path` with `generated`, keeping the header metadata
/// of the version currently in the repository.
fn update_po(
    reader: &TreeReader,
    writer: &mut TreeWriter,
    path: &str,
    mut generated: PoFile,
    wrap_width: usize,
) {
    if let Some(current) = reader.read_file(path) {
        match PoFile::parse_bytes(current) {
            Ok(current) => generated.metadata = current.metadata,
            Err(e) => debug!(path, error = %e, "existing file unreadable, using fresh header"),
        }
    }
    writer.write_file(path, generated.to_string_wrapped(wrap_width));
}

/// Write every current submission to the repository and publish it.
///
/// When no current submission is new since the last push nothing is logged,
/// committed or pushed.
#[instrument(skip_all)]
pub fn push(
    db: &Database,
    repo: &mut dyn Repository,
    catalog: &dyn ResourceCatalog,
    observer: &dyn SyncObserver,
    options: &PushOptions,
) -> Result<PushReport, SyncError> {
    let reader = repo.reader()?;
    let mut writer = TreeWriter::new(&reader);
    let layout = catalog.layout();
    writer.copy_unmanaged_files(|path| layout.is_managed(path));

    let mut report = PushReport::default();

    let log_id = db.transaction(|conn| -> Result<Option<i64>, SyncError> {
        let languages = catalog.target_languages(conn)?;
        let mut manifest_paths = Vec::new();
        let mut submission_ids = Vec::new();

        for (submission, resource) in catalog.current_submissions(conn)? {
            let source_path = layout.source_path(&resource.path);
            let source = catalog.generate_source_file(conn, &resource, &submission)?;
            update_po(&reader, &mut writer, &source_path, source, options.wrap_width);
            report.files_written += 1;

            for language in &languages {
                let path = layout.language_path(&resource.path, &language.code);
                let po = catalog.generate_language_file(conn, &resource, &submission, language)?;
                update_po(&reader, &mut writer, &path, po, options.wrap_width);
                report.files_written += 1;
            }

            manifest_paths.push((source_path, layout.language_path_template(&resource.path)));
            submission_ids.push(submission.id);
            report.resources_written += 1;
        }

        let tags: Vec<String> = languages.into_iter().map(|l| l.code).collect();
        writer.write_config(&layout.config_file, &tags, &manifest_paths)?;

        let unpushed = queries::list_unpushed_submissions(conn, &submission_ids)?;
        if unpushed.is_empty() {
            return Ok(None);
        }

        let log = queries::insert_sync_log(conn, SyncAction::Push, "")?;
        let mut logged = BTreeSet::new();
        for (_, resource_id) in &unpushed {
            if logged.insert(*resource_id) {
                queries::insert_sync_log_resource(conn, log.id, *resource_id, None)?;
            }
        }
        let ids: Vec<i64> = unpushed.iter().map(|(id, _)| *id).collect();
        report.submissions_pushed = queries::mark_submissions_pushed(conn, &ids, log.id)?;
        Ok(Some(log.id))
    })?;

    let Some(log_id) = log_id else {
        observer.on_event(&SyncEvent::PushSkipped);
        return Ok(PushReport::default());
    };
    report.log_id = Some(log_id);

    if writer.has_changes() {
        let commit_id = writer.commit(repo, &options.commit_message)?;
        db.transaction(|conn| -> Result<(), DatabaseError> {
            queries::set_sync_log_commit(conn, log_id, &commit_id)
        })?;
        observer.on_event(&SyncEvent::PushCommitted {
            commit_id: commit_id.clone(),
            submissions: report.submissions_pushed,
        });
        report.commit_id = Some(commit_id);
    } else {
        observer.on_event(&SyncEvent::PushUnchanged {
            submissions: report.submissions_pushed,
        });
    }

    repo.push()?;
    report.pushed_to_remote = true;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::sync::observer::testing::RecordingObserver;
    use crate::sync::testing::FakeRepository;

    fn setup() -> (Database, SqliteCatalog) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.ensure_languages("en", &["de".to_string(), "fr".to_string()])
            .unwrap();
        (db, SqliteCatalog::default())
    }

    fn file(repo: &FakeRepository, path: &str) -> PoFile {
        let reader = repo.reader().unwrap();
        PoFile::parse_bytes(reader.read_file(path).unwrap()).unwrap()
    }

    #[test]
    fn test_push_writes_source_language_and_manifest() {
        let (db, catalog) = setup();
        let home = db.insert_resource("page:1", "home", None).unwrap();
        db.create_submission(home.id, 1, &["Welcome"]).unwrap();
        let mut repo = FakeRepository::default();
        repo.commit_files(&[("README.md", "docs"), ("templates/stale.pot", "old")]);
        let observer = RecordingObserver::default();

        let report = push(&db, &mut repo, &catalog, &observer, &PushOptions::default()).unwrap();
        assert_eq!(report.submissions_pushed, 1);
        assert_eq!(report.files_written, 3);
        assert!(report.pushed_to_remote);
        assert_eq!(repo.pushes, 1);

        let commit_id = report.commit_id.unwrap();
        assert_eq!(repo.head_commit_id().unwrap().as_deref(), Some(commit_id.as_str()));
        assert_eq!(db.last_synced_commit_id().unwrap(), Some(commit_id));

        let reader = repo.reader().unwrap();
        assert_eq!(
            reader.paths().collect::<Vec<_>>(),
            vec![
                "README.md",
                "l10n.toml",
                "locales/de/home.po",
                "locales/fr/home.po",
                "templates/home.pot"
            ]
        );
        assert_eq!(file(&repo, "locales/fr/home.po").metadata_value("Language"), Some("fr"));
        assert_eq!(file(&repo, "templates/home.pot").entries[0].msgid, "Welcome");

        let logs = db.list_sync_logs(10).unwrap();
        let entries = db.list_sync_log_resources(logs[0].id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].language, None);
    }

    #[test]
    fn test_push_without_new_submissions_is_noop() {
        let (db, catalog) = setup();
        let home = db.insert_resource("page:1", "home", None).unwrap();
        db.create_submission(home.id, 1, &["Welcome"]).unwrap();
        let mut repo = FakeRepository::default();
        let observer = RecordingObserver::default();
        let options = PushOptions::default();

        push(&db, &mut repo, &catalog, &observer, &options).unwrap();
        let head = repo.head_commit_id().unwrap();

        let report = push(&db, &mut repo, &catalog, &observer, &options).unwrap();
        assert_eq!(report, PushReport::default());
        assert_eq!(repo.head_commit_id().unwrap(), head);
        assert_eq!(repo.pushes, 1);
        assert_eq!(db.count_sync_logs(SyncAction::Push).unwrap(), 1);
        assert_eq!(observer.events().last(), Some(&SyncEvent::PushSkipped));
    }

    #[test]
    fn test_push_with_no_submissions_at_all() {
        let (db, catalog) = setup();
        let mut repo = FakeRepository::default();
        let report = push(
            &db,
            &mut repo,
            &catalog,
            &RecordingObserver::default(),
            &PushOptions::default(),
        )
        .unwrap();
        assert_eq!(report.log_id, None);
        assert_eq!(repo.head_commit_id().unwrap(), None);
        assert_eq!(db.count_sync_logs(SyncAction::Push).unwrap(), 0);
    }

    #[test]
    fn test_push_keeps_existing_header_metadata() {
        let (db, catalog) = setup();
        let home = db.insert_resource("page:1", "home", None).unwrap();
        db.create_submission(home.id, 1, &["Welcome"]).unwrap();
        let mut repo = FakeRepository::default();
        repo.commit_files(&[(
            "locales/fr/home.po",
            "msgid \"\"\nmsgstr \"\"\n\"Last-Translator: Alice\\n\"\n\nmsgid \"Old\"\nmsgstr \"Vieux\"\n",
        )]);

        push(
            &db,
            &mut repo,
            &catalog,
            &RecordingObserver::default(),
            &PushOptions::default(),
        )
        .unwrap();

        let fr = file(&repo, "locales/fr/home.po");
        assert_eq!(fr.metadata_value("Last-Translator"), Some("Alice"));
        let keys: Vec<_> = fr.entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![("Welcome", "")]);
    }

    #[test]
    fn test_new_revision_is_pushed_again() {
        let (db, catalog) = setup();
        let home = db.insert_resource("page:1", "home", None).unwrap();
        db.create_submission(home.id, 1, &["Welcome"]).unwrap();
        let mut repo = FakeRepository::default();
        let observer = RecordingObserver::default();
        let options = PushOptions::default();
        push(&db, &mut repo, &catalog, &observer, &options).unwrap();

        db.create_submission(home.id, 2, &["Welcome", "News"]).unwrap();
        let report = push(&db, &mut repo, &catalog, &observer, &options).unwrap();
        assert_eq!(report.submissions_pushed, 1);
        assert!(report.commit_id.is_some());
        let keys: Vec<_> = file(&repo, "templates/home.pot")
            .entries
            .iter()
            .map(|e| e.msgid.clone())
            .collect();
        assert_eq!(keys, vec!["Welcome", "News"]);
        assert_eq!(repo.pushes, 2);
    }
}
