//! One full sync cycle: fast-forward the working copy, pull translations,
//! then push source content.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::observer::{SyncObserver, TracingObserver};
use super::pull::{pull, PullReport};
use super::push::{push, PushOptions, PushReport};
use crate::catalog::{FileLayout, ResourceCatalog, SqliteCatalog};
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::SyncError;
use crate::repo::{GitRepositorySource, RepositorySource};

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: String,
    pub completed_at: String,
    pub pull: PullReport,
    pub push: PushReport,
}

/// Runs sync cycles against one database and one repository.
///
/// At most one cycle runs at a time; a second concurrent call fails with
/// [`SyncError::AlreadyRunning`].
pub struct SyncEngine {
    db: Arc<Database>,
    source: Arc<dyn RepositorySource>,
    catalog: Arc<dyn ResourceCatalog>,
    observer: Arc<dyn SyncObserver>,
    options: PushOptions,
    running: Arc<AtomicBool>,
    cycle_started_at: Mutex<String>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn RepositorySource>,
        catalog: Arc<dyn ResourceCatalog>,
        options: PushOptions,
    ) -> Self {
        Self {
            db,
            source,
            catalog,
            observer: Arc::new(TracingObserver),
            options,
            running: Arc::new(AtomicBool::new(false)),
            cycle_started_at: Mutex::new(String::new()),
        }
    }

    /// Wire an engine from configuration: a git working copy, the SQLite
    /// catalog and the configured languages.
    pub fn from_config(config: &AppConfig, db: Arc<Database>) -> Result<Self, SyncError> {
        db.ensure_languages(&config.sync.source_language, &config.sync.languages)?;
        let source = GitRepositorySource::new(config.repository.clone());
        let catalog = SqliteCatalog::new(FileLayout::from_config(&config.sync));
        let options = PushOptions {
            wrap_width: config.sync.wrap_width,
            commit_message: config.sync.commit_message.clone(),
        };
        Ok(Self::new(db, Arc::new(source), Arc::new(catalog), options))
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one cycle on the calling thread.
    #[instrument(skip(self))]
    pub fn sync(&self) -> Result<SyncReport, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning {
                started_at: self.started_at(),
            });
        }
        let _guard = SyncLockGuard(self.running.clone());

        let started_at = Utc::now().to_rfc3339();
        if let Ok(mut slot) = self.cycle_started_at.lock() {
            slot.clone_from(&started_at);
        }
        info!("starting sync cycle");

        let mut repo = self.source.open()?;
        repo.pull()?;

        let pull = pull(
            &self.db,
            repo.as_ref(),
            self.catalog.as_ref(),
            self.observer.as_ref(),
        )?;
        let push = push(
            &self.db,
            repo.as_mut(),
            self.catalog.as_ref(),
            self.observer.as_ref(),
            &self.options,
        )?;

        let report = SyncReport {
            started_at,
            completed_at: Utc::now().to_rfc3339(),
            pull,
            push,
        };
        info!(
            files_imported = report.pull.files_imported,
            pages_created = report.pull.propagation.pages_created,
            submissions_pushed = report.push.submissions_pushed,
            "sync cycle complete"
        );
        Ok(report)
    }

    fn started_at(&self) -> String {
        self.cycle_started_at
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Drop guard that resets the `running` flag, even if a cycle panics.
struct SyncLockGuard(Arc<AtomicBool>);

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{FakeSource, GatedSource};

    fn engine(source: Arc<dyn RepositorySource>) -> SyncEngine {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        db.ensure_languages("en", &["fr".to_string()]).unwrap();
        SyncEngine::new(
            db,
            source,
            Arc::new(SqliteCatalog::default()),
            PushOptions::default(),
        )
    }

    #[test]
    fn test_sync_runs_pull_then_push() {
        let source = Arc::new(FakeSource::default());
        let engine = engine(source.clone());
        let page = engine.database().insert_resource("page:1", "home", None).unwrap();
        engine.database().create_submission(page.id, 1, &["Hi"]).unwrap();

        let report = engine.sync().unwrap();
        assert!(report.pull.up_to_date);
        assert_eq!(report.push.submissions_pushed, 1);
        assert!(!engine.is_running());

        let second = engine.sync().unwrap();
        assert!(second.pull.up_to_date);
        assert_eq!(second.push, PushReport::default());
        assert_eq!(source.pulls(), 2);
    }

    #[test]
    fn test_concurrent_sync_is_rejected() {
        let (source, gate) = GatedSource::new();
        let engine = Arc::new(engine(Arc::new(source)));

        let worker = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.sync())
        };
        gate.wait_until_entered();
        assert!(engine.is_running());
        assert!(matches!(
            engine.sync(),
            Err(SyncError::AlreadyRunning { .. })
        ));
        gate.release();

        worker.join().unwrap().unwrap();
        assert!(!engine.is_running());
    }
}
