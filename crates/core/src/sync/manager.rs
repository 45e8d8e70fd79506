//! Sync orchestration: when and where sync cycles run.
//!
//! [`ImmediateSyncManager`] runs a cycle on the caller's thread.
//! [`BackgroundSyncManager`] hands cycles to a tokio worker; triggers that
//! arrive while one cycle is already waiting are coalesced into it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::engine::{SyncEngine, SyncReport};
use crate::config::SyncManagerKind;
use crate::errors::SyncError;

/// Uniform interface over the orchestrator implementations.
pub trait SyncManager: Send + Sync {
    /// Run a cycle now and wait for it.
    fn sync(&self) -> Result<SyncReport, SyncError>;

    /// Request a cycle. Depending on the implementation it runs before this
    /// returns or later on a worker.
    fn trigger(&self) -> Result<(), SyncError>;

    /// A requested cycle has not started yet.
    fn is_queued(&self) -> bool;

    /// A cycle is in progress.
    fn is_running(&self) -> bool;
}

/// Build the configured manager. The background manager spawns its worker
/// on the current tokio runtime.
pub fn build_sync_manager(
    kind: SyncManagerKind,
    engine: Arc<SyncEngine>,
) -> Result<Box<dyn SyncManager>, SyncError> {
    match kind {
        SyncManagerKind::Immediate => Ok(Box::new(ImmediateSyncManager::new(engine))),
        SyncManagerKind::Background => {
            let handle = Handle::try_current()
                .map_err(|e| SyncError::WorkerFailed(format!("no tokio runtime: {e}")))?;
            Ok(Box::new(BackgroundSyncManager::spawn(engine, &handle)))
        }
    }
}

// ---------------------------------------------------------------------------
// Immediate
// ---------------------------------------------------------------------------

pub struct ImmediateSyncManager {
    engine: Arc<SyncEngine>,
}

impl ImmediateSyncManager {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

impl SyncManager for ImmediateSyncManager {
    fn sync(&self) -> Result<SyncReport, SyncError> {
        self.engine.sync()
    }

    fn trigger(&self) -> Result<(), SyncError> {
        self.engine.sync().map(|_| ())
    }

    fn is_queued(&self) -> bool {
        false
    }

    fn is_running(&self) -> bool {
        self.engine.is_running()
    }
}

// ---------------------------------------------------------------------------
// Background
// ---------------------------------------------------------------------------

/// Counters across background cycles.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
}

/// Requests sent to the worker and not yet taken.
///
/// Counted up before the send and down only after the worker has marked
/// itself active, so `is_queued() || is_running()` holds from `trigger()`
/// until the cycle ends regardless of interleaving.
#[derive(Debug, Default)]
struct PendingRequests(AtomicUsize);

impl PendingRequests {
    fn request(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo a `request` whose send did not go through.
    fn cancel(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    fn take(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }

    fn is_queued(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }
}

pub struct BackgroundSyncManager {
    engine: Arc<SyncEngine>,
    sync_tx: mpsc::Sender<()>,
    pending: Arc<PendingRequests>,
    /// Set from the moment the worker takes a request until its cycle ends,
    /// so `is_queued() || is_running()` never reads false in between.
    active: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    worker: JoinHandle<()>,
}

impl BackgroundSyncManager {
    /// Start the worker on `handle`. The queue holds at most one pending
    /// cycle.
    pub fn spawn(engine: Arc<SyncEngine>, handle: &Handle) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel(1);
        let pending = Arc::new(PendingRequests::default());
        let active = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());
        let worker = handle.spawn(run_worker(
            engine.clone(),
            sync_rx,
            pending.clone(),
            active.clone(),
            stats.clone(),
        ));
        Self {
            engine,
            sync_tx,
            pending,
            active,
            stats,
            worker,
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Stop accepting triggers, let the worker finish any queued cycle and
    /// wait for it to exit.
    pub async fn shutdown(self) -> Result<(), SyncError> {
        drop(self.sync_tx);
        self.worker
            .await
            .map_err(|e| SyncError::WorkerFailed(e.to_string()))
    }
}

async fn run_worker(
    engine: Arc<SyncEngine>,
    mut sync_rx: mpsc::Receiver<()>,
    pending: Arc<PendingRequests>,
    active: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) {
    info!("sync worker started");
    while let Some(()) = sync_rx.recv().await {
        active.store(true, Ordering::SeqCst);
        pending.take();
        let engine = engine.clone();
        match tokio::task::spawn_blocking(move || engine.sync()).await {
            Ok(Ok(report)) => {
                let cycles = stats.cycles_completed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(
                    cycle = cycles,
                    files_imported = report.pull.files_imported,
                    submissions_pushed = report.push.submissions_pushed,
                    "background sync completed"
                );
            }
            Ok(Err(e)) => {
                let failures = stats.cycles_failed.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, failures, "background sync failed");
            }
            Err(e) => {
                stats.cycles_failed.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "background sync task panicked");
            }
        }
        active.store(false, Ordering::SeqCst);
    }
    info!("sync worker stopped");
}

impl SyncManager for BackgroundSyncManager {
    fn sync(&self) -> Result<SyncReport, SyncError> {
        self.engine.sync()
    }

    fn trigger(&self) -> Result<(), SyncError> {
        self.pending.request();
        match self.sync_tx.try_send(()) {
            Ok(()) => {
                debug!("sync queued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                self.pending.cancel();
                debug!("sync already queued, trigger coalesced");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                self.pending.cancel();
                Err(SyncError::QueueClosed)
            }
        }
    }

    fn is_queued(&self) -> bool {
        self.pending.is_queued()
    }

    fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) || self.engine.is_running()
    }
}
