//! Progress reporting for sync cycles.

use tracing::{debug, error, info, warn};

/// Something noteworthy that happened during a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PullStarted {
        head: String,
        since: Option<String>,
    },
    /// The head commit was already imported.
    PullUpToDate {
        head: String,
    },
    FileImported {
        path: String,
        language: String,
        changed_entries: usize,
    },
    /// A translation file could not be imported and was skipped.
    FileSkipped {
        path: String,
        reason: String,
    },
    /// A msgid in a translation file matches no known segment.
    UnknownSegment {
        path: String,
        msgid: String,
    },
    PageCreated {
        resource: String,
        language: String,
    },
    PageUpdated {
        resource: String,
        language: String,
    },
    /// A translated page could not be created because its parent has none.
    PageBlocked {
        resource: String,
        language: String,
    },
    /// Every current submission was already pushed.
    PushSkipped,
    PushCommitted {
        commit_id: String,
        submissions: usize,
    },
    /// Submissions were recorded but the generated tree matched the head.
    PushUnchanged {
        submissions: usize,
    },
}

/// Receives [`SyncEvent`]s from the reconcilers.
pub trait SyncObserver: Send + Sync {
    fn on_event(&self, event: &SyncEvent);
}

/// Default observer: turns events into `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::PullStarted { head, since } => {
                info!(head, since = since.as_deref().unwrap_or("<none>"), "pulling translations")
            }
            SyncEvent::PullUpToDate { head } => info!(head, "translations already up to date"),
            SyncEvent::FileImported {
                path,
                language,
                changed_entries,
            } => info!(path, language, changed_entries, "imported translation file"),
            SyncEvent::FileSkipped { path, reason } => {
                error!(path, reason, "skipped translation file")
            }
            SyncEvent::UnknownSegment { path, msgid } => {
                warn!(path, msgid, "translation for unknown segment ignored")
            }
            SyncEvent::PageCreated { resource, language } => {
                info!(resource, language, "created translated page")
            }
            SyncEvent::PageUpdated { resource, language } => {
                debug!(resource, language, "updated translated page")
            }
            SyncEvent::PageBlocked { resource, language } => {
                info!(resource, language, "parent page not translated yet")
            }
            SyncEvent::PushSkipped => info!("no new submissions to push"),
            SyncEvent::PushCommitted {
                commit_id,
                submissions,
            } => info!(commit_id, submissions, "pushed source content"),
            SyncEvent::PushUnchanged { submissions } => {
                info!(submissions, "submissions recorded, repository already current")
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Observer that keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<SyncEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<SyncEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SyncObserver for RecordingObserver {
        fn on_event(&self, event: &SyncEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
