//! Bidirectional sync between the segment store and the translation
//! repository.

pub mod engine;
pub mod manager;
pub mod observer;
pub mod propagate;
pub mod pull;
pub mod push;

pub use engine::{SyncEngine, SyncReport};
pub use manager::{build_sync_manager, BackgroundSyncManager, ImmediateSyncManager, SyncManager};
pub use observer::{SyncEvent, SyncObserver, TracingObserver};
pub use propagate::{propagate, PropagationReport};
pub use pull::{pull, PullReport};
pub use push::{push, PushOptions, PushReport};
