//! gitlocalize core library.
//!
//! This crate keeps a CMS segment store and a git repository of gettext
//! translation files in step: configuration, database persistence, the PO
//! codec, the resource catalog, the repository adapter, and the pull/push
//! reconcilers with their orchestrators.

pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod po;
pub mod repo;
pub mod sync;

// Re-exports for convenience.
pub use catalog::{FileLayout, ResourceCatalog, SqliteCatalog};
pub use config::AppConfig;
pub use db::Database;
pub use repo::{GitRepository, GitRepositorySource, Repository, RepositorySource};
pub use sync::{SyncEngine, SyncManager};
