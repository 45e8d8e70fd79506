//! Translated page materialization after a pull.
//!
//! Creating a page for a resource can unblock its children, so the cascade
//! walks the resource tree with an explicit work queue. A resource re-enters
//! the queue only through a parent whose page was newly created, and a page
//! is created at most once per language, so the walk terminates.

use std::collections::VecDeque;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::observer::{SyncEvent, SyncObserver};
use crate::catalog::ResourceCatalog;
use crate::errors::CatalogError;
use crate::models::{Language, Resource};

/// Outcome of one propagation cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub pages_created: usize,
    pub pages_updated: usize,
    /// Resources left untranslated because their parent has no page yet.
    pub pages_blocked: usize,
}

impl PropagationReport {
    pub fn merge(&mut self, other: PropagationReport) {
        self.pages_created += other.pages_created;
        self.pages_updated += other.pages_updated;
        self.pages_blocked += other.pages_blocked;
    }
}

/// Materialize translated pages for `resource` in `language`, cascading to
/// descendants whose pages become possible.
pub fn propagate(
    conn: &Connection,
    catalog: &dyn ResourceCatalog,
    observer: &dyn SyncObserver,
    resource: &Resource,
    language: &Language,
) -> Result<PropagationReport, CatalogError> {
    let mut report = PropagationReport::default();
    let mut queue = VecDeque::from([resource.clone()]);

    while let Some(resource) = queue.pop_front() {
        let Some(submission) = catalog.find_translatable_submission(conn, &resource, language)?
        else {
            continue;
        };

        match catalog.create_or_update_translated_page(conn, &resource, &submission, language) {
            Ok((_, true)) => {
                report.pages_created += 1;
                observer.on_event(&SyncEvent::PageCreated {
                    resource: resource.path.clone(),
                    language: language.code.clone(),
                });
                queue.extend(catalog.children(conn, &resource)?);
            }
            Ok((_, false)) => {
                report.pages_updated += 1;
                observer.on_event(&SyncEvent::PageUpdated {
                    resource: resource.path.clone(),
                    language: language.code.clone(),
                });
            }
            Err(CatalogError::ParentNotTranslated { .. }) => {
                report.pages_blocked += 1;
                observer.on_event(&SyncEvent::PageBlocked {
                    resource: resource.path.clone(),
                    language: language.code.clone(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}
