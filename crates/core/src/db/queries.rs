//! Typed query helpers for every table in the gitlocalize database.
//!
//! The helpers are free functions over a `&Connection` so they compose inside
//! a [`Database::transaction`] scope. [`Database`] exposes locking wrappers
//! for the read paths used outside of a sync cycle.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    now_timestamp, Language, Resource, ResourceSubmission, Segment, SyncAction, SyncLogEntry,
    SyncLogResource, TranslatedPage, Translation, TranslationOutcome,
};

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

const RESOURCE_COLUMNS: &str = "id, object_id, path, current_revision_id, parent_id";
const SUBMISSION_COLUMNS: &str =
    "id, resource_id, revision_id, created_at, pushed_at, push_log_id";

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        object_id: row.get(1)?,
        path: row.get(2)?,
        current_revision_id: row.get(3)?,
        parent_id: row.get(4)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceSubmission> {
    Ok(ResourceSubmission {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        revision_id: row.get(2)?,
        created_at: row.get(3)?,
        pushed_at: row.get(4)?,
        push_log_id: row.get(5)?,
    })
}

fn sync_log_from_row(row: &Row<'_>) -> rusqlite::Result<SyncLogEntry> {
    let action: String = row.get(1)?;
    Ok(SyncLogEntry {
        id: row.get(0)?,
        action: SyncAction::from_str_val(&action),
        commit_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

// -- languages --------------------------------------------------------------

/// Make the language table match the configured languages.
///
/// `source` becomes the single default language. Every tag in `targets` is
/// active; any other stored language is deactivated but kept, since
/// translations reference it.
pub fn ensure_languages(
    conn: &Connection,
    source: &str,
    targets: &[String],
) -> Result<(), DatabaseError> {
    conn.execute("UPDATE languages SET is_active = 0, is_default = 0", [])?;
    conn.execute(
        "INSERT INTO languages (code, is_active, is_default) VALUES (?1, 1, 1)
         ON CONFLICT(code) DO UPDATE SET is_active = 1, is_default = 1",
        params![source],
    )?;
    for code in targets {
        conn.execute(
            "INSERT INTO languages (code, is_active, is_default) VALUES (?1, 1, 0)
             ON CONFLICT(code) DO UPDATE SET is_active = 1",
            params![code],
        )?;
    }
    debug!(source, targets = targets.len(), "languages synchronized");
    Ok(())
}

/// Look up a language by tag.
pub fn get_language(conn: &Connection, code: &str) -> Result<Option<Language>, DatabaseError> {
    let language = conn
        .query_row(
            "SELECT code, is_active, is_default FROM languages WHERE code = ?1",
            params![code],
            |row| {
                Ok(Language {
                    code: row.get(0)?,
                    is_active: row.get(1)?,
                    is_default: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(language)
}

/// Active languages excluding the default, ordered by tag.
pub fn list_target_languages(conn: &Connection) -> Result<Vec<Language>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT code, is_active, is_default FROM languages
         WHERE is_active = 1 AND is_default = 0 ORDER BY code",
    )?;
    let languages = stmt
        .query_map([], |row| {
            Ok(Language {
                code: row.get(0)?,
                is_active: row.get(1)?,
                is_default: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(languages)
}

// -- resources --------------------------------------------------------------

/// Register a new resource.
pub fn insert_resource(
    conn: &Connection,
    object_id: &str,
    path: &str,
    parent_id: Option<i64>,
) -> Result<Resource, DatabaseError> {
    conn.execute(
        "INSERT INTO resources (object_id, path, parent_id) VALUES (?1, ?2, ?3)",
        params![object_id, path, parent_id],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, object_id, path, "inserted resource");
    Ok(Resource {
        id,
        object_id: object_id.to_string(),
        path: path.to_string(),
        current_revision_id: None,
        parent_id,
    })
}

pub fn get_resource(conn: &Connection, id: i64) -> Result<Option<Resource>, DatabaseError> {
    let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], resource_from_row).optional()?)
}

pub fn get_resource_by_path(
    conn: &Connection,
    path: &str,
) -> Result<Option<Resource>, DatabaseError> {
    let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE path = ?1");
    Ok(conn.query_row(&sql, params![path], resource_from_row).optional()?)
}

/// Direct children of a resource, ordered by path.
pub fn list_child_resources(
    conn: &Connection,
    parent_id: i64,
) -> Result<Vec<Resource>, DatabaseError> {
    let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE parent_id = ?1 ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let resources = stmt
        .query_map(params![parent_id], resource_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resources)
}

pub fn list_resources(conn: &Connection) -> Result<Vec<Resource>, DatabaseError> {
    let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let resources = stmt
        .query_map([], resource_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resources)
}

// -- segments & translations --------------------------------------------------

pub fn find_segment_by_text(
    conn: &Connection,
    text: &str,
) -> Result<Option<Segment>, DatabaseError> {
    let segment = conn
        .query_row(
            "SELECT id, text FROM segments WHERE text = ?1",
            params![text],
            |row| {
                Ok(Segment {
                    id: row.get(0)?,
                    text: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(segment)
}

pub fn get_or_create_segment(conn: &Connection, text: &str) -> Result<Segment, DatabaseError> {
    if let Some(segment) = find_segment_by_text(conn, text)? {
        return Ok(segment);
    }
    conn.execute("INSERT INTO segments (text) VALUES (?1)", params![text])?;
    Ok(Segment {
        id: conn.last_insert_rowid(),
        text: text.to_string(),
    })
}

pub fn get_translation(
    conn: &Connection,
    segment_id: i64,
    language: &str,
) -> Result<Option<Translation>, DatabaseError> {
    let translation = conn
        .query_row(
            "SELECT id, segment_id, language, text, updated_at FROM translations
             WHERE segment_id = ?1 AND language = ?2",
            params![segment_id, language],
            |row| {
                Ok(Translation {
                    id: row.get(0)?,
                    segment_id: row.get(1)?,
                    language: row.get(2)?,
                    text: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(translation)
}

/// Get-or-create the translation of a segment.
///
/// An existing translation is rewritten only when `text` differs from the
/// stored text; identical text leaves `updated_at` untouched. Empty text
/// means untranslated: it deletes any stored translation and never creates
/// one.
pub fn save_translation(
    conn: &Connection,
    segment_id: i64,
    language: &str,
    text: &str,
) -> Result<TranslationOutcome, DatabaseError> {
    let now = now_timestamp();
    match get_translation(conn, segment_id, language)? {
        None if text.is_empty() => Ok(TranslationOutcome::Unchanged),
        None => {
            conn.execute(
                "INSERT INTO translations (segment_id, language, text, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![segment_id, language, text, now],
            )?;
            debug!(segment_id, language, "created translation");
            Ok(TranslationOutcome::Created)
        }
        Some(existing) if existing.text == text => Ok(TranslationOutcome::Unchanged),
        Some(existing) if text.is_empty() => {
            conn.execute("DELETE FROM translations WHERE id = ?1", params![existing.id])?;
            debug!(segment_id, language, "cleared translation");
            Ok(TranslationOutcome::Cleared)
        }
        Some(existing) => {
            conn.execute(
                "UPDATE translations SET text = ?1, updated_at = ?2 WHERE id = ?3",
                params![text, now, existing.id],
            )?;
            debug!(segment_id, language, "updated translation");
            Ok(TranslationOutcome::Updated)
        }
    }
}

// -- submissions --------------------------------------------------------------

/// Queue a new revision of a resource for translation.
///
/// The segments are stored in the given order and the resource's current
/// revision moves to `revision_id`, which makes older submissions stale.
pub fn create_submission(
    conn: &Connection,
    resource_id: i64,
    revision_id: i64,
    segment_texts: &[&str],
) -> Result<ResourceSubmission, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO resource_submissions (resource_id, revision_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![resource_id, revision_id, now],
    )?;
    let id = conn.last_insert_rowid();

    let mut position = 0_i64;
    for text in segment_texts {
        let segment = get_or_create_segment(conn, text)?;
        let inserted = conn.execute(
            "INSERT INTO submission_segments (submission_id, segment_id, position)
             SELECT ?1, ?2, ?3
             WHERE NOT EXISTS (
                 SELECT 1 FROM submission_segments WHERE submission_id = ?1 AND segment_id = ?2
             )",
            params![id, segment.id, position],
        )?;
        position += inserted as i64;
    }

    let changed = conn.execute(
        "UPDATE resources SET current_revision_id = ?1 WHERE id = ?2",
        params![revision_id, resource_id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "resource".into(),
            id: resource_id.to_string(),
        });
    }

    debug!(id, resource_id, revision_id, "created submission");
    Ok(ResourceSubmission {
        id,
        resource_id,
        revision_id,
        created_at: now,
        pushed_at: None,
        push_log_id: None,
    })
}

/// The submission matching the resource's current revision, if any.
pub fn get_current_submission(
    conn: &Connection,
    resource_id: i64,
) -> Result<Option<ResourceSubmission>, DatabaseError> {
    let sql = format!(
        "SELECT s.{} FROM resource_submissions s
         JOIN resources r ON r.id = s.resource_id
         WHERE s.resource_id = ?1 AND s.revision_id = r.current_revision_id
         ORDER BY s.id DESC LIMIT 1",
        SUBMISSION_COLUMNS.replace(", ", ", s.")
    );
    Ok(conn
        .query_row(&sql, params![resource_id], submission_from_row)
        .optional()?)
}

/// Every non-stale submission with its resource, ordered by resource path.
pub fn list_current_submissions(
    conn: &Connection,
) -> Result<Vec<(ResourceSubmission, Resource)>, DatabaseError> {
    let sql = format!(
        "SELECT s.{}, r.{} FROM resource_submissions s
         JOIN resources r ON r.id = s.resource_id
         WHERE s.revision_id = r.current_revision_id
         ORDER BY r.path, s.id",
        SUBMISSION_COLUMNS.replace(", ", ", s."),
        RESOURCE_COLUMNS.replace(", ", ", r.")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let submission = submission_from_row(row)?;
            let resource = Resource {
                id: row.get(6)?,
                object_id: row.get(7)?,
                path: row.get(8)?,
                current_revision_id: row.get(9)?,
                parent_id: row.get(10)?,
            };
            Ok((submission, resource))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Source segments of a submission in file order.
pub fn list_submission_segments(
    conn: &Connection,
    submission_id: i64,
) -> Result<Vec<Segment>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.text FROM submission_segments ss
         JOIN segments g ON g.id = ss.segment_id
         WHERE ss.submission_id = ?1 ORDER BY ss.position",
    )?;
    let segments = stmt
        .query_map(params![submission_id], |row| {
            Ok(Segment {
                id: row.get(0)?,
                text: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(segments)
}

/// Number of a submission's segments with no translation in `language`.
pub fn count_untranslated_segments(
    conn: &Connection,
    submission_id: i64,
    language: &str,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM submission_segments ss
         LEFT JOIN translations t ON t.segment_id = ss.segment_id AND t.language = ?2
         WHERE ss.submission_id = ?1 AND t.id IS NULL",
        params![submission_id, language],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Of the given submissions, those that no push has recorded yet, as
/// `(submission id, resource id)` pairs in id order.
pub fn list_unpushed_submissions(
    conn: &Connection,
    submission_ids: &[i64],
) -> Result<Vec<(i64, i64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, resource_id FROM resource_submissions
         WHERE id = ?1 AND push_log_id IS NULL",
    )?;
    let mut unpushed = Vec::new();
    for id in submission_ids {
        if let Some(pair) = stmt
            .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?
        {
            unpushed.push(pair);
        }
    }
    unpushed.sort_unstable();
    Ok(unpushed)
}

/// Stamp submissions as pushed by `log_id`.
pub fn mark_submissions_pushed(
    conn: &Connection,
    submission_ids: &[i64],
    log_id: i64,
) -> Result<usize, DatabaseError> {
    let now = now_timestamp();
    let mut updated = 0;
    for id in submission_ids {
        updated += conn.execute(
            "UPDATE resource_submissions SET pushed_at = ?1, push_log_id = ?2
             WHERE id = ?3 AND push_log_id IS NULL",
            params![now, log_id, id],
        )?;
    }
    debug!(updated, log_id, "marked submissions pushed");
    Ok(updated)
}

// -- translated pages ---------------------------------------------------------

pub fn get_translated_page(
    conn: &Connection,
    resource_id: i64,
    language: &str,
) -> Result<Option<TranslatedPage>, DatabaseError> {
    let page = conn
        .query_row(
            "SELECT id, resource_id, language, submission_id, created_at, updated_at
             FROM translated_pages WHERE resource_id = ?1 AND language = ?2",
            params![resource_id, language],
            |row| {
                Ok(TranslatedPage {
                    id: row.get(0)?,
                    resource_id: row.get(1)?,
                    language: row.get(2)?,
                    submission_id: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(page)
}

/// Create or refresh the translated page of a resource. The flag is `true`
/// when the page did not exist before.
pub fn upsert_translated_page(
    conn: &Connection,
    resource_id: i64,
    language: &str,
    submission_id: i64,
) -> Result<(TranslatedPage, bool), DatabaseError> {
    let now = now_timestamp();
    let created = match get_translated_page(conn, resource_id, language)? {
        Some(existing) => {
            conn.execute(
                "UPDATE translated_pages SET submission_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![submission_id, now, existing.id],
            )?;
            false
        }
        None => {
            conn.execute(
                "INSERT INTO translated_pages
                 (resource_id, language, submission_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![resource_id, language, submission_id, now],
            )?;
            true
        }
    };
    let page = get_translated_page(conn, resource_id, language)?.ok_or_else(|| {
        DatabaseError::NotFound {
            entity: "translated_page".into(),
            id: format!("{resource_id}/{language}"),
        }
    })?;
    Ok((page, created))
}

// -- sync log -----------------------------------------------------------------

/// Commit id of the most recent log entry, pull or push, that has one.
pub fn last_synced_commit_id(conn: &Connection) -> Result<Option<String>, DatabaseError> {
    let commit_id = conn
        .query_row(
            "SELECT commit_id FROM sync_log WHERE commit_id != ''
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(commit_id)
}

pub fn insert_sync_log(
    conn: &Connection,
    action: SyncAction,
    commit_id: &str,
) -> Result<SyncLogEntry, DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO sync_log (action, commit_id, created_at) VALUES (?1, ?2, ?3)",
        params![action.as_str(), commit_id, now],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, %action, commit_id, "inserted sync_log entry");
    Ok(SyncLogEntry {
        id,
        action,
        commit_id: commit_id.to_string(),
        created_at: now,
    })
}

pub fn set_sync_log_commit(
    conn: &Connection,
    log_id: i64,
    commit_id: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE sync_log SET commit_id = ?1 WHERE id = ?2",
        params![commit_id, log_id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "sync_log".into(),
            id: log_id.to_string(),
        });
    }
    Ok(())
}

pub fn insert_sync_log_resource(
    conn: &Connection,
    log_id: i64,
    resource_id: i64,
    language: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO sync_log_resources (log_id, resource_id, language) VALUES (?1, ?2, ?3)",
        params![log_id, resource_id, language],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent log entries first.
pub fn list_sync_logs(conn: &Connection, limit: u32) -> Result<Vec<SyncLogEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, action, commit_id, created_at FROM sync_log
         ORDER BY created_at DESC, id DESC LIMIT ?1",
    )?;
    let entries = stmt
        .query_map(params![limit], sync_log_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn list_sync_log_resources(
    conn: &Connection,
    log_id: i64,
) -> Result<Vec<SyncLogResource>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, log_id, resource_id, language FROM sync_log_resources
         WHERE log_id = ?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![log_id], |row| {
            Ok(SyncLogResource {
                id: row.get(0)?,
                log_id: row.get(1)?,
                resource_id: row.get(2)?,
                language: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn count_sync_logs(conn: &Connection, action: SyncAction) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sync_log WHERE action = ?1",
        params![action.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Locking wrappers
// ---------------------------------------------------------------------------

impl Database {
    /// Bring the language table in line with the configuration.
    pub fn ensure_languages(&self, source: &str, targets: &[String]) -> Result<(), DatabaseError> {
        self.transaction(|conn| ensure_languages(conn, source, targets))
    }

    /// Register a resource (CMS side).
    pub fn insert_resource(
        &self,
        object_id: &str,
        path: &str,
        parent_id: Option<i64>,
    ) -> Result<Resource, DatabaseError> {
        insert_resource(&self.conn(), object_id, path, parent_id)
    }

    /// Queue a new revision of a resource (CMS side).
    pub fn create_submission(
        &self,
        resource_id: i64,
        revision_id: i64,
        segment_texts: &[&str],
    ) -> Result<ResourceSubmission, DatabaseError> {
        self.transaction(|conn| create_submission(conn, resource_id, revision_id, segment_texts))
    }

    pub fn list_resources(&self) -> Result<Vec<Resource>, DatabaseError> {
        list_resources(&self.conn())
    }

    pub fn list_current_submissions(
        &self,
    ) -> Result<Vec<(ResourceSubmission, Resource)>, DatabaseError> {
        list_current_submissions(&self.conn())
    }

    pub fn get_translation(
        &self,
        segment_text: &str,
        language: &str,
    ) -> Result<Option<Translation>, DatabaseError> {
        let conn = self.conn();
        match find_segment_by_text(&conn, segment_text)? {
            Some(segment) => get_translation(&conn, segment.id, language),
            None => Ok(None),
        }
    }

    pub fn get_translated_page(
        &self,
        resource_id: i64,
        language: &str,
    ) -> Result<Option<TranslatedPage>, DatabaseError> {
        get_translated_page(&self.conn(), resource_id, language)
    }

    pub fn last_synced_commit_id(&self) -> Result<Option<String>, DatabaseError> {
        last_synced_commit_id(&self.conn())
    }

    pub fn list_sync_logs(&self, limit: u32) -> Result<Vec<SyncLogEntry>, DatabaseError> {
        list_sync_logs(&self.conn(), limit)
    }

    pub fn list_sync_log_resources(
        &self,
        log_id: i64,
    ) -> Result<Vec<SyncLogResource>, DatabaseError> {
        list_sync_log_resources(&self.conn(), log_id)
    }

    pub fn count_sync_logs(&self, action: SyncAction) -> Result<i64, DatabaseError> {
        count_sync_logs(&self.conn(), action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.ensure_languages("en", &["fr".to_string(), "de".to_string()])
            .unwrap();
        db
    }

    #[test]
    fn test_ensure_languages_deactivates_removed_targets() {
        let db = test_db();
        db.ensure_languages("en", &["fr".to_string()]).unwrap();

        let conn = db.conn();
        let targets = list_target_languages(&conn).unwrap();
        let codes: Vec<_> = targets.iter().map(|l| l.code.as_str()).collect();
        assert_eq!(codes, vec!["fr"]);

        let de = get_language(&conn, "de").unwrap().unwrap();
        assert!(!de.is_active);
        let en = get_language(&conn, "en").unwrap().unwrap();
        assert!(en.is_default);
    }

    #[test]
    fn test_save_translation_outcomes() {
        let db = test_db();
        let conn = db.conn();
        let segment = get_or_create_segment(&conn, "Hello").unwrap();

        assert_eq!(
            save_translation(&conn, segment.id, "fr", "Bonjour").unwrap(),
            TranslationOutcome::Created
        );
        let first = get_translation(&conn, segment.id, "fr").unwrap().unwrap();

        assert_eq!(
            save_translation(&conn, segment.id, "fr", "Bonjour").unwrap(),
            TranslationOutcome::Unchanged
        );
        let same = get_translation(&conn, segment.id, "fr").unwrap().unwrap();
        assert_eq!(first.updated_at, same.updated_at);

        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(
            save_translation(&conn, segment.id, "fr", "Salut").unwrap(),
            TranslationOutcome::Updated
        );
        let changed = get_translation(&conn, segment.id, "fr").unwrap().unwrap();
        assert_eq!(changed.text, "Salut");
        assert!(changed.updated_at > first.updated_at);
    }

    #[test]
    fn test_empty_text_clears_translation() {
        let db = test_db();
        let conn = db.conn();
        let segment = get_or_create_segment(&conn, "Hello").unwrap();

        assert_eq!(
            save_translation(&conn, segment.id, "fr", "").unwrap(),
            TranslationOutcome::Unchanged
        );
        assert!(get_translation(&conn, segment.id, "fr").unwrap().is_none());

        save_translation(&conn, segment.id, "fr", "Bonjour").unwrap();
        assert_eq!(
            save_translation(&conn, segment.id, "fr", "").unwrap(),
            TranslationOutcome::Cleared
        );
        assert!(get_translation(&conn, segment.id, "fr").unwrap().is_none());
    }

    #[test]
    fn test_current_submissions_skip_stale_revisions() {
        let db = test_db();
        let about = db.insert_resource("page:2", "pages/about", None).unwrap();
        let home = db.insert_resource("page:1", "pages/home", None).unwrap();

        db.create_submission(home.id, 1, &["Welcome"]).unwrap();
        db.create_submission(about.id, 5, &["About us"]).unwrap();
        let current = db.create_submission(about.id, 6, &["About us", "Team"]).unwrap();

        let rows = db.list_current_submissions().unwrap();
        let paths: Vec<_> = rows.iter().map(|(_, r)| r.path.as_str()).collect();
        assert_eq!(paths, vec!["pages/about", "pages/home"]);
        assert_eq!(rows[0].0.id, current.id);

        let conn = db.conn();
        let texts: Vec<_> = list_submission_segments(&conn, current.id)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(texts, vec!["About us", "Team"]);
    }

    #[test]
    fn test_untranslated_segment_count() {
        let db = test_db();
        let page = db.insert_resource("page:1", "pages/home", None).unwrap();
        let submission = db.create_submission(page.id, 1, &["One", "Two"]).unwrap();

        let conn = db.conn();
        assert_eq!(count_untranslated_segments(&conn, submission.id, "fr").unwrap(), 2);
        let one = find_segment_by_text(&conn, "One").unwrap().unwrap();
        save_translation(&conn, one.id, "fr", "Un").unwrap();
        assert_eq!(count_untranslated_segments(&conn, submission.id, "fr").unwrap(), 1);
    }

    #[test]
    fn test_watermark_skips_empty_commit_ids() {
        let db = test_db();
        let conn = db.conn();
        assert_eq!(last_synced_commit_id(&conn).unwrap(), None);

        insert_sync_log(&conn, SyncAction::Pull, "abc123").unwrap();
        insert_sync_log(&conn, SyncAction::Push, "").unwrap();
        assert_eq!(last_synced_commit_id(&conn).unwrap().as_deref(), Some("abc123"));

        let push = insert_sync_log(&conn, SyncAction::Push, "").unwrap();
        set_sync_log_commit(&conn, push.id, "def456").unwrap();
        assert_eq!(last_synced_commit_id(&conn).unwrap().as_deref(), Some("def456"));
    }

    #[test]
    fn test_mark_submissions_pushed_only_once() {
        let db = test_db();
        let page = db.insert_resource("page:1", "pages/home", None).unwrap();
        let submission = db.create_submission(page.id, 1, &["Welcome"]).unwrap();

        let conn = db.conn();
        let log = insert_sync_log(&conn, SyncAction::Push, "").unwrap();
        assert_eq!(
            list_unpushed_submissions(&conn, &[submission.id]).unwrap(),
            vec![(submission.id, page.id)]
        );
        assert_eq!(mark_submissions_pushed(&conn, &[submission.id], log.id).unwrap(), 1);
        assert_eq!(mark_submissions_pushed(&conn, &[submission.id], log.id).unwrap(), 0);
        assert!(list_unpushed_submissions(&conn, &[submission.id])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_upsert_translated_page_reports_creation() {
        let db = test_db();
        let page = db.insert_resource("page:1", "pages/home", None).unwrap();
        let submission = db.create_submission(page.id, 1, &["Welcome"]).unwrap();

        let conn = db.conn();
        let (_, created) = upsert_translated_page(&conn, page.id, "fr", submission.id).unwrap();
        assert!(created);
        let (stored, created) = upsert_translated_page(&conn, page.id, "fr", submission.id).unwrap();
        assert!(!created);
        assert_eq!(stored.submission_id, submission.id);
    }
}
