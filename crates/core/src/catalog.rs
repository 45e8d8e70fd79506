//! Resource catalog: the CMS-side view the sync reconcilers work against.
//!
//! [`FileLayout`] maps resources to file paths inside the repository, and
//! [`ResourceCatalog`] answers the questions the reconcilers ask about
//! resources, submissions and translated pages. [`SqliteCatalog`] is the
//! implementation backed by the gitlocalize database.

use rusqlite::Connection;
use tracing::debug;

use crate::config::SyncConfig;
use crate::db::queries;
use crate::errors::CatalogError;
use crate::models::{Language, Resource, ResourceSubmission, TranslatedPage};
use crate::po::{PoEntry, PoFile};

/// Placeholder substituted with a language tag in path templates.
pub const LOCALE_PLACEHOLDER: &str = "{locale}";

// ---------------------------------------------------------------------------
// File layout
// ---------------------------------------------------------------------------

/// Where each resource's files live in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    pub templates_dir: String,
    pub locales_dir: String,
    pub config_file: String,
}

impl Default for FileLayout {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl FileLayout {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            templates_dir: trim_dir(&config.templates_dir),
            locales_dir: trim_dir(&config.locales_dir),
            config_file: config.config_file.clone(),
        }
    }

    /// `templates/{path}.pot`
    pub fn source_path(&self, resource_path: &str) -> String {
        format!("{}/{}.pot", self.templates_dir, resource_path)
    }

    /// `locales/{lang}/{path}.po`
    pub fn language_path(&self, resource_path: &str, language: &str) -> String {
        format!("{}/{}/{}.po", self.locales_dir, language, resource_path)
    }

    /// `locales/{locale}/{path}.po`, as written to the project manifest.
    pub fn language_path_template(&self, resource_path: &str) -> String {
        self.language_path(resource_path, LOCALE_PLACEHOLDER)
    }

    /// Split a translation file path into `(language, resource path)`.
    pub fn parse_language_path<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = path
            .strip_prefix(self.locales_dir.as_str())?
            .strip_prefix('/')?
            .strip_suffix(".po")?;
        let (language, resource_path) = rest.split_once('/')?;
        if language.is_empty() || resource_path.is_empty() {
            return None;
        }
        Some((language, resource_path))
    }

    /// Whether `path` is a per-language translation file.
    pub fn is_translation_file(&self, path: &str) -> bool {
        self.parse_language_path(path).is_some()
    }

    /// Whether a push regenerates `path`. Everything else in the tree is
    /// carried over untouched.
    pub fn is_managed(&self, path: &str) -> bool {
        path == self.config_file
            || is_under(path, &self.templates_dir)
            || is_under(path, &self.locales_dir)
    }
}

fn trim_dir(dir: &str) -> String {
    dir.trim_matches('/').to_string()
}

fn is_under(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Catalog trait
// ---------------------------------------------------------------------------

/// Catalog operations used by the pull and push reconcilers.
///
/// Every method runs on the caller's connection so that the reconcilers
/// control transaction boundaries.
pub trait ResourceCatalog: Send + Sync {
    fn layout(&self) -> &FileLayout;

    /// Resolve a translation file path to its resource and language.
    ///
    /// Fails with [`CatalogError::UnrecognizedFile`] when the path does not
    /// follow the layout, names an inactive or source language, or names a
    /// resource that does not exist.
    fn get_by_filename(
        &self,
        conn: &Connection,
        path: &str,
    ) -> Result<(Resource, Language), CatalogError>;

    /// The resource's current submission, if every one of its segments is
    /// translated into `language`.
    fn find_translatable_submission(
        &self,
        conn: &Connection,
        resource: &Resource,
        language: &Language,
    ) -> Result<Option<ResourceSubmission>, CatalogError>;

    /// Materialize the translated page. The flag is `true` when the page was
    /// newly created.
    ///
    /// Fails with [`CatalogError::ParentNotTranslated`] when the resource
    /// has a parent without a translated page in `language`.
    fn create_or_update_translated_page(
        &self,
        conn: &Connection,
        resource: &Resource,
        submission: &ResourceSubmission,
        language: &Language,
    ) -> Result<(TranslatedPage, bool), CatalogError>;

    fn children(&self, conn: &Connection, resource: &Resource)
        -> Result<Vec<Resource>, CatalogError>;

    /// Active target languages.
    fn target_languages(&self, conn: &Connection) -> Result<Vec<Language>, CatalogError>;

    /// Non-stale submissions with their resources, in path order.
    fn current_submissions(
        &self,
        conn: &Connection,
    ) -> Result<Vec<(ResourceSubmission, Resource)>, CatalogError>;

    /// Source template for a submission: every segment, empty msgstr.
    fn generate_source_file(
        &self,
        conn: &Connection,
        resource: &Resource,
        submission: &ResourceSubmission,
    ) -> Result<PoFile, CatalogError>;

    /// Language file for a submission: every segment with its stored
    /// translation, or an empty msgstr.
    fn generate_language_file(
        &self,
        conn: &Connection,
        resource: &Resource,
        submission: &ResourceSubmission,
        language: &Language,
    ) -> Result<PoFile, CatalogError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// [`ResourceCatalog`] over the gitlocalize database.
#[derive(Debug, Clone, Default)]
pub struct SqliteCatalog {
    layout: FileLayout,
}

impl SqliteCatalog {
    pub fn new(layout: FileLayout) -> Self {
        Self { layout }
    }

    fn base_file(language: Option<&str>) -> PoFile {
        let mut po = PoFile::new();
        po.set_metadata("MIME-Version", "1.0");
        po.set_metadata("Content-Type", "text/plain; charset=utf-8");
        po.set_metadata("Content-Transfer-Encoding", "8bit");
        if let Some(language) = language {
            po.set_metadata("Language", language);
        }
        po
    }
}

impl ResourceCatalog for SqliteCatalog {
    fn layout(&self) -> &FileLayout {
        &self.layout
    }

    fn get_by_filename(
        &self,
        conn: &Connection,
        path: &str,
    ) -> Result<(Resource, Language), CatalogError> {
        let unrecognized = || CatalogError::UnrecognizedFile(path.to_string());

        let (code, resource_path) = self
            .layout
            .parse_language_path(path)
            .ok_or_else(unrecognized)?;

        let language = queries::get_language(conn, code)?
            .filter(|l| l.is_active && !l.is_default)
            .ok_or_else(unrecognized)?;
        let resource = queries::get_resource_by_path(conn, resource_path)?
            .ok_or_else(unrecognized)?;

        Ok((resource, language))
    }

    fn find_translatable_submission(
        &self,
        conn: &Connection,
        resource: &Resource,
        language: &Language,
    ) -> Result<Option<ResourceSubmission>, CatalogError> {
        let Some(submission) = queries::get_current_submission(conn, resource.id)? else {
            return Ok(None);
        };
        let missing = queries::count_untranslated_segments(conn, submission.id, &language.code)?;
        if missing > 0 {
            debug!(
                resource = %resource.path,
                language = %language.code,
                missing,
                "submission not fully translated"
            );
            return Ok(None);
        }
        Ok(Some(submission))
    }

    fn create_or_update_translated_page(
        &self,
        conn: &Connection,
        resource: &Resource,
        submission: &ResourceSubmission,
        language: &Language,
    ) -> Result<(TranslatedPage, bool), CatalogError> {
        if let Some(parent_id) = resource.parent_id {
            if queries::get_translated_page(conn, parent_id, &language.code)?.is_none() {
                return Err(CatalogError::ParentNotTranslated {
                    resource: resource.path.clone(),
                    language: language.code.clone(),
                });
            }
        }
        Ok(queries::upsert_translated_page(
            conn,
            resource.id,
            &language.code,
            submission.id,
        )?)
    }

    fn children(
        &self,
        conn: &Connection,
        resource: &Resource,
    ) -> Result<Vec<Resource>, CatalogError> {
        Ok(queries::list_child_resources(conn, resource.id)?)
    }

    fn target_languages(&self, conn: &Connection) -> Result<Vec<Language>, CatalogError> {
        Ok(queries::list_target_languages(conn)?)
    }

    fn current_submissions(
        &self,
        conn: &Connection,
    ) -> Result<Vec<(ResourceSubmission, Resource)>, CatalogError> {
        Ok(queries::list_current_submissions(conn)?)
    }

    fn generate_source_file(
        &self,
        conn: &Connection,
        _resource: &Resource,
        submission: &ResourceSubmission,
    ) -> Result<PoFile, CatalogError> {
        let mut po = Self::base_file(None);
        for segment in queries::list_submission_segments(conn, submission.id)? {
            po.entries.push(PoEntry::new(segment.text, ""));
        }
        Ok(po)
    }

    fn generate_language_file(
        &self,
        conn: &Connection,
        _resource: &Resource,
        submission: &ResourceSubmission,
        language: &Language,
    ) -> Result<PoFile, CatalogError> {
        let mut po = Self::base_file(Some(&language.code));
        for segment in queries::list_submission_segments(conn, submission.id)? {
            let msgstr = queries::get_translation(conn, segment.id, &language.code)?
                .map(|t| t.text)
                .unwrap_or_default();
            po.entries.push(PoEntry::new(segment.text, msgstr));
        }
        Ok(po)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> (Database, SqliteCatalog) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.ensure_languages("en", &["fr".to_string(), "de".to_string()])
            .unwrap();
        (db, SqliteCatalog::default())
    }

    fn language(code: &str) -> Language {
        Language {
            code: code.into(),
            is_active: true,
            is_default: false,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = FileLayout::default();
        assert_eq!(layout.source_path("pages/about"), "templates/pages/about.pot");
        assert_eq!(layout.language_path("about", "fr"), "locales/fr/about.po");
        assert_eq!(
            layout.language_path_template("about"),
            "locales/{locale}/about.po"
        );
        assert_eq!(
            layout.parse_language_path("locales/pt-BR/pages/about.po"),
            Some(("pt-BR", "pages/about"))
        );
        assert_eq!(layout.parse_language_path("locales/fr.po"), None);
        assert_eq!(layout.parse_language_path("locales/fr/about.pot"), None);
        assert_eq!(layout.parse_language_path("localesx/fr/about.po"), None);
    }

    #[test]
    fn test_layout_managed_paths() {
        let layout = FileLayout::from_config(&SyncConfig {
            templates_dir: "/tpl/".into(),
            ..SyncConfig::default()
        });
        assert!(layout.is_managed("tpl/home.pot"));
        assert!(layout.is_managed("locales/fr/home.po"));
        assert!(layout.is_managed("l10n.toml"));
        assert!(!layout.is_managed("README.md"));
        assert!(!layout.is_managed("tplx/home.pot"));
    }

    #[test]
    fn test_get_by_filename() {
        let (db, catalog) = setup();
        let about = db.insert_resource("page:2", "about", None).unwrap();
        let conn = db.conn();

        let (resource, lang) = catalog
            .get_by_filename(&conn, "locales/fr/about.po")
            .unwrap();
        assert_eq!(resource.id, about.id);
        assert_eq!(lang.code, "fr");

        for path in [
            "locales/fr/missing.po",
            "locales/es/about.po",
            "locales/en/about.po",
            "docs/about.po",
        ] {
            assert!(
                matches!(
                    catalog.get_by_filename(&conn, path),
                    Err(CatalogError::UnrecognizedFile(p)) if p == path
                ),
                "{path} should be unrecognized"
            );
        }
    }

    #[test]
    fn test_translatable_submission_requires_every_segment() {
        let (db, catalog) = setup();
        let page = db.insert_resource("page:1", "home", None).unwrap();
        let submission = db.create_submission(page.id, 1, &["One", "Two"]).unwrap();
        let page = queries::get_resource(&db.conn(), page.id).unwrap().unwrap();
        let fr = language("fr");

        let conn = db.conn();
        assert!(catalog
            .find_translatable_submission(&conn, &page, &fr)
            .unwrap()
            .is_none());

        for (text, translated) in [("One", "Un"), ("Two", "Deux")] {
            let segment = queries::find_segment_by_text(&conn, text).unwrap().unwrap();
            queries::save_translation(&conn, segment.id, "fr", translated).unwrap();
        }
        let found = catalog
            .find_translatable_submission(&conn, &page, &fr)
            .unwrap()
            .unwrap();
        assert_eq!(found.id, submission.id);
    }

    #[test]
    fn test_child_page_blocked_until_parent_translated() {
        let (db, catalog) = setup();
        let parent = db.insert_resource("page:1", "home", None).unwrap();
        let child = db
            .insert_resource("page:2", "home/child", Some(parent.id))
            .unwrap();
        let parent_sub = db.create_submission(parent.id, 1, &["Home"]).unwrap();
        let child_sub = db.create_submission(child.id, 1, &["Child"]).unwrap();
        let fr = language("fr");
        let conn = db.conn();

        let err = catalog
            .create_or_update_translated_page(&conn, &child, &child_sub, &fr)
            .unwrap_err();
        assert!(matches!(err, CatalogError::ParentNotTranslated { .. }));

        let (_, created) = catalog
            .create_or_update_translated_page(&conn, &parent, &parent_sub, &fr)
            .unwrap();
        assert!(created);
        let (_, created) = catalog
            .create_or_update_translated_page(&conn, &child, &child_sub, &fr)
            .unwrap();
        assert!(created);

        let children = catalog.children(&conn, &parent).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[test]
    fn test_generated_files() {
        let (db, catalog) = setup();
        let page = db.insert_resource("page:1", "home", None).unwrap();
        let submission = db.create_submission(page.id, 1, &["Hello", "World"]).unwrap();
        let conn = db.conn();
        let hello = queries::find_segment_by_text(&conn, "Hello").unwrap().unwrap();
        queries::save_translation(&conn, hello.id, "fr", "Bonjour").unwrap();

        let source = catalog
            .generate_source_file(&conn, &page, &submission)
            .unwrap();
        assert_eq!(source.metadata_value("Language"), None);
        let keys: Vec<_> = source.entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![("Hello", ""), ("World", "")]);

        let fr = catalog
            .generate_language_file(&conn, &page, &submission, &language("fr"))
            .unwrap();
        assert_eq!(fr.metadata_value("Language"), Some("fr"));
        let keys: Vec<_> = fr.entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![("Hello", "Bonjour"), ("World", "")]);
    }
}
