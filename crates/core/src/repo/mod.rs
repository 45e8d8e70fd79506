//! Repository adapter: the git side of the sync.
//!
//! The reconcilers only see the [`Repository`] trait. [`TreeReader`] is an
//! immutable snapshot of the head tree and [`TreeWriter`] stages the next
//! tree in memory before it is committed.

pub mod git;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::errors::GitError;

pub use git::{GitRepository, GitRepositorySource};

/// A file whose content differs between two commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    /// Empty when the file was added.
    pub old_content: Vec<u8>,
    pub new_content: Vec<u8>,
}

/// Operations the sync needs from a version-controlled working copy.
pub trait Repository {
    /// Bring the local branch up to date with the remote.
    fn pull(&mut self) -> Result<(), GitError>;

    /// Publish the local branch to the remote.
    fn push(&mut self) -> Result<(), GitError>;

    /// Head commit id, or `None` for a repository without commits.
    fn head_commit_id(&self) -> Result<Option<String>, GitError>;

    /// Files added or modified between `from` and `to`. With no `from`,
    /// every file in `to` counts as added. Deleted files are not reported.
    fn changed_files(&self, from: Option<&str>, to: &str) -> Result<Vec<ChangedFile>, GitError>;

    /// Snapshot of the head tree.
    fn reader(&self) -> Result<TreeReader, GitError>;

    /// Commit `files` as the complete new tree on top of head and return
    /// the new commit id.
    fn commit_tree(
        &mut self,
        files: &BTreeMap<String, Vec<u8>>,
        message: &str,
    ) -> Result<String, GitError>;
}

/// Opens a fresh [`Repository`] handle for each sync cycle.
pub trait RepositorySource: Send + Sync {
    fn open(&self) -> Result<Box<dyn Repository>, GitError>;
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Read-only snapshot of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeReader {
    files: BTreeMap<String, Vec<u8>>,
}

impl TreeReader {
    pub fn new(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    pub fn read_file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ProjectManifest<'a> {
    basepath: &'a str,
    locales: &'a [String],
    paths: Vec<ManifestPath<'a>>,
}

#[derive(Serialize)]
struct ManifestPath<'a> {
    reference: &'a str,
    l10n: &'a str,
}

/// In-memory staging area for the next tree.
///
/// The writer starts empty and remembers the tree it was created from, so
/// [`has_changes`](Self::has_changes) can tell whether committing would
/// produce a different tree.
#[derive(Debug, Clone)]
pub struct TreeWriter {
    base: TreeReader,
    files: BTreeMap<String, Vec<u8>>,
}

impl TreeWriter {
    pub fn new(base: &TreeReader) -> Self {
        Self {
            base: base.clone(),
            files: BTreeMap::new(),
        }
    }

    pub fn read_file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn write_file(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), content.into());
    }

    /// Carry over every base file for which `is_managed` is false.
    pub fn copy_unmanaged_files(&mut self, is_managed: impl Fn(&str) -> bool) -> usize {
        let mut copied = 0;
        for (path, content) in &self.base.files {
            if !is_managed(path) {
                self.files.insert(path.clone(), content.clone());
                copied += 1;
            }
        }
        debug!(copied, "copied unmanaged files");
        copied
    }

    /// Write the project manifest listing the target languages and each
    /// `(source path, language path template)` pair.
    pub fn write_config(
        &mut self,
        file_name: &str,
        languages: &[String],
        paths: &[(String, String)],
    ) -> Result<(), GitError> {
        let manifest = ProjectManifest {
            basepath: ".",
            locales: languages,
            paths: paths
                .iter()
                .map(|(reference, l10n)| ManifestPath { reference, l10n })
                .collect(),
        };
        let content =
            toml::to_string(&manifest).map_err(|e| GitError::InvalidManifest(e.to_string()))?;
        self.write_file(file_name, content);
        Ok(())
    }

    /// Whether the staged tree differs from the base tree.
    pub fn has_changes(&self) -> bool {
        self.files != self.base.files
    }

    pub fn commit(&self, repo: &mut dyn Repository, message: &str) -> Result<String, GitError> {
        repo.commit_tree(&self.files, message)
    }
}
