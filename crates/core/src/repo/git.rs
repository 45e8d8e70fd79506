//! [`Repository`] implementation over a local `git2` working copy.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use git2::{
    Cred, ErrorCode, FetchOptions, FileFavor, Index, IndexEntry, IndexTime, MergeOptions,
    ObjectType, Oid, PushOptions, RemoteCallbacks, Signature, TreeWalkMode, TreeWalkResult,
};
use tracing::{debug, info, instrument, warn};

use super::{ChangedFile, Repository, RepositorySource, TreeReader};
use crate::config::RepositoryConfig;
use crate::errors::GitError;

/// Regular non-executable file mode.
const BLOB_MODE: u32 = 0o100644;

/// Working copy of the translation repository.
pub struct GitRepository {
    repo: git2::Repository,
    remote: String,
    branch: String,
    token: Option<String>,
    author_name: String,
    author_email: String,
}

fn remote_callbacks<'a>(token: Option<&str>) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(tok) = token {
        let tok = tok.to_string();
        callbacks.credentials(move |_url, _username, _allowed| {
            Cred::userpass_plaintext("x-access-token", &tok)
        });
    }
    callbacks
}

fn is_missing(err: &git2::Error) -> bool {
    matches!(err.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch)
}

impl GitRepository {
    /// Open an existing working copy.
    pub fn open(config: &RepositoryConfig) -> Result<Self, GitError> {
        let path = config.path.as_path();
        info!(path = %path.display(), "opening git repository");
        let repo = git2::Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self::with_repo(repo, config))
    }

    /// Clone `url` into the configured path.
    #[instrument(skip(config), fields(url = %url, path = %config.path.display()))]
    pub fn clone_repo(url: &str, config: &RepositoryConfig) -> Result<Self, GitError> {
        info!("cloning git repository");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(config.token.as_deref()));
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        let repo = builder.clone(url, &config.path)?;
        info!("clone completed");
        Ok(Self::with_repo(repo, config))
    }

    fn with_repo(repo: git2::Repository, config: &RepositoryConfig) -> Self {
        Self {
            repo,
            remote: config.remote.clone(),
            branch: config.branch.clone(),
            token: config.token.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
        }
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn head_commit(&self) -> Result<Option<git2::Commit<'_>>, GitError> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch(&self) -> Result<(), GitError> {
        info!(remote = %self.remote, "fetching");
        let mut remote = self.repo.find_remote(&self.remote)?;
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks(self.token.as_deref()));
        remote.fetch(&[] as &[&str], Some(&mut fetch_opts), None)?;
        debug!("fetch completed");
        Ok(())
    }

    fn commit_tree_of(&self, sha: &str) -> Result<git2::Tree<'_>, GitError> {
        let missing = || GitError::RefNotFound(sha.to_string());
        let oid = Oid::from_str(sha).map_err(|_| missing())?;
        let commit = self.repo.find_commit(oid).map_err(|_| missing())?;
        Ok(commit.tree()?)
    }

    fn blob_content(&self, oid: Oid) -> Result<Vec<u8>, GitError> {
        if oid.is_zero() {
            return Ok(Vec::new());
        }
        Ok(self.repo.find_blob(oid)?.content().to_vec())
    }

    fn signature(&self) -> Result<Signature<'static>, GitError> {
        Ok(Signature::now(&self.author_name, &self.author_email)?)
    }

    /// Point the branch at `oid` and check it out.
    fn move_branch(&self, oid: Oid, reflog: &str) -> Result<(), GitError> {
        self.repo.reference(&self.branch_ref(), oid, true, reflog)?;
        self.repo.set_head(&self.branch_ref())?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        Ok(())
    }

    /// Merge unpublished local commits with the fetched head and push the
    /// result. Overlapping hunks take the remote side. When the histories
    /// still conflict (a file deleted on one side and edited on the other),
    /// the local commits are dropped and the branch is reset to the remote.
    fn merge_diverged(&mut self, local_id: Oid, fetched_id: Oid) -> Result<(), GitError> {
        warn!(local = %local_id, remote = %fetched_id, "local and remote history diverged");

        let merged = {
            let local = self.repo.find_commit(local_id)?;
            let fetched = self.repo.find_commit(fetched_id)?;
            let mut opts = MergeOptions::new();
            opts.file_favor(FileFavor::Theirs);
            let mut index = self.repo.merge_commits(&local, &fetched, Some(&opts))?;
            if index.has_conflicts() {
                None
            } else {
                let tree = self.repo.find_tree(index.write_tree_to(&self.repo)?)?;
                let signature = self.signature()?;
                let message = format!(
                    "Merge {}/{} into {}",
                    self.remote, self.branch, self.branch
                );
                Some(self.repo.commit(
                    None,
                    &signature,
                    &signature,
                    &message,
                    &tree,
                    &[&local, &fetched],
                )?)
            }
        };

        match merged {
            Some(merge_id) => {
                self.move_branch(merge_id, "gitlocalize: merge diverged history")?;
                info!(sha = %merge_id, "merged local commits with remote");
                self.push()
            }
            None => {
                warn!("merge left conflicts, discarding local commits");
                self.move_branch(fetched_id, "gitlocalize: reset to remote")?;
                Ok(())
            }
        }
    }

    fn tree_files(&self, tree: &git2::Tree<'_>) -> Result<BTreeMap<String, Vec<u8>>, GitError> {
        let mut blobs = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    blobs.push((format!("{root}{name}"), entry.id()));
                }
            }
            TreeWalkResult::Ok
        })?;

        let mut files = BTreeMap::new();
        for (path, oid) in blobs {
            files.insert(path, self.blob_content(oid)?);
        }
        Ok(files)
    }
}

impl Repository for GitRepository {
    /// Fetch and bring the configured branch up to the remote.
    ///
    /// Local commits the remote never received (a push that lost a race
    /// with another writer) are merged with the fetched head and published
    /// again, so the next cycle starts from a shared history.
    #[instrument(skip(self), fields(branch = %self.branch))]
    fn pull(&mut self) -> Result<(), GitError> {
        self.fetch()?;

        let remote_ref = format!("refs/remotes/{}/{}", self.remote, self.branch);
        let fetched_id = match self.repo.find_reference(&remote_ref) {
            Ok(reference) => reference.peel_to_commit()?.id(),
            Err(e) if is_missing(&e) => {
                debug!(remote_ref, "remote branch does not exist yet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let local_id = self.head_commit()?.map(|c| c.id());
        if let Some(local_id) = local_id {
            if local_id == fetched_id || self.repo.graph_descendant_of(local_id, fetched_id)? {
                debug!("already up to date");
                return Ok(());
            }
            if !self.repo.graph_descendant_of(fetched_id, local_id)? {
                return self.merge_diverged(local_id, fetched_id);
            }
        }

        self.move_branch(fetched_id, "gitlocalize: fast-forward pull")?;
        info!(sha = %fetched_id, "pull completed");
        Ok(())
    }

    #[instrument(skip(self), fields(branch = %self.branch))]
    fn push(&mut self) -> Result<(), GitError> {
        if self.head_commit()?.is_none() {
            debug!("nothing to push from an empty repository");
            return Ok(());
        }

        info!(remote = %self.remote, "pushing");
        let mut remote = self.repo.find_remote(&self.remote)?;
        let mut callbacks = remote_callbacks(self.token.as_deref());
        let push_error = Arc::new(Mutex::new(None::<String>));
        let push_error_clone = push_error.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(msg) = status {
                warn!(refname, msg, "push rejected");
                if let Ok(mut slot) = push_error_clone.lock() {
                    *slot = Some(msg.to_string());
                }
            }
            Ok(())
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);
        let refspec = format!("{0}:{0}", self.branch_ref());
        remote.push(&[&refspec], Some(&mut push_opts))?;

        let rejected = push_error.lock().ok().and_then(|mut slot| slot.take());
        if let Some(detail) = rejected {
            return Err(GitError::PushRejected {
                branch: self.branch.clone(),
                detail,
            });
        }
        info!("push completed");
        Ok(())
    }

    fn head_commit_id(&self) -> Result<Option<String>, GitError> {
        Ok(self.head_commit()?.map(|c| c.id().to_string()))
    }

    fn changed_files(&self, from: Option<&str>, to: &str) -> Result<Vec<ChangedFile>, GitError> {
        let old_tree = from.map(|sha| self.commit_tree_of(sha)).transpose()?;
        let new_tree = self.commit_tree_of(to)?;

        let diff = self
            .repo
            .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;

        let mut changed = Vec::new();
        for delta in diff.deltas() {
            if delta.status() == git2::Delta::Deleted {
                continue;
            }
            let path = delta
                .new_file()
                .path()
                .and_then(Path::to_str)
                .ok_or_else(|| GitError::InvalidPath(format!("{:?}", delta.new_file().path())))?;
            changed.push(ChangedFile {
                path: path.to_string(),
                old_content: self.blob_content(delta.old_file().id())?,
                new_content: self.blob_content(delta.new_file().id())?,
            });
        }
        debug!(
            from = from.unwrap_or("<root>"),
            to,
            count = changed.len(),
            "collected changed files"
        );
        Ok(changed)
    }

    fn reader(&self) -> Result<TreeReader, GitError> {
        match self.head_commit()? {
            Some(commit) => Ok(TreeReader::new(self.tree_files(&commit.tree()?)?)),
            None => Ok(TreeReader::default()),
        }
    }

    /// Build the tree in a detached index so nothing in the working copy
    /// is staged by accident, then commit it on the branch.
    #[instrument(skip(self, files, message), fields(files = files.len()))]
    fn commit_tree(
        &mut self,
        files: &BTreeMap<String, Vec<u8>>,
        message: &str,
    ) -> Result<String, GitError> {
        let mut index = Index::new()?;
        for (path, content) in files {
            let file_size = u32::try_from(content.len())
                .map_err(|_| GitError::InvalidPath(path.clone()))?;
            let entry = IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode: BLOB_MODE,
                uid: 0,
                gid: 0,
                file_size,
                id: self.repo.blob(content)?,
                flags: 0,
                flags_extended: 0,
                path: path.as_bytes().to_vec(),
            };
            index.add(&entry)?;
        }
        let tree_oid = index.write_tree_to(&self.repo)?;
        let tree = self.repo.find_tree(tree_oid)?;

        let signature = self.signature()?;
        let parent = self.head_commit()?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = self.repo.commit(
            Some(&self.branch_ref()),
            &signature,
            &signature,
            message,
            &tree,
            &parents,
        )?;

        self.repo.set_head(&self.branch_ref())?;
        self.repo
            .checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        info!(sha = %oid, "created commit");
        Ok(oid.to_string())
    }
}

/// Opens [`GitRepository`] handles from configuration, cloning on first use.
#[derive(Debug, Clone)]
pub struct GitRepositorySource {
    config: RepositoryConfig,
}

impl GitRepositorySource {
    pub fn new(config: RepositoryConfig) -> Self {
        Self { config }
    }
}

impl RepositorySource for GitRepositorySource {
    fn open(&self) -> Result<Box<dyn Repository>, GitError> {
        if self.config.path.join(".git").exists() || self.config.path.join("HEAD").exists() {
            return Ok(Box::new(GitRepository::open(&self.config)?));
        }
        match &self.config.url {
            Some(url) => Ok(Box::new(GitRepository::clone_repo(url, &self.config)?)),
            None => Err(GitError::RepositoryNotFound(
                self.config.path.display().to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) -> RepositoryConfig {
        let mut opts = git2::RepositoryInitOptions::new();
        opts.initial_head("main");
        git2::Repository::init_opts(dir, &opts).unwrap();
        RepositoryConfig {
            path: dir.to_path_buf(),
            url: None,
            remote: "origin".into(),
            branch: "main".into(),
            token_env: None,
            author_name: "Test".into(),
            author_email: "test@test.com".into(),
            token: None,
        }
    }

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_empty_repository() {
        let dir = tempfile::tempdir().unwrap();
        let config = init_repo(dir.path());
        let repo = GitRepository::open(&config).unwrap();
        assert_eq!(repo.head_commit_id().unwrap(), None);
        assert!(repo.reader().unwrap().is_empty());
    }

    #[test]
    fn test_commit_tree_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = init_repo(dir.path());
        let mut repo = GitRepository::open(&config).unwrap();

        let sha = repo
            .commit_tree(
                &files(&[("README.md", "hi"), ("locales/fr/home.po", "msgid \"\"\n")]),
                "initial",
            )
            .unwrap();
        assert_eq!(repo.head_commit_id().unwrap().as_deref(), Some(sha.as_str()));

        let reader = repo.reader().unwrap();
        assert_eq!(reader.read_file("README.md"), Some(&b"hi"[..]));
        assert!(dir.path().join("locales/fr/home.po").exists());
    }

    #[test]
    fn test_changed_files_between_commits() {
        let dir = tempfile::tempdir().unwrap();
        let config = init_repo(dir.path());
        let mut repo = GitRepository::open(&config).unwrap();

        let first = repo
            .commit_tree(&files(&[("a.po", "one"), ("b.po", "two")]), "first")
            .unwrap();
        let second = repo
            .commit_tree(&files(&[("a.po", "uno"), ("c.po", "three")]), "second")
            .unwrap();

        let changed = repo.changed_files(Some(&first), &second).unwrap();
        let summary: Vec<_> = changed
            .iter()
            .map(|f| (f.path.as_str(), f.old_content.as_slice(), f.new_content.as_slice()))
            .collect();
        assert_eq!(
            summary,
            vec![("a.po", &b"one"[..], &b"uno"[..]), ("c.po", &b""[..], &b"three"[..])]
        );

        let all = repo.changed_files(None, &first).unwrap();
        assert_eq!(all.len(), 2);
    }

    /// Bare `origin` plus two working copies that both track it.
    fn shared_origin(dir: &Path) -> (GitRepository, GitRepository) {
        let origin = dir.join("origin.git");
        let mut opts = git2::RepositoryInitOptions::new();
        opts.bare(true).initial_head("main");
        git2::Repository::init_opts(&origin, &opts).unwrap();
        let url = origin.display().to_string();

        let config = init_repo(&dir.join("a"));
        git2::Repository::open(&config.path)
            .unwrap()
            .remote("origin", &url)
            .unwrap();
        let mut a = GitRepository::open(&config).unwrap();
        a.commit_tree(&files(&[("a.po", "one\ntwo\nthree\n")]), "seed")
            .unwrap();
        a.push().unwrap();

        let b = GitRepository::clone_repo(
            &url,
            &RepositoryConfig {
                path: dir.join("b"),
                ..config
            },
        )
        .unwrap();
        (a, b)
    }

    #[test]
    fn test_pull_fast_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let (mut a, mut b) = shared_origin(dir.path());
        let sha = a
            .commit_tree(&files(&[("a.po", "uno\ntwo\nthree\n")]), "edit")
            .unwrap();
        a.push().unwrap();

        b.pull().unwrap();
        assert_eq!(b.head_commit_id().unwrap().as_deref(), Some(sha.as_str()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b/a.po")).unwrap(),
            "uno\ntwo\nthree\n"
        );
    }

    #[test]
    fn test_pull_merges_and_publishes_unpushed_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut a, mut b) = shared_origin(dir.path());

        // `b` commits but never pushes; `a` publishes in the meantime.
        let local = b
            .commit_tree(
                &files(&[("a.po", "one\ntwo\nthree\n"), ("b.pot", "new")]),
                "local",
            )
            .unwrap();
        a.commit_tree(&files(&[("a.po", "one\ntwo\ntrois\n")]), "remote")
            .unwrap();
        a.push().unwrap();

        b.pull().unwrap();
        let reader = b.reader().unwrap();
        assert_eq!(reader.read_file("a.po"), Some(&b"one\ntwo\ntrois\n"[..]));
        assert_eq!(reader.read_file("b.pot"), Some(&b"new"[..]));

        let head = b.head_commit_id().unwrap().unwrap();
        let changed = b.changed_files(Some(&local), &head).unwrap();
        let paths: Vec<_> = changed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.po"]);

        a.pull().unwrap();
        assert_eq!(a.head_commit_id().unwrap(), Some(head));
    }

    #[test]
    fn test_pull_resets_when_merge_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut a, mut b) = shared_origin(dir.path());

        b.commit_tree(&files(&[("a.po", "changed locally\n")]), "local")
            .unwrap();
        let remote = a
            .commit_tree(&files(&[("c.po", "replacement")]), "drop a.po")
            .unwrap();
        a.push().unwrap();

        b.pull().unwrap();
        assert_eq!(b.head_commit_id().unwrap().as_deref(), Some(remote.as_str()));
        assert!(b.reader().unwrap().read_file("a.po").is_none());
    }

    #[test]
    fn test_repo_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitRepositorySource::new(RepositoryConfig {
            path: dir.path().join("missing"),
            ..init_repo(dir.path())
        });
        assert!(matches!(source.open(), Err(GitError::RepositoryNotFound(_))));
    }
}
