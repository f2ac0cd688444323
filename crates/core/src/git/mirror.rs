//! Local mirror maintenance via `git2`.
//!
//! One working copy per repository. The presence of `<local_path>/.git` is
//! the only signal separating "needs clone" from "needs update".

use std::fs;
use std::path::Path;

use git2::{build::CheckoutBuilder, Cred, FetchOptions, RemoteCallbacks, Repository};
use tracing::{debug, info, instrument, warn};

use crate::errors::{ExtractError, SyncError};
use crate::models::GitSource;

/// What a successful [`RepositoryMirror::sync`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A fresh clone was made. `head` is `None` for an empty remote.
    Cloned { head: Option<String> },
    /// An existing mirror was brought up to date with its remote branch.
    Updated { head: Option<String> },
}

/// Keeps local working copies in step with their remotes.
///
/// Owns no scheduling state and only ever touches the directory it is given.
#[derive(Debug, Clone, Default)]
pub struct RepositoryMirror {
    token: Option<String>,
}

impl RepositoryMirror {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    /// Whether a mirror already exists at `local_path`.
    pub fn exists(local_path: &Path) -> bool {
        local_path.join(".git").is_dir()
    }

    /// Clone `source` into `local_path` if no mirror exists there, otherwise
    /// update the existing mirror.
    #[instrument(skip(self, source), fields(uri = %source.uri, reference = %source.reference))]
    pub fn sync(&self, source: &GitSource, local_path: &Path) -> Result<SyncOutcome, SyncError> {
        if Self::exists(local_path) {
            let head = self.update(source, local_path)?;
            Ok(SyncOutcome::Updated { head })
        } else {
            let head = self.clone_fresh(source, local_path)?;
            Ok(SyncOutcome::Cloned { head })
        }
    }

    /// Open an existing mirror for history walking.
    pub fn open(local_path: &Path) -> Result<Repository, ExtractError> {
        Repository::open(local_path).map_err(|source| ExtractError::Open {
            path: local_path.to_path_buf(),
            source,
        })
    }

    /// Delete the mirror at `local_path`. Missing directories are not an error.
    pub fn remove(local_path: &Path) {
        if !local_path.exists() {
            return;
        }
        match fs::remove_dir_all(local_path) {
            Ok(()) => info!(path = %local_path.display(), "removed mirror"),
            Err(e) => warn!(path = %local_path.display(), error = %e, "failed to remove mirror"),
        }
    }

    fn clone_fresh(&self, source: &GitSource, local_path: &Path) -> Result<Option<String>, SyncError> {
        info!(path = %local_path.display(), "cloning repository");
        let clone_failed = |reason: String| SyncError::CloneFailed {
            uri: source.uri.clone(),
            reference: source.reference.clone(),
            reason,
        };

        // Leftovers from an interrupted clone would make the clone fail.
        if local_path.exists() {
            fs::remove_dir_all(local_path).map_err(|e| clone_failed(e.to_string()))?;
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|e| clone_failed(e.to_string()))?;
        }

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(self.fetch_options());
        builder.branch(&source.reference);

        let result = builder
            .clone(&source.uri, local_path)
            .and_then(|repo| head_sha(&repo));
        match result {
            Ok(head) => {
                info!(head = head.as_deref().unwrap_or("<empty>"), "clone completed");
                Ok(head)
            }
            Err(e) => {
                Self::remove(local_path);
                Err(clone_failed(e.message().to_string()))
            }
        }
    }

    fn update(&self, source: &GitSource, local_path: &Path) -> Result<Option<String>, SyncError> {
        info!(path = %local_path.display(), "updating mirror");
        self.fetch_and_reset(source, local_path)
            .map_err(|e| SyncError::PullFailed {
                uri: source.uri.clone(),
                reference: source.reference.clone(),
                reason: e.message().to_string(),
            })
    }

    /// Fetch the tracked branch and move the local branch onto it.
    ///
    /// The local branch is force-moved, so a remote rewind is mirrored too.
    fn fetch_and_reset(
        &self,
        source: &GitSource,
        local_path: &Path,
    ) -> Result<Option<String>, git2::Error> {
        let repo = Repository::open(local_path)?;
        let branch = &source.reference;
        let remote_ref = format!("refs/remotes/origin/{}", branch);
        let refspec = format!("+refs/heads/{}:{}", branch, remote_ref);

        let mut remote = repo.remote_anonymous(&source.uri)?;
        let mut fetch_opts = self.fetch_options();
        remote.fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)?;
        debug!(refspec = %refspec, "fetch completed");

        let fetched = match repo.find_reference(&remote_ref) {
            Ok(reference) => reference.peel_to_commit()?,
            // The remote branch is still unborn.
            Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let local_ref = format!("refs/heads/{}", branch);
        repo.reference(&local_ref, fetched.id(), true, "gitcollector: sync with remote")?;
        repo.set_head(&local_ref)?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        info!(head = %fetched.id(), "mirror updated");
        Ok(Some(fetched.id().to_string()))
    }

    fn fetch_options(&self) -> FetchOptions<'static> {
        let mut callbacks = RemoteCallbacks::new();
        if let Some(tok) = &self.token {
            let tok = tok.clone();
            callbacks.credentials(move |_url, _username, _allowed| {
                Cred::userpass_plaintext("x-access-token", &tok)
            });
        }
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);
        fetch_opts
    }
}

/// SHA of HEAD, or `None` when HEAD is unborn.
fn head_sha(repo: &Repository) -> Result<Option<String>, git2::Error> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id().to_string())),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch || e.code() == git2::ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::{commit_file, init_origin};

    fn source_for(origin: &Path) -> GitSource {
        GitSource {
            uri: origin.display().to_string(),
            reference: "main".into(),
        }
    }

    #[test]
    fn test_clone_then_update() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        let first = commit_file(&origin, "a.txt", "one", "first");

        let mirror = RepositoryMirror::default();
        let local = dir.path().join("work/ns/svc-a");
        let source = source_for(&origin_path);

        let outcome = mirror.sync(&source, &local).unwrap();
        assert_eq!(outcome, SyncOutcome::Cloned { head: Some(first.to_string()) });
        assert!(RepositoryMirror::exists(&local));

        let second = commit_file(&origin, "a.txt", "two", "second");
        let outcome = mirror.sync(&source, &local).unwrap();
        assert_eq!(outcome, SyncOutcome::Updated { head: Some(second.to_string()) });

        let repo = RepositoryMirror::open(&local).unwrap();
        assert_eq!(repo.head().unwrap().peel_to_commit().unwrap().id(), second);
        assert_eq!(std::fs::read_to_string(local.join("a.txt")).unwrap(), "two");
    }

    #[test]
    fn test_update_follows_remote_rewind() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        let first = commit_file(&origin, "a.txt", "one", "first");
        commit_file(&origin, "a.txt", "two", "second");

        let mirror = RepositoryMirror::default();
        let local = dir.path().join("mirror");
        let source = source_for(&origin_path);
        mirror.sync(&source, &local).unwrap();

        origin
            .reference("refs/heads/main", first, true, "rewind")
            .unwrap();
        let outcome = mirror.sync(&source, &local).unwrap();
        assert_eq!(outcome, SyncOutcome::Updated { head: Some(first.to_string()) });
    }

    #[test]
    fn test_failed_clone_leaves_no_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("ns/missing");
        let source = GitSource {
            uri: dir.path().join("does-not-exist").display().to_string(),
            reference: "main".into(),
        };

        let result = RepositoryMirror::default().sync(&source, &local);
        assert!(matches!(result, Err(SyncError::CloneFailed { .. })));
        assert!(!RepositoryMirror::exists(&local));
        assert!(!local.exists());
    }

    #[test]
    fn test_clone_of_unknown_branch_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        commit_file(&origin, "a.txt", "one", "first");

        let local = dir.path().join("mirror");
        let source = GitSource {
            uri: origin_path.display().to_string(),
            reference: "no-such-branch".into(),
        };
        let result = RepositoryMirror::default().sync(&source, &local);
        assert!(matches!(result, Err(SyncError::CloneFailed { .. })));
        assert!(!local.exists());
    }

    #[test]
    fn test_update_failure_is_pull_failed() {
        let dir = tempfile::tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = init_origin(&origin_path);
        commit_file(&origin, "a.txt", "one", "first");

        let mirror = RepositoryMirror::default();
        let local = dir.path().join("mirror");
        mirror.sync(&source_for(&origin_path), &local).unwrap();

        std::fs::remove_dir_all(&origin_path).unwrap();
        let result = mirror.sync(&source_for(&origin_path), &local);
        assert!(matches!(result, Err(SyncError::PullFailed { .. })));
        // The mirror survives for the next attempt.
        assert!(RepositoryMirror::exists(&local));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("ns/name");
        std::fs::create_dir_all(local.join(".git")).unwrap();
        RepositoryMirror::remove(&local);
        assert!(!local.exists());
        RepositoryMirror::remove(&local);
    }
}
