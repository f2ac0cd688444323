//! Incremental commit extraction.
//!
//! A [`CommitCursor`] walks a mirror's history from the tip, newest first,
//! and hands back only the commits that have not been published yet. All it
//! remembers between visits is a small [`CursorMarkers`] record per
//! repository.
//!
//! # Descents
//!
//! Extraction proceeds in *descents*. A descent starts at a tip
//! (`first_seen_hash`) and walks towards the root, or towards the tip of the
//! previous descent (`floor_hash`), at most `max_batch` commits per visit.
//! `last_published_hash` is the low-water mark: when a visit finds the same
//! tip again it skips everything down to that mark and continues below it.
//!
//! Once a descent has reached its floor it is *exhausted*. A visit that then
//! finds a new tip starts a new descent whose floor is the old tip, so only
//! commits not reachable from the old tip are emitted. A visit that finds a
//! new tip while the current descent still has backlog finishes the backlog
//! first.

use git2::{Oid, Repository, Sort};
use tracing::{debug, info, warn};

use crate::errors::ExtractError;
use crate::models::{ExtractedCommit, RepositoryConfig};

/// Per-repository extraction state. Empty strings mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorMarkers {
    /// Tip observed when the current descent began.
    pub first_seen_hash: String,
    /// Most recently emitted commit; the low-water mark of the descent.
    pub last_published_hash: String,
    /// Tip of the previous, completed descent. It and its ancestors are done.
    pub floor_hash: String,
    /// The current descent has reached its floor or the root.
    pub exhausted: bool,
}

impl CursorMarkers {
    /// Forget everything, as if the repository had never been visited.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn begin_descent(&mut self, tip: &str, floor: String) {
        self.first_seen_hash = tip.to_string();
        self.last_published_hash.clear();
        self.floor_hash = floor;
        self.exhausted = false;
    }
}

/// How a single walk ended.
enum Walk {
    /// `max_batch` commits were emitted; more may remain.
    Capped(Vec<ExtractedCommit>),
    /// The floor or the root was reached.
    Exhausted(Vec<ExtractedCommit>),
    /// The low-water mark was never met: the history was rewritten.
    Diverged,
    /// The floor commit is no longer in the mirror.
    FloorMissing,
}

/// Extracts unpublished commits, bounded per visit.
#[derive(Debug, Clone)]
pub struct CommitCursor {
    max_batch: usize,
}

impl CommitCursor {
    pub fn new(max_batch: usize) -> Self {
        Self {
            max_batch: max_batch.max(1),
        }
    }

    /// Return the commits of `repo` not yet published for `owner`, newest
    /// first, updating `markers` so the next call resumes correctly.
    ///
    /// An empty repository yields nothing and leaves `markers` untouched.
    pub fn extract(
        &self,
        markers: &mut CursorMarkers,
        repo: &Repository,
        owner: &RepositoryConfig,
    ) -> Result<Vec<ExtractedCommit>, ExtractError> {
        let Some(tip) = tip_of(repo)? else {
            debug!(repository = %owner.name, "repository has no commits");
            return Ok(Vec::new());
        };
        let tip_hash = tip.to_string();

        if markers.first_seen_hash.is_empty() {
            markers.begin_descent(&tip_hash, String::new());
        } else if markers.exhausted {
            if markers.first_seen_hash == tip_hash {
                return Ok(Vec::new());
            }
            let previous_tip = markers.first_seen_hash.clone();
            info!(repository = %owner.name, from = %previous_tip, to = %tip_hash, "tip moved, starting new descent");
            markers.begin_descent(&tip_hash, previous_tip);
        }

        match self.walk(markers, repo, tip, owner)? {
            Walk::Capped(commits) | Walk::Exhausted(commits) => Ok(commits),
            Walk::Diverged => {
                warn!(
                    repository = %owner.name,
                    low_water = %markers.last_published_hash,
                    "low-water mark no longer reachable, history was rewritten; re-baselining from new tip"
                );
                let previous_tip = markers.first_seen_hash.clone();
                markers.begin_descent(&tip_hash, previous_tip);
                match self.walk(markers, repo, tip, owner)? {
                    Walk::Capped(commits) | Walk::Exhausted(commits) => Ok(commits),
                    Walk::Diverged | Walk::FloorMissing => {
                        Ok(rebaseline(markers, &tip_hash, &owner.name))
                    }
                }
            }
            Walk::FloorMissing => Ok(rebaseline(markers, &tip_hash, &owner.name)),
        }
    }

    fn walk(
        &self,
        markers: &mut CursorMarkers,
        repo: &Repository,
        tip: Oid,
        owner: &RepositoryConfig,
    ) -> Result<Walk, ExtractError> {
        // A backlog is drained from the tip its descent started at, so a
        // newer tip cannot pull commits into it.
        let start = if markers.exhausted || markers.first_seen_hash.is_empty() {
            tip
        } else {
            match descent_start(repo, &markers.first_seen_hash, tip) {
                Some(start) => start,
                None => return Ok(Walk::Diverged),
            }
        };

        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        revwalk.push(start)?;

        if !markers.floor_hash.is_empty() {
            let hidden = Oid::from_str(&markers.floor_hash)
                .and_then(|floor| repo.find_commit(floor).map(|c| c.id()))
                .and_then(|floor| revwalk.hide(floor));
            if hidden.is_err() {
                return Ok(Walk::FloorMissing);
            }
        }

        let mut skipping = !markers.last_published_hash.is_empty();
        let mut emitted = Vec::new();

        for oid in revwalk {
            let oid = oid?;
            if skipping {
                if oid.to_string() == markers.last_published_hash {
                    skipping = false;
                }
                continue;
            }

            let commit = repo.find_commit(oid)?;
            debug!(repository = %owner.name, commit = %oid, "new commit");
            emitted.push(ExtractedCommit::from_git(&commit, owner));
            markers.last_published_hash = oid.to_string();

            if emitted.len() >= self.max_batch {
                return Ok(Walk::Capped(emitted));
            }
        }

        if skipping {
            return Ok(Walk::Diverged);
        }
        markers.exhausted = true;
        Ok(Walk::Exhausted(emitted))
    }
}

/// Where an unfinished descent resumes: its own first tip, provided `tip`
/// still contains it. `None` means the history was rewritten.
fn descent_start(repo: &Repository, first_seen: &str, tip: Oid) -> Option<Oid> {
    let start = Oid::from_str(first_seen).ok()?;
    if start == tip {
        return Some(tip);
    }
    repo.find_commit(start).ok()?;
    match repo.graph_descendant_of(tip, start) {
        Ok(true) => Some(start),
        _ => None,
    }
}

/// Adopt `tip` as a fully published baseline without emitting anything.
fn rebaseline(markers: &mut CursorMarkers, tip: &str, name: &str) -> Vec<ExtractedCommit> {
    warn!(repository = name, tip, "previous history unavailable in mirror; adopting current tip as baseline");
    markers.begin_descent(tip, String::new());
    markers.exhausted = true;
    Vec::new()
}

/// The commit HEAD points at, or `None` for an empty repository.
fn tip_of(repo: &Repository) -> Result<Option<Oid>, ExtractError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
