//! Domain model types used throughout gitcollector.
//!
//! These types bridge the definition source, the collector set, the commit
//! cursor and the publishing sink.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Annotation that carries an externally reachable clone URL.
pub const EXTERNAL_GIT_URL_ANNOTATION: &str = "fabric8.io/git-clone-url";

// ---------------------------------------------------------------------------
// Repository configuration
// ---------------------------------------------------------------------------

/// Identity and source location of one watched repository.
///
/// `name` is the unique key inside the collector set and stays stable across
/// modifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    pub namespace: String,

    /// Git source as written in the definition; `None` means nothing to mirror.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitDefinition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// The `[git]` section of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitDefinition {
    pub uri: String,

    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl RepositoryConfig {
    /// Configuration with a git source and no annotations.
    pub fn new(name: &str, namespace: &str, uri: &str, reference: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            git: Some(GitDefinition {
                uri: uri.to_string(),
                reference: reference.map(str::to_string),
            }),
            annotations: BTreeMap::new(),
        }
    }

    /// Where this repository's mirror lives under `work_dir`.
    ///
    /// Depends only on namespace and name, so it can be rebuilt without any
    /// persisted state.
    pub fn local_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(&self.namespace).join(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Git source resolution
// ---------------------------------------------------------------------------

/// A resolved remote history: the (URI, ref) pair a mirror tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub uri: String,
    /// Branch name without the `refs/heads/` prefix.
    pub reference: String,
}

/// Rules turning a [`RepositoryConfig`] into a [`GitSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    pub default_ref: String,
    pub prefer_external_url: bool,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            default_ref: "master".into(),
            prefer_external_url: false,
        }
    }
}

impl SourcePolicy {
    /// Resolve the git source of `config`, or `None` when it has nothing to
    /// mirror.
    pub fn resolve(&self, config: &RepositoryConfig) -> Option<GitSource> {
        let git = config.git.as_ref()?;

        let mut uri = git.uri.trim().to_string();
        if self.prefer_external_url {
            if let Some(external) = config.annotations.get(EXTERNAL_GIT_URL_ANNOTATION) {
                if !external.trim().is_empty() {
                    uri = external.trim().to_string();
                }
            }
        }
        if uri.is_empty() {
            return None;
        }

        let reference = git
            .reference
            .as_deref()
            .map(|r| r.trim().trim_start_matches("refs/heads/"))
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.default_ref)
            .to_string();

        Some(GitSource { uri, reference })
    }

    /// Whether moving from `old` to `new` invalidates the existing mirror.
    ///
    /// A configuration that never had a source has nothing to invalidate.
    pub fn source_changed(&self, old: &RepositoryConfig, new: &RepositoryConfig) -> bool {
        match (self.resolve(old), self.resolve(new)) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(old), Some(new)) => old != new,
        }
    }
}

// ---------------------------------------------------------------------------
// Extracted commits
// ---------------------------------------------------------------------------

/// Author or committer of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl Signature {
    pub fn from_git(sig: &git2::Signature<'_>) -> Self {
        let time = sig.when();
        let offset =
            FixedOffset::east_opt(time.offset_minutes() * 60).unwrap_or_else(|| Utc.fix());
        let when = offset
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(|| DateTime::<Utc>::default().with_timezone(&offset));
        Self {
            name: sig.name().unwrap_or("").to_string(),
            email: sig.email().unwrap_or("").to_string(),
            when,
        }
    }
}

/// A commit discovered by the cursor, ready to publish.
///
/// Serializes to the per-commit document the sink expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedCommit {
    pub namespace: String,
    pub build_config_name: String,
    pub hash: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
}

impl ExtractedCommit {
    pub fn from_git(commit: &git2::Commit<'_>, owner: &RepositoryConfig) -> Self {
        Self {
            namespace: owner.namespace.clone(),
            build_config_name: owner.name.clone(),
            hash: commit.id().to_string(),
            message: commit.message().unwrap_or("").to_string(),
            author: Signature::from_git(&commit.author()),
            committer: Signature::from_git(&commit.committer()),
        }
    }
}
