//! Error types for the gitcollector core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies the ones a repository visit can
//! raise. Apart from [`EventSourceError`] during the bootstrap
//! listing, none of these are fatal: the scheduler contains them at the
//! repository boundary and logs them.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Failure of one repository visit (mirror then extract).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The blocking git task panicked or was cancelled.
    #[error("visit task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// Mirror errors
// ---------------------------------------------------------------------------

/// Errors from synchronizing a local mirror with its remote.
///
/// Both variants are transient: the repository is retried on its next turn.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The initial clone failed. No `.git` directory is left behind.
    #[error("git clone of '{uri}' (ref '{reference}') failed: {reason}")]
    CloneFailed {
        uri: String,
        reference: String,
        reason: String,
    },

    /// Fetching / fast-forwarding an existing mirror failed.
    #[error("git update of '{uri}' (ref '{reference}') failed: {reason}")]
    PullFailed {
        uri: String,
        reference: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Extraction errors
// ---------------------------------------------------------------------------

/// Errors from walking a mirror's commit history.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The mirror could not be opened as a git repository.
    #[error("cannot open mirror at '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    /// The history walk itself failed.
    #[error("history walk failed: {0}")]
    Walk(#[from] git2::Error),
}

// ---------------------------------------------------------------------------
// Publishing errors
// ---------------------------------------------------------------------------

/// Errors from delivering documents to the publishing sink.
#[derive(Debug, Error)]
pub enum PublishError {
    /// HTTP-level transport error (connect, TLS, timeout).
    #[error("publish HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status code.
    #[error("PUT {url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The document could not be serialized.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A configured or derived endpoint URL is not valid.
    #[error("invalid publish URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Event source errors
// ---------------------------------------------------------------------------

/// Errors from the repository definition source.
#[derive(Debug, Error)]
pub enum EventSourceError {
    /// The definitions directory could not be listed.
    #[error("cannot read definitions directory '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A definition file could not be read or parsed.
    #[error("invalid definition '{path}': {detail}")]
    Invalid { path: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SyncError::CloneFailed {
            uri: "https://example/svc-a.git".into(),
            reference: "main".into(),
            reason: "unreachable".into(),
        };
        assert_eq!(
            err.to_string(),
            "git clone of 'https://example/svc-a.git' (ref 'main') failed: unreachable"
        );

        let err = PublishError::Status {
            url: "http://wit/api".into(),
            status: 503,
            body: "busy".into(),
        };
        assert!(err.to_string().contains("HTTP 503"));

        let err = ConfigError::InvalidValue {
            field: "daemon.max_commits".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("daemon.max_commits"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let sync_err = SyncError::PullFailed {
            uri: "u".into(),
            reference: "r".into(),
            reason: "x".into(),
        };
        let core_err: CoreError = sync_err.into();
        assert!(matches!(core_err, CoreError::Sync(_)));

        let walk_err: ExtractError = git2::Error::from_str("boom").into();
        let core_err: CoreError = walk_err.into();
        assert!(matches!(core_err, CoreError::Extract(ExtractError::Walk(_))));
    }

    #[tokio::test]
    async fn test_core_error_from_panicked_task() {
        let join_err = tokio::task::spawn_blocking(|| panic!("boom"))
            .await
            .unwrap_err();
        let core_err: CoreError = join_err.into();
        assert!(matches!(core_err, CoreError::Task(_)));
        assert!(core_err.to_string().starts_with("visit task failed"));
    }
}
