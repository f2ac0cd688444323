//! TOML-based configuration system for gitcollector.
//!
//! Every section carries serde defaults, so a missing or empty file yields a
//! working configuration. Secrets are referenced through `_env` fields that
//! name environment variables and are resolved at runtime via
//! [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::SourcePolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Working directory, pacing and batch settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Repository definition source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Git access settings.
    #[serde(default)]
    pub git: GitConfig,

    /// Publishing sink settings.
    #[serde(default)]
    pub publisher: PublisherConfig,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Scheduler pacing and mirror placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root under which one mirror per repository is kept.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Milliseconds to sleep when no repositories are known.
    #[serde(default = "default_delay_ms")]
    pub idle_delay_ms: u64,

    /// Milliseconds to sleep after a visit that published commits.
    #[serde(default = "default_delay_ms")]
    pub activity_delay_ms: u64,

    /// Upper bound on commits extracted per repository visit.
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/gitcollector")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_max_commits() -> usize {
    10
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            idle_delay_ms: default_delay_ms(),
            activity_delay_ms: default_delay_ms(),
            max_commits: default_max_commits(),
        }
    }
}

impl DaemonConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn activity_delay(&self) -> Duration {
        Duration::from_millis(self.activity_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Definition source
// ---------------------------------------------------------------------------

/// Where repository definitions come from and how they are interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory holding one `*.toml` definition per repository.
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,

    /// Namespace applied to definitions that do not name one.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Seconds between rescans of the definitions directory.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Prefer the external clone-URL annotation over the definition's URI.
    #[serde(default)]
    pub external_git_url: bool,
}

fn default_definitions_dir() -> PathBuf {
    PathBuf::from("/etc/gitcollector/repositories")
}
fn default_namespace() -> String {
    "default".into()
}
fn default_poll_interval() -> u64 {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            definitions_dir: default_definitions_dir(),
            namespace: default_namespace(),
            poll_interval_secs: default_poll_interval(),
            external_git_url: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Git access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Branch used when a definition names no ref.
    #[serde(default = "default_ref")]
    pub default_ref: String,

    /// Environment variable holding an HTTPS access token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_ref() -> String {
    "master".into()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_ref: default_ref(),
            token_env: None,
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Publishing sink configuration.
///
/// Each endpoint is found through the `<SERVICE>_SERVICE_HOST` and
/// `<SERVICE>_SERVICE_PORT` variables unless an explicit URL is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Service name of the work-item tracker.
    #[serde(default = "default_tracker_service")]
    pub tracker_service: String,

    /// Service name of the search index.
    #[serde(default = "default_search_service")]
    pub search_service: String,

    /// Index that commit and configuration documents are written to.
    #[serde(default = "default_search_index")]
    pub search_index: String,

    /// Explicit tracker base URL, overriding service discovery.
    #[serde(default)]
    pub tracker_url: Option<String>,

    /// Explicit search base URL, overriding service discovery.
    #[serde(default)]
    pub search_url: Option<String>,
}

fn default_tracker_service() -> String {
    "WIT".into()
}
fn default_search_service() -> String {
    "ELASTICSEARCH".into()
}
fn default_search_index() -> String {
    "gitcollector".into()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            tracker_service: default_tracker_service(),
            search_service: default_search_service(),
            search_index: default_search_index(),
            tracker_url: None,
            search_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// A missing variable only logs a warning; anonymous access is valid.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.git.token_env {
            self.git.token = resolve_optional_env(env_name, "git.token_env");
        }
        Ok(())
    }

    /// Validate that all values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.max_commits == 0 {
            return Err(ConfigError::InvalidValue {
                field: "daemon.max_commits".into(),
                detail: "max commits per visit must be > 0".into(),
            });
        }
        if self.source.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.poll_interval_secs".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.source.definitions_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source.definitions_dir".into(),
                detail: "definitions directory must not be empty".into(),
            });
        }
        if self.git.default_ref.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.default_ref".into(),
                detail: "default ref must not be empty".into(),
            });
        }
        Ok(())
    }

    /// The git source resolution rules described by this configuration.
    pub fn source_policy(&self) -> SourcePolicy {
        SourcePolicy {
            default_ref: self.git.default_ref.clone(),
            prefer_external_url: self.source.external_git_url,
        }
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
