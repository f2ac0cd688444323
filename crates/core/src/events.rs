//! Repository definition source.
//!
//! Definitions live in a directory, one `*.toml` file per repository:
//!
//! ```toml
//! name = "svc-a"              # defaults to the file stem
//! namespace = "team-a"        # defaults to the configured namespace
//!
//! [git]
//! uri = "https://example/svc-a.git"
//! ref = "main"
//!
//! [annotations]
//! "fabric8.io/git-clone-url" = "https://mirror.example/svc-a.git"
//! ```
//!
//! [`DefinitionSource::list`] gives the bootstrap listing; afterwards
//! [`DefinitionSource::rescan`] turns directory changes into
//! [`ConfigEvent`]s, and [`DefinitionSource::watch`] does so on an interval,
//! forwarding events over a channel.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::EventSourceError;
use crate::models::{GitDefinition, RepositoryConfig};
use crate::scheduler::{is_shutdown_requested, ShutdownFlag};

/// A change to the set of repository definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Added(RepositoryConfig),
    Modified(RepositoryConfig),
    Deleted(RepositoryConfig),
}

/// On-disk form of a definition.
#[derive(Debug, Deserialize)]
struct Definition {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    git: Option<GitDefinition>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Watches a directory of repository definitions.
#[derive(Debug)]
pub struct DefinitionSource {
    dir: PathBuf,
    namespace: String,
    /// Last successfully parsed definition per file.
    snapshot: HashMap<PathBuf, RepositoryConfig>,
}

impl DefinitionSource {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
            snapshot: HashMap::new(),
        }
    }

    /// Read every definition and make it the current snapshot.
    ///
    /// Fails only when the directory itself cannot be read; broken files are
    /// logged and left out.
    pub fn list(&mut self) -> Result<Vec<RepositoryConfig>, EventSourceError> {
        let files = self.definition_files()?;
        let mut snapshot = HashMap::new();
        for path in files {
            match self.parse(&path) {
                Ok(config) => {
                    snapshot.insert(path, config);
                }
                Err(e) => warn!(error = %e, "skipping definition"),
            }
        }
        self.snapshot = snapshot;
        let configs: Vec<RepositoryConfig> = self.by_name().into_values().collect();
        info!(dir = %self.dir.display(), count = configs.len(), "listed repository definitions");
        Ok(configs)
    }

    /// Re-read the directory and describe what changed since the last
    /// snapshot. Events are ordered: deletions, then additions and
    /// modifications, each by name.
    pub fn rescan(&mut self) -> Result<Vec<ConfigEvent>, EventSourceError> {
        let before = self.by_name();

        let files = self.definition_files()?;
        let mut snapshot = HashMap::new();
        for path in files {
            match self.parse(&path) {
                Ok(config) => {
                    snapshot.insert(path, config);
                }
                Err(e) => {
                    // Keep what we knew rather than report a deletion.
                    warn!(error = %e, "ignoring unreadable definition");
                    if let Some(previous) = self.snapshot.get(&path) {
                        snapshot.insert(path, previous.clone());
                    }
                }
            }
        }
        self.snapshot = snapshot;
        let after = self.by_name();

        let mut events = Vec::new();
        for (name, config) in &before {
            if !after.contains_key(name) {
                events.push(ConfigEvent::Deleted(config.clone()));
            }
        }
        for (name, config) in &after {
            match before.get(name) {
                None => events.push(ConfigEvent::Added(config.clone())),
                Some(previous) if previous != config => {
                    events.push(ConfigEvent::Modified(config.clone()))
                }
                Some(_) => {}
            }
        }
        if !events.is_empty() {
            debug!(count = events.len(), "definition changes detected");
        }
        Ok(events)
    }

    /// Rescan every `interval` and forward events to `sender` until the
    /// receiver is dropped or shutdown is requested.
    pub fn watch(
        mut self,
        interval: Duration,
        sender: mpsc::Sender<ConfigEvent>,
        shutdown: ShutdownFlag,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(dir = %self.dir.display(), interval_secs = interval.as_secs(), "watching definitions");
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately and list() has just run.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if is_shutdown_requested(&shutdown) {
                    break;
                }
                let events = match self.rescan() {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "definition rescan failed");
                        continue;
                    }
                };
                for event in events {
                    if sender.send(event).await.is_err() {
                        info!("event receiver closed, stopping definition watch");
                        return;
                    }
                }
            }
            info!("definition watch stopped");
        })
    }

    fn definition_files(&self) -> Result<Vec<PathBuf>, EventSourceError> {
        let unreadable = |source| EventSourceError::Unreadable {
            path: self.dir.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn parse(&self, path: &Path) -> Result<RepositoryConfig, EventSourceError> {
        let invalid = |detail: String| EventSourceError::Invalid {
            path: path.to_path_buf(),
            detail,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let definition: Definition = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = definition.name.unwrap_or(stem);
        let namespace = definition
            .namespace
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| self.namespace.clone());

        validate_path_component("name", &name).map_err(&invalid)?;
        validate_path_component("namespace", &namespace).map_err(&invalid)?;

        Ok(RepositoryConfig {
            name,
            namespace,
            git: definition.git,
            annotations: definition.annotations,
        })
    }

    /// Current snapshot keyed by name. On duplicates the first file in path
    /// order wins.
    fn by_name(&self) -> BTreeMap<String, RepositoryConfig> {
        let mut paths: Vec<&PathBuf> = self.snapshot.keys().collect();
        paths.sort();
        let mut configs = BTreeMap::new();
        for path in paths {
            let config = &self.snapshot[path];
            if configs.contains_key(&config.name) {
                warn!(path = %path.display(), repository = %config.name, "duplicate definition ignored");
                continue;
            }
            configs.insert(config.name.clone(), config.clone());
        }
        configs
    }
}

/// Names and namespaces become directories under the work dir.
fn validate_path_component(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(format!("{field} '{value}' is not usable as a directory name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_list_reads_definitions_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "svc-a.toml",
            "[git]\nuri = \"https://example/svc-a.git\"\nref = \"main\"\n",
        );
        write(
            dir.path(),
            "other.toml",
            "name = \"svc-b\"\nnamespace = \"team-b\"\n",
        );
        write(dir.path(), "README.md", "not a definition");

        let mut source = DefinitionSource::new(dir.path(), "team-a");
        let configs = source.list().unwrap();
        assert_eq!(configs.len(), 2);

        let a = configs.iter().find(|c| c.name == "svc-a").unwrap();
        assert_eq!(a.namespace, "team-a");
        assert_eq!(a.git.as_ref().unwrap().reference.as_deref(), Some("main"));

        let b = configs.iter().find(|c| c.name == "svc-b").unwrap();
        assert_eq!(b.namespace, "team-b");
        assert!(b.git.is_none());
    }

    #[test]
    fn test_list_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.toml", "[git]\nuri = \"u\"\n");
        write(dir.path(), "bad.toml", "[git\nuri = ");
        write(dir.path(), "escape.toml", "name = \"../etc\"\n");

        let mut source = DefinitionSource::new(dir.path(), "ns");
        let configs = source.list().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "good");
    }

    #[test]
    fn test_list_of_missing_directory_fails() {
        let mut source = DefinitionSource::new("/nonexistent/definitions", "ns");
        assert!(matches!(
            source.list(),
            Err(EventSourceError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_rescan_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", "[git]\nuri = \"u1\"\n");
        write(dir.path(), "b.toml", "[git]\nuri = \"u2\"\n");

        let mut source = DefinitionSource::new(dir.path(), "ns");
        source.list().unwrap();
        assert!(source.rescan().unwrap().is_empty());

        write(dir.path(), "a.toml", "[git]\nuri = \"u1\"\nref = \"develop\"\n");
        std::fs::remove_file(dir.path().join("b.toml")).unwrap();
        write(dir.path(), "c.toml", "[git]\nuri = \"u3\"\n");

        let events = source.rescan().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ConfigEvent::Deleted(c) if c.name == "b"));
        assert!(matches!(&events[1], ConfigEvent::Modified(c) if c.name == "a"));
        assert!(matches!(&events[2], ConfigEvent::Added(c) if c.name == "c"));

        assert!(source.rescan().unwrap().is_empty());
    }

    #[test]
    fn test_rescan_keeps_previous_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", "[git]\nuri = \"u1\"\n");

        let mut source = DefinitionSource::new(dir.path(), "ns");
        source.list().unwrap();

        write(dir.path(), "a.toml", "[git\n");
        assert!(source.rescan().unwrap().is_empty());

        write(dir.path(), "a.toml", "[git]\nuri = \"u9\"\n");
        let events = source.rescan().unwrap();
        assert!(matches!(&events[..], [ConfigEvent::Modified(c)] if c.git.as_ref().unwrap().uri == "u9"));
    }

    #[test]
    fn test_duplicate_names_first_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1.toml", "name = \"dup\"\n[git]\nuri = \"first\"\n");
        write(dir.path(), "2.toml", "name = \"dup\"\n[git]\nuri = \"second\"\n");

        let mut source = DefinitionSource::new(dir.path(), "ns");
        let configs = source.list().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].git.as_ref().unwrap().uri, "first");
    }

    #[tokio::test]
    async fn test_watch_forwards_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DefinitionSource::new(dir.path(), "ns");
        source.list().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = ShutdownFlag::default();
        let handle = source.watch(Duration::from_millis(20), tx, shutdown.clone());

        write(dir.path(), "new.toml", "[git]\nuri = \"u\"\n");
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert!(matches!(event, ConfigEvent::Added(c) if c.name == "new"));

        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watch did not stop")
            .unwrap();
    }
}
