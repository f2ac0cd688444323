//! The set of watched repositories and its round-robin cursor.
//!
//! A [`CollectorSet`] is owned by exactly one scheduler. Membership changes
//! and cursor adjustment happen together inside a single event-handling call,
//! never interleaved with a visit.

use std::path::PathBuf;

use tracing::info;

use crate::git::{CursorMarkers, RepositoryMirror};
use crate::models::{GitSource, RepositoryConfig, SourcePolicy};

/// Scheduling and cursor state for one watched repository.
#[derive(Debug, Clone)]
pub struct RepositoryEntry {
    pub config: RepositoryConfig,
    pub markers: CursorMarkers,
}

/// What applying an add/modify/delete did to the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// A new entry was appended.
    Inserted,
    /// The configuration was replaced; mirror and markers were kept.
    Updated,
    /// The git source changed; mirror deleted and markers cleared.
    Reset,
    /// The entry and its mirror were removed.
    Removed,
    /// A delete named a repository that is not in the set.
    Unknown,
}

/// Ordered collection of [`RepositoryEntry`] keyed by name, plus the
/// round-robin position.
#[derive(Debug)]
pub struct CollectorSet {
    entries: Vec<RepositoryEntry>,
    /// Index of the entry visited last; `None` before the first visit.
    current: Option<usize>,
    work_dir: PathBuf,
    policy: SourcePolicy,
}

impl CollectorSet {
    pub fn new(work_dir: impl Into<PathBuf>, policy: SourcePolicy) -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            work_dir: work_dir.into(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in visitation order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.config.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RepositoryEntry> {
        self.entries.iter().find(|e| e.config.name == name)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut RepositoryEntry> {
        self.entries.get_mut(index)
    }

    /// Mirror location of `config`.
    pub fn local_path(&self, config: &RepositoryConfig) -> PathBuf {
        config.local_path(&self.work_dir)
    }

    /// Resolved git source of `config` under this set's policy.
    pub fn git_source(&self, config: &RepositoryConfig) -> Option<GitSource> {
        self.policy.resolve(config)
    }

    pub fn on_added(&mut self, config: RepositoryConfig) -> Membership {
        info!(repository = %config.name, namespace = %config.namespace, "adding repository");
        self.upsert(config)
    }

    pub fn on_modified(&mut self, config: RepositoryConfig) -> Membership {
        info!(repository = %config.name, namespace = %config.namespace, "updating repository");
        self.upsert(config)
    }

    /// Remove the named entry and its mirror.
    ///
    /// If the removed entry sat at or before the round-robin position, the
    /// position moves back one so the entry shifting into that slot is not
    /// skipped.
    pub fn on_deleted(&mut self, config: &RepositoryConfig) -> Membership {
        info!(repository = %config.name, "removing repository");
        let Some(pos) = self.position(&config.name) else {
            return Membership::Unknown;
        };

        let entry = self.entries.remove(pos);
        RepositoryMirror::remove(&self.local_path(&entry.config));

        if let Some(current) = self.current {
            if pos <= current {
                self.current = current.checked_sub(1);
            }
        }
        Membership::Removed
    }

    /// Advance the round-robin position and return the index to visit, or
    /// `None` if the set is empty.
    pub fn advance(&mut self) -> Option<usize> {
        if self.entries.is_empty() {
            self.current = None;
            return None;
        }
        let next = match self.current {
            Some(i) if i + 1 < self.entries.len() => i + 1,
            _ => 0,
        };
        self.current = Some(next);
        Some(next)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.config.name == name)
    }

    fn upsert(&mut self, config: RepositoryConfig) -> Membership {
        let Some(pos) = self.position(&config.name) else {
            self.entries.push(RepositoryEntry {
                config,
                markers: CursorMarkers::default(),
            });
            return Membership::Inserted;
        };

        let changed = self.policy.source_changed(&self.entries[pos].config, &config);
        // Namespace is part of the mirror location.
        let moved = self.entries[pos].config.namespace != config.namespace;
        if changed || moved {
            info!(repository = %config.name, "git source changed, removing old mirror");
            RepositoryMirror::remove(&self.local_path(&self.entries[pos].config));
            let entry = &mut self.entries[pos];
            entry.markers.reset();
            entry.config = config;
            Membership::Reset
        } else {
            self.entries[pos].config = config;
            Membership::Updated
        }
    }
}
