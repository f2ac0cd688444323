//! Round-robin scheduler.
//!
//! One [`Scheduler`] owns the [`CollectorSet`] and drives it from a single
//! task: drain pending definition events, visit the next repository
//! (mirror, extract, publish), pause, repeat. Visits never run concurrently,
//! so nothing here needs a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::collector::CollectorSet;
use crate::errors::CoreError;
use crate::events::ConfigEvent;
use crate::git::{CommitCursor, CursorMarkers, RepositoryMirror, SyncOutcome};
use crate::models::{ExtractedCommit, GitSource, RepositoryConfig};
use crate::publisher::Publisher;

/// Shared shutdown flag checked by the scheduler loop.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Check whether the shutdown flag has been set.
pub fn is_shutdown_requested(flag: &ShutdownFlag) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Counters accumulated over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub syncs_failed: u64,
    pub extracts_failed: u64,
    pub commits_published: u64,
    pub publish_failures: u64,
}

/// What one visit to a repository did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitReport {
    pub name: String,
    /// `None` when the repository has no git source or the sync failed.
    pub sync: Option<SyncOutcome>,
    /// Commits handed back by the cursor.
    pub emitted: usize,
    pub published: usize,
    /// Commits whose publish failed. They are not retried.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to visit.
    Idle,
    Visited(VisitReport),
}

impl TickOutcome {
    /// How long the caller should wait before the next tick.
    pub fn pause(&self, idle: Duration, activity: Duration) -> Duration {
        match self {
            Self::Idle => idle,
            Self::Visited(report) if report.published > 0 => activity,
            Self::Visited(_) => Duration::ZERO,
        }
    }
}

pub struct Scheduler {
    collectors: CollectorSet,
    mirror: RepositoryMirror,
    cursor: CommitCursor,
    publisher: Publisher,
    events: mpsc::Receiver<ConfigEvent>,
    idle_delay: Duration,
    activity_delay: Duration,
    stats: SchedulerStats,
    events_closed: bool,
}

impl Scheduler {
    pub fn new(
        collectors: CollectorSet,
        mirror: RepositoryMirror,
        cursor: CommitCursor,
        publisher: Publisher,
        events: mpsc::Receiver<ConfigEvent>,
    ) -> Self {
        Self {
            collectors,
            mirror,
            cursor,
            publisher,
            events,
            idle_delay: Duration::from_secs(1),
            activity_delay: Duration::from_secs(1),
            stats: SchedulerStats::default(),
            events_closed: false,
        }
    }

    pub fn with_delays(mut self, idle: Duration, activity: Duration) -> Self {
        self.idle_delay = idle;
        self.activity_delay = activity;
        self
    }

    pub fn collectors(&self) -> &CollectorSet {
        &self.collectors
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Cursor markers of the named repository, if it is watched.
    pub fn markers(&self, name: &str) -> Option<&CursorMarkers> {
        self.collectors.get(name).map(|e| &e.markers)
    }

    /// Apply the initial listing.
    pub async fn bootstrap(&mut self, initial: Vec<RepositoryConfig>) {
        info!(count = initial.len(), "bootstrapping repository set");
        for config in initial {
            self.apply_event(ConfigEvent::Added(config)).await;
        }
    }

    /// Apply every event that is ready without waiting for more.
    pub async fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.apply_event(event).await;
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.events_closed {
                        warn!("definition event stream closed, keeping current repositories");
                        self.events_closed = true;
                    }
                    break;
                }
            }
        }
        applied
    }

    pub async fn apply_event(&mut self, event: ConfigEvent) {
        let config = match event {
            ConfigEvent::Added(config) => {
                self.collectors.on_added(config.clone());
                config
            }
            ConfigEvent::Modified(config) => {
                self.collectors.on_modified(config.clone());
                config
            }
            ConfigEvent::Deleted(config) => {
                self.collectors.on_deleted(&config);
                return;
            }
        };
        if let Err(e) = self.publisher.upsert_config(&config).await {
            warn!(repository = %config.name, error = %e, "failed to publish configuration");
            self.stats.publish_failures += 1;
        }
    }

    /// Visit the next repository in round-robin order.
    ///
    /// Failures are contained here: they are logged and counted, and the
    /// repository is retried on its next turn.
    pub async fn tick(&mut self) -> TickOutcome {
        self.stats.ticks += 1;
        let Some(index) = self.collectors.advance() else {
            self.stats.idle_ticks += 1;
            return TickOutcome::Idle;
        };
        let Some(config) = self.collectors.entry_mut(index).map(|e| e.config.clone()) else {
            return TickOutcome::Idle;
        };

        let mut report = VisitReport {
            name: config.name.clone(),
            sync: None,
            emitted: 0,
            published: 0,
            failed: 0,
        };

        let Some(source) = self.collectors.git_source(&config) else {
            debug!(repository = %config.name, "no git source, nothing to do");
            return TickOutcome::Visited(report);
        };
        let commits = match self.mirror_and_extract(index, source, &config, &mut report).await {
            Ok(commits) => commits,
            Err(CoreError::Sync(e)) => {
                warn!(repository = %config.name, error = %e, "sync failed, will retry next turn");
                self.stats.syncs_failed += 1;
                return TickOutcome::Visited(report);
            }
            Err(e) => {
                warn!(repository = %config.name, error = %e, "extraction failed, will retry next turn");
                self.stats.extracts_failed += 1;
                return TickOutcome::Visited(report);
            }
        };
        report.emitted = commits.len();

        for commit in &commits {
            match self.publisher.upsert_commit(commit).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    warn!(repository = %config.name, hash = %commit.hash, error = %e, "failed to publish commit");
                    report.failed += 1;
                }
            }
        }
        self.stats.commits_published += report.published as u64;
        self.stats.publish_failures += report.failed as u64;

        if report.emitted > 0 {
            info!(
                repository = %config.name,
                emitted = report.emitted,
                published = report.published,
                failed = report.failed,
                "visit complete"
            );
        }
        TickOutcome::Visited(report)
    }

    /// Sync and extract on the blocking pool. The cursor works on a copy of
    /// the entry's markers, written back once the blocking task returns.
    async fn mirror_and_extract(
        &mut self,
        index: usize,
        source: GitSource,
        config: &RepositoryConfig,
        report: &mut VisitReport,
    ) -> Result<Vec<ExtractedCommit>, CoreError> {
        let Some(mut markers) = self.collectors.entry_mut(index).map(|e| e.markers.clone()) else {
            return Ok(Vec::new());
        };
        let local_path = self.collectors.local_path(config);
        let mirror = self.mirror.clone();
        let cursor = self.cursor.clone();
        let owner = config.clone();

        let (markers, sync, extracted) = tokio::task::spawn_blocking(move || {
            let sync = match mirror.sync(&source, &local_path) {
                Ok(outcome) => outcome,
                Err(e) => return (markers, None, Err(CoreError::from(e))),
            };
            let extracted = RepositoryMirror::open(&local_path)
                .and_then(|repo| cursor.extract(&mut markers, &repo, &owner))
                .map_err(CoreError::from);
            (markers, Some(sync), extracted)
        })
        .await?;

        report.sync = sync;
        if let Some(entry) = self.collectors.entry_mut(index) {
            entry.markers = markers;
        }
        extracted
    }

    /// Loop drain, tick, pause until `shutdown` is set. An in-flight visit
    /// always completes before the loop exits.
    pub async fn run(&mut self, shutdown: ShutdownFlag) -> SchedulerStats {
        info!(
            repositories = self.collectors.len(),
            idle_ms = self.idle_delay.as_millis() as u64,
            activity_ms = self.activity_delay.as_millis() as u64,
            "starting scheduler loop"
        );

        loop {
            if is_shutdown_requested(&shutdown) {
                info!("shutdown requested, exiting scheduler loop");
                break;
            }

            self.drain_events().await;
            let outcome = self.tick().await;
            let pause = outcome.pause(self.idle_delay, self.activity_delay);
            // A visit with nothing to publish may never await; give the
            // signal and watcher tasks a turn.
            tokio::task::yield_now().await;

            if !sleep_unless_shutdown(pause, &shutdown).await {
                info!("shutdown requested during pause, exiting");
                break;
            }
        }

        info!(
            ticks = self.stats.ticks,
            idle_ticks = self.stats.idle_ticks,
            syncs_failed = self.stats.syncs_failed,
            extracts_failed = self.stats.extracts_failed,
            commits_published = self.stats.commits_published,
            publish_failures = self.stats.publish_failures,
            "scheduler stopped"
        );
        self.stats
    }
}

/// Sleep for `duration` in short steps. Returns `false` if shutdown was
/// requested before the full duration elapsed.
async fn sleep_unless_shutdown(duration: Duration, shutdown: &ShutdownFlag) -> bool {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < duration {
        if is_shutdown_requested(shutdown) {
            return false;
        }
        let chunk = step.min(duration - slept);
        tokio::time::sleep(chunk).await;
        slept += chunk;
    }
    true
}
