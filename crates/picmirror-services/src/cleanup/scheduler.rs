//! Cleanup scheduler
//!
//! Mirrored outputs are handed to the scheduler once the reply is sent. A
//! retention above zero puts the file in an in-memory queue that a background
//! loop reaps every `loop_interval`; a retention of zero spawns a short
//! deletion task instead. Both paths re-confine the file to the data
//! directory before anything is deleted.
//!
//! Filesystem work runs on the blocking pool. The queue lock is only held to
//! copy the queue and to drop finished entries, so `schedule` never waits on
//! a reap pass.
//!
//! Lifecycle: `Stopped -> Running` on [`CleanupScheduler::start`],
//! `Running -> Stopping -> Stopped` on [`CleanupScheduler::cleanup_all`].

use super::sweep::sweep_stale_temps;
use chrono::{DateTime, Utc};
use picmirror_core::{AppError, DataDir, PluginConfig};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SECS_PER_HOUR: u64 = 3600;

/// Longest retention accepted; larger values are clamped.
const MAX_RETENTION_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub loop_interval: Duration,
    /// How long `cleanup_all` waits for the loop before aborting it.
    pub shutdown_timeout: Duration,
    /// Grace delay before a zero-retention file is deleted.
    pub immediate_delay: Duration,
    /// Age after which leftover temp files are swept.
    pub stale_age: Duration,
    /// First wait after a failed loop iteration; doubles per failure.
    pub error_backoff: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            loop_interval: Duration::from_secs(config.cleanup_loop_interval),
            shutdown_timeout: Duration::from_secs_f64(config.cleanup_timeout),
            immediate_delay: Duration::from_millis(500),
            stale_age: Duration::from_secs(u64::from(config.keep_files_hours.max(1)) * SECS_PER_HOUR),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&PluginConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupEntry {
    pub id: u64,
    pub path: PathBuf,
    pub scheduled_at: Instant,
    pub expires_at: Instant,
    /// Wall-clock expiry, for logs only.
    pub expires_wall: DateTime<Utc>,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted: usize,
    pub missing: usize,
    pub rejected: usize,
    pub failed: usize,
    pub remaining: usize,
}

struct Inner {
    data_dir: DataDir,
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
    queue: Mutex<Vec<CleanupEntry>>,
    pending: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
    loop_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    sweep: SweepFn,
}

type SweepFn = fn(&DataDir, Duration) -> io::Result<usize>;

/// Shared handle to the scheduler; clones refer to the same queue.
#[derive(Clone)]
pub struct CleanupScheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CleanupScheduler {
    pub fn new(data_dir: DataDir, settings: SchedulerSettings) -> Self {
        Self::with_sweep(data_dir, settings, sweep_stale_temps)
    }

    fn with_sweep(data_dir: DataDir, settings: SchedulerSettings, sweep: SweepFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                data_dir,
                settings,
                state: Mutex::new(SchedulerState::Stopped),
                queue: Mutex::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                loop_task: Mutex::new(None),
                sweep,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.inner.state)
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Spawn the reaper loop. Returns `false` if it is already running.
    ///
    /// The first pass, including the stale temp sweep, runs right away.
    pub fn start(&self) -> bool {
        let mut state = lock(&self.inner.state);
        if *state != SchedulerState::Stopped {
            tracing::debug!(state = ?*state, "Cleanup scheduler already started");
            return false;
        }

        let stop = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::downgrade(&self.inner), stop.clone()));
        *lock(&self.inner.loop_task) = Some((stop, handle));
        *state = SchedulerState::Running;

        tracing::info!(
            interval_secs = self.inner.settings.loop_interval.as_secs(),
            "Cleanup scheduler started"
        );
        true
    }

    /// Hand `path` to the scheduler for deletion after `retention_hours`.
    ///
    /// The path is re-confined to the data directory first. A retention of
    /// zero or less deletes the file after a short grace delay.
    pub fn schedule(&self, path: &Path, retention_hours: i64) -> Result<(), AppError> {
        let path = self.inner.data_dir.confine(path).map_err(|e| {
            tracing::warn!(path = %path.display(), reason = %e, "Refused to schedule cleanup");
            e
        })?;

        if retention_hours <= 0 {
            self.spawn_immediate(path);
            return Ok(());
        }

        let hours = retention_hours.min(MAX_RETENTION_HOURS);
        let retention = Duration::from_secs(hours.unsigned_abs() * SECS_PER_HOUR);
        let now = Instant::now();
        let entry = CleanupEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            expires_wall: Utc::now() + chrono::Duration::hours(hours),
            path,
            scheduled_at: now,
            expires_at: now + retention,
        };
        tracing::debug!(
            path = %entry.path.display(),
            expires_at = %entry.expires_wall,
            "Scheduled cleanup"
        );
        lock(&self.inner.queue).push(entry);
        Ok(())
    }

    fn spawn_immediate(&self, path: PathBuf) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let delay = self.inner.settings.immediate_delay;

        // Insert under the lock so the task cannot deregister before it is registered.
        let mut pending = lock(&self.inner.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let worker = inner.clone();
            let target = path.clone();
            match tokio::task::spawn_blocking(move || worker.delete_confined(&target)).await {
                Ok(Ok(true)) => tracing::debug!(path = %path.display(), "Deleted file"),
                Ok(Ok(false)) => tracing::debug!(path = %path.display(), "File already gone"),
                Ok(Err(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "Immediate deletion failed")
                }
                Err(e) => tracing::warn!(error = %e, "Deletion task failed"),
            }
            lock(&inner.pending).remove(&id);
        });
        pending.insert(id, handle);
    }

    /// Delete every expired entry, and drop entries whose file is gone or
    /// no longer confined. Per-file errors are logged and the entry kept.
    ///
    /// Blocks on filesystem calls; async callers go through the loop or
    /// [`cleanup_all`](Self::cleanup_all).
    pub fn reap(&self) -> ReapReport {
        self.inner.reap(Instant::now())
    }

    /// Stop the loop, cancel pending deletions and clear the queue.
    ///
    /// Safe to call whether or not [`start`](Self::start) ran, and more than
    /// once.
    pub async fn cleanup_all(&self) -> ReapReport {
        {
            let mut state = lock(&self.inner.state);
            if *state == SchedulerState::Running {
                *state = SchedulerState::Stopping;
            }
        }

        let loop_task = lock(&self.inner.loop_task).take();
        if let Some((stop, mut handle)) = loop_task {
            stop.cancel();
            match tokio::time::timeout(self.inner.settings.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => tracing::debug!("Cleanup loop exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Cleanup loop ended abnormally"),
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.inner.settings.shutdown_timeout.as_secs_f64(),
                        "Cleanup loop unresponsive, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }

        let pending: Vec<JoinHandle<()>> = lock(&self.inner.pending)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Cancelling pending deletions");
        }
        for handle in pending {
            handle.abort();
            let _ = handle.await;
        }

        let now = Instant::now();
        let inner = self.inner.clone();
        let report = tokio::task::spawn_blocking(move || inner.reap(now))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Final reap failed");
                ReapReport::default()
            });
        let dropped = {
            let mut queue = lock(&self.inner.queue);
            let dropped = queue.len();
            queue.clear();
            dropped
        };

        *lock(&self.inner.state) = SchedulerState::Stopped;
        tracing::info!(
            deleted = report.deleted,
            dropped,
            "Cleanup scheduler stopped"
        );
        ReapReport {
            remaining: 0,
            ..report
        }
    }
}

enum Verdict {
    Keep,
    Done,
}

impl Inner {
    /// Reap against a copy of the queue, then drop finished entries by id so
    /// entries scheduled meanwhile survive.
    fn reap(&self, now: Instant) -> ReapReport {
        let snapshot = lock(&self.queue).clone();
        let mut report = ReapReport::default();

        let done: HashSet<u64> = snapshot
            .iter()
            .filter(|entry| matches!(self.reap_entry(entry, now, &mut report), Verdict::Done))
            .map(|entry| entry.id)
            .collect();

        let mut queue = lock(&self.queue);
        queue.retain(|entry| !done.contains(&entry.id));
        report.remaining = queue.len();
        report
    }

    fn reap_entry(&self, entry: &CleanupEntry, now: Instant, report: &mut ReapReport) -> Verdict {
        let confined = match self.data_dir.confine(&entry.path) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), reason = %e, "Dropping unconfined entry");
                report.rejected += 1;
                return Verdict::Done;
            }
        };

        if fs::symlink_metadata(&confined).is_err() {
            report.missing += 1;
            return Verdict::Done;
        }
        if entry.expires_at > now {
            return Verdict::Keep;
        }

        match self.delete_confined(&confined) {
            Ok(true) => {
                tracing::debug!(path = %confined.display(), "Reaped expired file");
                report.deleted += 1;
                Verdict::Done
            }
            Ok(false) => {
                report.missing += 1;
                Verdict::Done
            }
            Err(e) => {
                tracing::warn!(path = %confined.display(), error = %e, "Failed to reap file");
                report.failed += 1;
                Verdict::Keep
            }
        }
    }

    /// Delete a file after re-confining it. `Ok(false)` means it was already gone.
    fn delete_confined(&self, path: &Path) -> Result<bool, AppError> {
        let confined = self.data_dir.confine(path)?;
        match fs::remove_file(&confined) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::ResourceState(format!(
                "cannot delete {}: {}",
                confined.display(),
                e
            ))),
        }
    }

    fn iterate(&self, now: Instant) -> io::Result<ReapReport> {
        let report = self.reap(now);
        let swept = (self.sweep)(&self.data_dir, self.settings.stale_age)?;
        if report.deleted > 0 || swept > 0 {
            tracing::info!(
                deleted = report.deleted,
                swept,
                remaining = report.remaining,
                "Cleanup pass"
            );
        }
        Ok(report)
    }
}

/// One pass on the blocking pool. A pass in progress is not interrupted.
async fn run_pass(inner: Arc<Inner>) -> io::Result<ReapReport> {
    let now = Instant::now();
    tokio::task::spawn_blocking(move || inner.iterate(now))
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)))
}

async fn run_loop(inner: Weak<Inner>, stop: CancellationToken) {
    let mut failures: u32 = 0;

    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        let settings = strong.settings;
        let wait = match run_pass(strong).await {
            Ok(_) => {
                failures = 0;
                settings.loop_interval
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let backoff = settings
                    .error_backoff
                    .saturating_mul(2u32.saturating_pow(failures - 1))
                    .min(settings.loop_interval);
                tracing::error!(error = %e, failures, "Cleanup pass failed");
                backoff
            }
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::debug!("Cleanup loop finished");
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("state", &self.state())
            .field("queued", &self.queue_len())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picmirror_core::{ErrorMetadata, Rejection};
    use tempfile::{tempdir, TempDir};

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            loop_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            immediate_delay: Duration::from_millis(500),
            stale_age: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(5),
        }
    }

    fn scheduler() -> (TempDir, CleanupScheduler) {
        let dir = tempdir().unwrap();
        let data_dir = DataDir::open(dir.path()).unwrap();
        (dir, CleanupScheduler::new(data_dir, settings()))
    }

    fn output(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"mirrored").unwrap();
        path
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retention_deletes_shortly() {
        let (dir, scheduler) = scheduler();
        let path = output(&dir, "mirror_left_to_right_a.png");

        scheduler.schedule(&path, 0).unwrap();
        assert!(path.exists());
        assert_eq!(scheduler.pending_len(), 1);
        assert_eq!(scheduler.queue_len(), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!path.exists());
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_expires_after_hours() {
        let (dir, scheduler) = scheduler();
        let path = output(&dir, "mirror_top_to_bottom_a.png");

        scheduler.schedule(&path, 2).unwrap();
        assert_eq!(scheduler.reap().deleted, 0);
        assert!(path.exists());

        tokio::time::advance(Duration::from_secs(2 * 3600 - 1)).await;
        assert_eq!(scheduler.reap().remaining, 1);
        assert!(path.exists());

        tokio::time::advance(Duration::from_secs(2)).await;
        let report = scheduler.reap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.remaining, 0);
        assert!(!path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_loop_reaps_expired_entries() {
        let (dir, scheduler) = scheduler();
        let path = output(&dir, "mirror_right_to_left_a.png");

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.schedule(&path, 1).unwrap();
        tokio::time::sleep(Duration::from_secs(3600 + 120)).await;
        assert!(!path.exists());
        assert_eq!(scheduler.queue_len(), 0);

        scheduler.cleanup_all().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_drops_vanished_files() {
        let (dir, scheduler) = scheduler();
        let path = output(&dir, "mirror_bottom_to_top_a.png");
        scheduler.schedule(&path, 5).unwrap();
        fs::remove_file(&path).unwrap();

        let report = scheduler.reap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_all_cancels_pending_without_start() {
        let (dir, scheduler) = scheduler();
        let paths: Vec<_> = (0..3)
            .map(|i| output(&dir, &format!("mirror_left_to_right_{}.png", i)))
            .collect();
        for path in &paths {
            scheduler.schedule(path, 0).unwrap();
        }
        let queued = output(&dir, "mirror_left_to_right_q.png");
        scheduler.schedule(&queued, 24).unwrap();
        assert_eq!(scheduler.pending_len(), 3);

        scheduler.cleanup_all().await;
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(scheduler.queue_len(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // The cancelled tasks never ran.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(paths.iter().all(|p| p.exists()));

        // Idempotent.
        scheduler.cleanup_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_all_wakes_loop_promptly() {
        let dir = tempdir().unwrap();
        let scheduler = CleanupScheduler::new(
            DataDir::open(dir.path()).unwrap(),
            SchedulerSettings {
                loop_interval: Duration::from_secs(1800),
                ..settings()
            },
        );
        scheduler.start();
        tokio::task::yield_now().await;

        let started = Instant::now();
        scheduler.cleanup_all().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // Restartable after a full stop.
        assert!(scheduler.start());
        scheduler.cleanup_all().await;
    }

    #[tokio::test]
    async fn test_schedule_rejects_paths_outside_data_dir() {
        let (_dir, scheduler) = scheduler();
        let outside = tempdir().unwrap();
        let foreign = outside.path().join("victim.png");
        fs::write(&foreign, b"keep me").unwrap();

        let err = scheduler.schedule(&foreign, 0).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::PathTraversal));
        let err = scheduler
            .schedule(Path::new("../victim.png"), 1)
            .unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::PathTraversal));
        assert_eq!(scheduler.queue_len() + scheduler.pending_len(), 0);
        assert!(foreign.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_schedule_rejects_symlink_escaping_data_dir() {
        let (dir, scheduler) = scheduler();
        let outside = tempdir().unwrap();
        let target = outside.path().join("victim.png");
        fs::write(&target, b"keep me").unwrap();
        let link = dir.path().join("mirror_link.png");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = scheduler.schedule(&link, 0).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::PathTraversal));
        assert!(target.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeletable_entry_is_kept_for_retry() {
        let (dir, scheduler) = scheduler();
        let stuck = dir.path().join("mirror_left_to_right_dir.png");
        fs::create_dir(&stuck).unwrap();
        scheduler.schedule(&stuck, 1).unwrap();

        tokio::time::advance(Duration::from_secs(3600 + 1)).await;
        let report = scheduler.reap();
        assert_eq!((report.failed, report.remaining), (1, 1));

        let err = scheduler.inner.delete_confined(&stuck).unwrap_err();
        assert!(matches!(err, AppError::ResourceState(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_schedule_during_reap_loses_no_entry() {
        let (dir, scheduler) = scheduler();
        // Vanished files give every pass entries to drop.
        for i in 0..50 {
            let path = output(&dir, &format!("mirror_gone_{}.png", i));
            scheduler.schedule(&path, 1).unwrap();
            fs::remove_file(&path).unwrap();
        }
        let kept: Vec<PathBuf> = (0..200)
            .map(|i| output(&dir, &format!("mirror_kept_{}.png", i)))
            .collect();

        let reaper = {
            let scheduler = scheduler.clone();
            tokio::task::spawn_blocking(move || {
                for _ in 0..20 {
                    scheduler.reap();
                }
            })
        };
        let writers: Vec<_> = kept
            .chunks(50)
            .map(|chunk| {
                let scheduler = scheduler.clone();
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    for path in chunk {
                        scheduler.schedule(&path, 1).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        reaper.await.unwrap();

        let report = scheduler.reap();
        assert_eq!(report.remaining, 200);
        assert!(kept.iter().all(|p| p.exists()));
    }

    fn stuck_sweep(_: &DataDir, _: Duration) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(0)
    }

    #[tokio::test]
    async fn test_cleanup_all_aborts_unresponsive_loop() {
        let dir = tempdir().unwrap();
        let scheduler = CleanupScheduler::with_sweep(
            DataDir::open(dir.path()).unwrap(),
            SchedulerSettings {
                shutdown_timeout: Duration::from_millis(50),
                ..settings()
            },
            stuck_sweep,
        );
        assert!(scheduler.start());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        scheduler.cleanup_all().await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(lock(&scheduler.inner.loop_task).is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let config = PluginConfig {
            keep_files_hours: 0,
            cleanup_loop_interval: 120,
            cleanup_timeout: 2.5,
            ..PluginConfig::default()
        };
        let settings = SchedulerSettings::from_config(&config);
        assert_eq!(settings.loop_interval, Duration::from_secs(120));
        assert_eq!(settings.shutdown_timeout, Duration::from_millis(2500));
        assert_eq!(settings.stale_age, Duration::from_secs(3600));
    }
}
