//! Deferred deletion of converted artifacts.
//!
//! Each registered output gets one tokio task that sleeps for the retention
//! window and then deletes the file. Deletion goes through the idempotent
//! `ArtifactStore::delete`, so a timer racing an administrative purge is
//! harmless. The registry lock is a plain mutex and is never held across an
//! `.await`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use audiodrop_core::{LifecycleState, StoredName};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::store::{ArtifactRole, ArtifactStore, StoreError};

/// What to do with pending deletions when the service stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Cancel the timers and delete their files now.
    Drain,
    /// Cancel the timers and leave the files for the next startup's recovery.
    Abandon,
}

/// Outcome of a startup recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Leftover inputs from interrupted conversions, deleted immediately.
    pub inputs_removed: usize,
    /// Outputs from a previous run, re-armed with their remaining window.
    pub outputs_rearmed: usize,
}

struct PendingDeletion {
    path: PathBuf,
    expires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct Inner {
    store: ArtifactStore,
    window: Duration,
    pending: Mutex<HashMap<String, PendingDeletion>>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, PendingDeletion>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct RetentionScheduler {
    inner: Arc<Inner>,
}

fn expiry_after(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl RetentionScheduler {
    pub fn new(store: ArtifactStore, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                window,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Schedules deletion of `name` one retention window from now.
    ///
    /// Returns the instant the file becomes eligible for deletion. Arming a
    /// name that is already pending keeps the original timer.
    pub fn arm(&self, name: &StoredName) -> DateTime<Utc> {
        self.arm_after(name, self.inner.window)
    }

    /// Schedules deletion of `name` after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_after(&self, name: &StoredName, delay: Duration) -> DateTime<Utc> {
        let key = name.file_name();
        let mut pending = self.inner.registry();

        if let Some(existing) = pending.get(&key) {
            if !existing.handle.is_finished() {
                tracing::debug!(stored_name = %key, "Deletion already scheduled");
                return existing.expires_at;
            }
        }

        let path = self.inner.store.resolve(name);
        let expires_at = expiry_after(delay);

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task_path = path.clone();
        // Spawned while the registry is locked, so the task cannot unregister
        // itself before it has been registered.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.registry().remove(&task_key);

            tracing::debug!(
                stored_name = %task_key,
                state = %LifecycleState::Expired,
                "Lifecycle transition"
            );

            match inner.store.delete(&task_path).await {
                Ok(removed) => tracing::info!(
                    stored_name = %task_key,
                    state = %LifecycleState::Deleted,
                    already_gone = !removed,
                    "Retention window elapsed"
                ),
                Err(e) => tracing::warn!(
                    stored_name = %task_key,
                    error = %e,
                    "Failed to delete expired artifact"
                ),
            }
        });

        pending.insert(
            key.clone(),
            PendingDeletion {
                path,
                expires_at,
                handle,
            },
        );
        tracing::debug!(stored_name = %key, expires_at = %expires_at, "Deletion scheduled");

        expires_at
    }

    /// Cancels a pending deletion without touching the file.
    ///
    /// Returns whether a live timer was cancelled.
    pub fn cancel(&self, name: &StoredName) -> bool {
        let removed = self.inner.registry().remove(&name.file_name());
        match removed {
            Some(entry) => {
                let live = !entry.handle.is_finished();
                entry.handle.abort();
                live
            }
            None => false,
        }
    }

    /// Cancels the timer (if any) and deletes the file immediately.
    ///
    /// Returns whether a file was removed. Safe to call repeatedly.
    pub async fn purge(&self, name: &StoredName) -> Result<bool, StoreError> {
        self.cancel(name);
        let removed = self.inner.store.delete(&self.inner.store.resolve(name)).await?;
        if removed {
            tracing::info!(
                stored_name = %name,
                state = %LifecycleState::Deleted,
                "Artifact purged"
            );
        }
        Ok(removed)
    }

    /// Expiry instant of a pending deletion, if one is scheduled.
    pub fn expires_at(&self, name: &StoredName) -> Option<DateTime<Utc>> {
        self.inner
            .registry()
            .get(&name.file_name())
            .filter(|p| !p.handle.is_finished())
            .map(|p| p.expires_at)
    }

    /// Number of deletions still waiting for their window to elapse.
    pub fn pending(&self) -> usize {
        self.inner
            .registry()
            .values()
            .filter(|p| !p.handle.is_finished())
            .count()
    }

    /// Stops every pending timer. Returns how many were pending.
    pub async fn shutdown(&self, mode: ShutdownMode) -> usize {
        let drained: Vec<(String, PendingDeletion)> = self.inner.registry().drain().collect();
        let count = drained.len();

        for (key, entry) in drained {
            entry.handle.abort();
            if mode == ShutdownMode::Drain {
                match self.inner.store.delete(&entry.path).await {
                    Ok(_) => tracing::debug!(stored_name = %key, "Drained pending deletion"),
                    Err(e) => tracing::warn!(
                        stored_name = %key,
                        error = %e,
                        "Failed to drain pending deletion"
                    ),
                }
            }
        }

        tracing::info!(count, mode = ?mode, "Retention scheduler stopped");
        count
    }

    /// Re-establishes retention for files left by a previous run.
    ///
    /// Inputs can only be left behind by an interrupted conversion and are
    /// removed at once. Outputs are re-armed with whatever remains of their
    /// window measured from the file's modification time.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();

        for entry in self.inner.store.scan().await? {
            match entry.role {
                ArtifactRole::Input => {
                    self.inner.store.discard(&entry.path).await;
                    report.inputs_removed += 1;
                }
                ArtifactRole::Output => {
                    let age = (now - entry.modified).to_std().unwrap_or(Duration::ZERO);
                    let remaining = self.inner.window.saturating_sub(age);
                    self.arm_after(&entry.name, remaining);
                    report.outputs_rearmed += 1;
                }
            }
        }

        tracing::info!(
            inputs_removed = report.inputs_removed,
            outputs_rearmed = report.outputs_rearmed,
            "Recovered artifacts from previous run"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiodrop_core::{IdAllocator, RandomIdAllocator};
    use tempfile::TempDir;

    async fn write_output(store: &ArtifactStore, display: &str) -> StoredName {
        let name = StoredName::new(RandomIdAllocator.allocate(), display);
        tokio::fs::write(store.resolve(&name), b"mp3 bytes").await.unwrap();
        name
    }

    #[tokio::test]
    async fn test_timer_deletes_after_window() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_millis(50));
        let name = write_output(&store, "song.mp3").await;

        scheduler.arm(&name);
        assert_eq!(scheduler.pending(), 1);
        assert!(store.exists(&store.resolve(&name)).await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!store.exists(&store.resolve(&name)).await);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_rearm_keeps_first_expiry() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_secs(60));
        let name = write_output(&store, "song.mp3").await;

        let first = scheduler.arm(&name);
        let second = scheduler.arm_after(&name, Duration::from_secs(3600));

        assert_eq!(first, second);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.expires_at(&name), Some(first));
    }

    #[tokio::test]
    async fn test_cancel_keeps_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_millis(50));
        let name = write_output(&store, "song.mp3").await;

        scheduler.arm(&name);
        assert!(scheduler.cancel(&name));
        assert!(!scheduler.cancel(&name));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.exists(&store.resolve(&name)).await);
    }

    #[tokio::test]
    async fn test_purge_then_timer_fire_is_harmless() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_millis(50));
        let doomed = write_output(&store, "a.mp3").await;
        let other = write_output(&store, "b.mp3").await;

        // Simulate a manual delete racing the timer: remove the file behind
        // the scheduler's back, then let the timer fire.
        scheduler.arm(&doomed);
        assert!(store.delete(&store.resolve(&doomed)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!scheduler.purge(&doomed).await.unwrap());
        assert!(store.exists(&store.resolve(&other)).await);
    }

    #[tokio::test]
    async fn test_purge_removes_immediately() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_secs(60));
        let name = write_output(&store, "song.mp3").await;

        scheduler.arm(&name);
        assert!(scheduler.purge(&name).await.unwrap());
        assert!(!scheduler.purge(&name).await.unwrap());
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drain_deletes_pending() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_secs(60));
        let a = write_output(&store, "a.mp3").await;
        let b = write_output(&store, "b.mp3").await;
        scheduler.arm(&a);
        scheduler.arm(&b);

        assert_eq!(scheduler.shutdown(ShutdownMode::Drain).await, 2);
        assert!(!store.exists(&store.resolve(&a)).await);
        assert!(!store.exists(&store.resolve(&b)).await);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_abandon_keeps_files() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_secs(60));
        let a = write_output(&store, "a.mp3").await;
        scheduler.arm(&a);

        assert_eq!(scheduler.shutdown(ShutdownMode::Abandon).await, 1);
        assert!(store.exists(&store.resolve(&a)).await);
    }

    #[tokio::test]
    async fn test_recover_removes_inputs_and_rearms_outputs() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = RandomIdAllocator.allocate();
        let input = StoredName::new(id, "song.m4a");
        let output = StoredName::new(id, "song.mp3");
        tokio::fs::write(store.resolve(&input), b"in").await.unwrap();
        tokio::fs::write(store.resolve(&output), b"out").await.unwrap();
        tokio::fs::write(dir.path().join("someone-elses-file.mp3"), b"x").await.unwrap();

        let scheduler = RetentionScheduler::new(store.clone(), Duration::from_millis(100));
        let report = scheduler.recover().await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                inputs_removed: 1,
                outputs_rearmed: 1
            }
        );
        assert!(!store.exists(&store.resolve(&input)).await);
        assert!(store.exists(&store.resolve(&output)).await);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!store.exists(&store.resolve(&output)).await);
        assert!(dir.path().join("someone-elses-file.mp3").exists());
    }
}
