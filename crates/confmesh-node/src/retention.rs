//! Leader-gated retention of the event log and store backups.
//!
//! Only the current Raft leader deletes. Followers skip the run entirely. The
//! leadership answer may be stale by the time the delete lands, which is fine:
//! deleting rows or files that are already gone is a no-op.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use confmesh_store::{with_deadline, EventLog, LeaderChecker, Store, Timestamp};

use crate::error::HousekeepingError;

/// Result of one retention run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// This node is not the leader; nothing was touched.
    Skipped,
    /// Number of events or files deleted.
    Cleaned(u64),
}

/// Deletes events older than a TTL.
pub struct EventRetentionCleaner {
    store: Arc<dyn Store>,
    leader: Arc<dyn LeaderChecker>,
    ttl: Duration,
    store_timeout: Duration,
}

impl EventRetentionCleaner {
    /// Creates a cleaner removing events older than `ttl`.
    pub fn new(
        store: Arc<dyn Store>,
        leader: Arc<dyn LeaderChecker>,
        ttl: Duration,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            leader,
            ttl,
            store_timeout,
        }
    }

    /// Runs against the current time.
    pub async fn run(&self) -> Result<CleanupOutcome, HousekeepingError> {
        self.run_at(Timestamp::now()).await
    }

    /// Deletes events created before `now - ttl`.
    pub async fn run_at(&self, now: Timestamp) -> Result<CleanupOutcome, HousekeepingError> {
        if !self.leader.is_leader() {
            tracing::debug!("not leader, skipping event retention");
            return Ok(CleanupOutcome::Skipped);
        }
        let cutoff = now.saturating_sub(self.ttl);
        let deleted = with_deadline(
            self.store_timeout,
            "delete_events_before",
            self.store.delete_events_before(cutoff),
        )
        .await?;
        if deleted > 0 {
            tracing::info!(deleted, ttl_secs = self.ttl.as_secs(), "expired events deleted");
        }
        Ok(CleanupOutcome::Cleaned(deleted))
    }
}

/// Deletes backup files whose modification time is older than a TTL.
pub struct BackupRetentionCleaner {
    dir: PathBuf,
    leader: Arc<dyn LeaderChecker>,
    ttl: Duration,
}

impl BackupRetentionCleaner {
    /// Creates a cleaner for the files directly inside `dir`.
    pub fn new(dir: impl Into<PathBuf>, leader: Arc<dyn LeaderChecker>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            leader,
            ttl,
        }
    }

    /// Runs against the current time.
    pub async fn run(&self) -> Result<CleanupOutcome, HousekeepingError> {
        self.run_at(SystemTime::now()).await
    }

    /// Deletes regular files modified before `now - ttl`. Subdirectories are
    /// left alone. A missing directory counts as nothing to clean.
    pub async fn run_at(&self, now: SystemTime) -> Result<CleanupOutcome, HousekeepingError> {
        if !self.leader.is_leader() {
            tracing::debug!("not leader, skipping backup retention");
            return Ok(CleanupOutcome::Skipped);
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CleanupOutcome::Cleaned(0));
            }
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0u64;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or_default();
            if age <= self.ttl {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to delete backup");
                }
            }
        }

        if deleted > 0 {
            tracing::info!(dir = %self.dir.display(), deleted, "expired backups deleted");
        }
        Ok(CleanupOutcome::Cleaned(deleted))
    }
}
