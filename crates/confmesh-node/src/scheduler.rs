//! Periodic background tasks.

use std::time::Duration;

use async_trait::async_trait;
use confmesh_notify::EventWorker;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::phantom::PhantomBackendCleaner;
use crate::retention::{BackupRetentionCleaner, EventRetentionCleaner};

/// A unit of work run on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs once. An error is logged and the next tick retries.
    async fn tick(&mut self) -> anyhow::Result<()>;
}

/// Runs `task` every `period` until `cancel` fires.
///
/// The first tick fires immediately. Ticks missed while a run is still in
/// progress are skipped rather than bunched up.
pub fn spawn_periodic<T: PeriodicTask>(
    mut task: T,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(
            task = task.name(),
            period_ms = period.as_millis() as u64,
            "periodic task started"
        );

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                _ = interval.tick() => {
                    if let Err(e) = task.tick().await {
                        tracing::error!(task = task.name(), error = %e, "periodic task failed");
                    }
                }
            }
        }
        tracing::debug!(task = task.name(), "periodic task stopped");
    })
}

#[async_trait]
impl PeriodicTask for EventWorker {
    fn name(&self) -> &'static str {
        "event-worker"
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.poll_once().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for PhantomBackendCleaner {
    fn name(&self) -> &'static str {
        "phantom-cleaner"
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.clear_phantom_backends().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for EventRetentionCleaner {
    fn name(&self) -> &'static str {
        "event-retention"
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.run().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for BackupRetentionCleaner {
    fn name(&self) -> &'static str {
        "backup-retention"
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.run().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&mut self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("tick failed");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_periodic(
            Counter {
                runs: runs.clone(),
                fail: false,
            },
            Duration::from_secs(1),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let handle = spawn_periodic(
            Counter {
                runs: runs.clone(),
                fail: true,
            },
            Duration::from_secs(1),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
