//! Event log poller.
//!
//! Every node runs one worker. It reads the shared event log with a local
//! (`Consistency::None`) read, compacts the batch, dispatches notifications
//! to connections on this node and advances an in-memory cursor. The cursor
//! starts at zero after a restart, so the first poll replays one window of
//! recent history; handlers re-read current state, so replays are harmless.

use std::sync::Arc;
use std::time::Duration;

use confmesh_store::{with_deadline, Consistency, EventId, EventLog, FetchOrder, Store};

use crate::compactor::compact;
use crate::error::NotifyError;
use crate::handler::{DispatchReport, NotificationHandler};

/// Configuration for the event worker.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Maximum events read per poll.
    pub limit: usize,
    /// Which window above the cursor to read.
    ///
    /// `NewestFirst` takes the highest ids: a node that is more than `limit`
    /// events behind skips the oldest pending ones and only catches up on
    /// keys that change again. `OldestFirst` never skips.
    pub order: FetchOrder,
    /// Deadline for the log read.
    pub store_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            order: FetchOrder::OldestFirst,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one poll.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Rows read from the log.
    pub fetched: usize,
    /// Rows left after compaction.
    pub dispatched: usize,
    /// Cursor after the poll.
    pub cursor: EventId,
    /// Dispatch details.
    pub report: DispatchReport,
}

/// Polls the event log and drives notifications. Owns its cursor exclusively.
pub struct EventWorker {
    store: Arc<dyn Store>,
    handler: NotificationHandler,
    config: WorkerConfig,
    cursor: EventId,
}

impl EventWorker {
    /// Creates a worker starting at cursor zero.
    pub fn new(store: Arc<dyn Store>, handler: NotificationHandler, config: WorkerConfig) -> Self {
        Self {
            store,
            handler,
            config,
            cursor: 0,
        }
    }

    /// Last event id this worker has consumed.
    pub fn cursor(&self) -> EventId {
        self.cursor
    }

    /// Runs one poll. Safe to call repeatedly on a fixed interval.
    ///
    /// On a store error the cursor is left unchanged and the error returned;
    /// the next call retries the same window.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, NotifyError> {
        let mut events = with_deadline(
            self.config.store_timeout,
            "events_after",
            self.store.events_after(
                self.cursor,
                self.config.limit,
                self.config.order,
                Consistency::None,
            ),
        )
        .await?;

        if events.is_empty() {
            return Ok(PollOutcome {
                cursor: self.cursor,
                ..PollOutcome::default()
            });
        }

        if self.config.order == FetchOrder::NewestFirst {
            events.reverse();
        }
        let fetched = events.len();
        let max_id = events.iter().map(|e| e.id).max().unwrap_or(self.cursor);

        let batch = compact(events);
        let report = self.handler.handle(&batch).await;
        self.cursor = self.cursor.max(max_id);

        tracing::debug!(
            fetched,
            dispatched = batch.len(),
            failed = report.failed,
            cursor = self.cursor,
            "event batch processed"
        );

        Ok(PollOutcome {
            fetched,
            dispatched: batch.len(),
            cursor: self.cursor,
            report,
        })
    }
}
