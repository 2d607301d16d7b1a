//! Maps compacted events onto subscription notifications.

use std::sync::Arc;

use confmesh_store::{Event, EventPayload};

use crate::subscription::ChangeNotifier;

/// Outcome of dispatching one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Events handed to the notifier.
    pub handled: usize,
    /// Events whose notification failed.
    pub failed: usize,
    /// Whether a routing notification was sent for the batch.
    pub routing_notified: bool,
}

/// Translates events into `NotifyX` calls.
pub struct NotificationHandler {
    notifier: Arc<dyn ChangeNotifier>,
}

impl NotificationHandler {
    /// Creates a handler dispatching to `notifier`.
    pub fn new(notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self { notifier }
    }

    /// Dispatches a compacted batch.
    ///
    /// Each event is handled on its own: a failure is logged and counted and
    /// the rest of the batch still runs. Any backend change in the batch
    /// triggers exactly one routing notification at the end.
    pub async fn handle(&self, events: &[Event]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut routing_changed = false;

        for event in events {
            let result = match &event.payload {
                EventPayload::ConfigUpdated { module_id } => {
                    self.notifier.notify_config_changed(*module_id).await
                }
                EventPayload::ModuleReady { module_id }
                | EventPayload::ModuleDisconnected { module_id } => {
                    routing_changed = true;
                    self.notifier.notify_backends_changed(*module_id).await
                }
            };
            report.handled += 1;
            if let Err(e) = result {
                report.failed += 1;
                tracing::warn!(
                    event_id = event.id,
                    kind = ?event.payload.kind(),
                    module_id = %event.payload.module_id(),
                    error = %e,
                    "event notification failed"
                );
            }
        }

        if routing_changed {
            report.routing_notified = true;
            if let Err(e) = self.notifier.notify_routing_changed().await {
                report.failed += 1;
                tracing::warn!(error = %e, "routing notification failed");
            }
        }

        report
    }
}
