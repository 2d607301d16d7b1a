//! Phantom backend reconciliation.
//!
//! A node that crashes never runs its disconnect handlers, so backend rows it
//! created stay in the store. Ownership of a row is pinned to the node named in
//! `config_service_node_id`, and only that node's connection table can say
//! whether the row is still alive. Every node therefore sweeps its own rows and
//! nothing else.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use confmesh_notify::RoomIndex;
use confmesh_store::{
    with_deadline, Backend, BackendRepository, ConnectionId, Consistency, EventLog, EventPayload,
    ModuleId, NodeId, Store,
};

use crate::error::HousekeepingError;

/// Result of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows owned by this node that were inspected.
    pub checked: usize,
    /// Rows deleted.
    pub deleted: usize,
    /// Distinct modules a `ModuleDisconnected` event was appended for.
    pub modules: Vec<ModuleId>,
}

/// Deletes backend rows of this node whose connection is gone.
#[derive(Clone)]
pub struct PhantomBackendCleaner {
    node_id: NodeId,
    store: Arc<dyn Store>,
    rooms: Arc<RoomIndex>,
    store_timeout: Duration,
}

impl PhantomBackendCleaner {
    /// Creates a cleaner for the rows owned by `node_id`.
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn Store>,
        rooms: Arc<RoomIndex>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            store,
            rooms,
            store_timeout,
        }
    }

    /// Deletes every owned row whose connection is not registered locally.
    pub async fn clear_phantom_backends(&self) -> Result<SweepReport, HousekeepingError> {
        let owned = self.owned_backends().await?;
        let checked = owned.len();
        let phantoms: Vec<Backend> = owned
            .into_iter()
            .filter(|b| !self.rooms.is_connected(&b.ws_connection_id))
            .collect();

        let mut report = self.remove(phantoms).await?;
        report.checked = checked;
        if report.deleted > 0 {
            tracing::info!(
                node = %self.node_id,
                checked,
                deleted = report.deleted,
                modules = report.modules.len(),
                "phantom backends removed"
            );
        }
        Ok(report)
    }

    /// Deletes every row owned by this node regardless of connection state.
    /// Runs on graceful shutdown.
    pub async fn delete_own_backends(&self) -> Result<SweepReport, HousekeepingError> {
        let owned = self.owned_backends().await?;
        let checked = owned.len();
        let mut report = self.remove(owned).await?;
        report.checked = checked;
        tracing::info!(node = %self.node_id, deleted = report.deleted, "own backends removed");
        Ok(report)
    }

    async fn owned_backends(&self) -> Result<Vec<Backend>, HousekeepingError> {
        Ok(with_deadline(
            self.store_timeout,
            "backends_by_node",
            self.store.backends_by_node(&self.node_id, Consistency::Weak),
        )
        .await?)
    }

    async fn remove(&self, backends: Vec<Backend>) -> Result<SweepReport, HousekeepingError> {
        if backends.is_empty() {
            return Ok(SweepReport::default());
        }
        let connection_ids: Vec<ConnectionId> =
            backends.iter().map(|b| b.ws_connection_id.clone()).collect();
        let modules: BTreeSet<ModuleId> = backends.iter().map(|b| b.module_id).collect();

        let deleted = with_deadline(
            self.store_timeout,
            "delete_backends",
            self.store.delete_backends(&connection_ids),
        )
        .await?;

        let modules: Vec<ModuleId> = modules.into_iter().collect();
        let payloads = modules
            .iter()
            .map(|&module_id| EventPayload::ModuleDisconnected { module_id })
            .collect();
        with_deadline(
            self.store_timeout,
            "append_events",
            self.store.append_events(payloads),
        )
        .await?;

        Ok(SweepReport {
            checked: 0,
            deleted: deleted.len(),
            modules,
        })
    }
}
