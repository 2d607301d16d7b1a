//! Node runtime: wires services together and owns the background tasks.

use std::sync::Arc;
use std::time::Duration;

use confmesh_notify::{
    ConfigTemplating, EventWorker, NotificationHandler, RoomIndex, SubscriptionService,
};
use confmesh_store::{LeaderChecker, NodeId, Store};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::HousekeepingError;
use crate::lifecycle::ModuleLifecycle;
use crate::mutations::ConfigMutations;
use crate::phantom::{PhantomBackendCleaner, SweepReport};
use crate::retention::{BackupRetentionCleaner, EventRetentionCleaner};
use crate::scheduler::spawn_periodic;

/// Entry point for starting a node.
pub struct Node;

impl Node {
    /// Builds every service and spawns the periodic tasks.
    ///
    /// Fails without spawning anything if `config` does not validate.
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: NodeConfig,
        store: Arc<dyn Store>,
        leader: Arc<dyn LeaderChecker>,
        templating: Arc<dyn ConfigTemplating>,
    ) -> anyhow::Result<NodeHandle> {
        config.validate()?;
        let node_id = NodeId::new(config.node_id.clone());
        let store_timeout = config.store_timeout();
        let rooms = Arc::new(RoomIndex::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            rooms.clone(),
            templating.clone(),
            config.subscription_config(),
        ));
        let lifecycle = Arc::new(ModuleLifecycle::new(
            node_id.clone(),
            store.clone(),
            subscriptions.clone(),
            templating.clone(),
            store_timeout,
        ));
        let mutations = Arc::new(ConfigMutations::new(
            store.clone(),
            templating,
            store_timeout,
        ));
        let phantom = PhantomBackendCleaner::new(
            node_id.clone(),
            store.clone(),
            rooms.clone(),
            store_timeout,
        );

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let worker = EventWorker::new(
            store.clone(),
            NotificationHandler::new(subscriptions),
            config.worker_config(),
        );
        tasks.push(spawn_periodic(
            worker,
            Duration::from_millis(config.poll_interval_ms),
            cancel.clone(),
        ));
        tasks.push(spawn_periodic(
            phantom.clone(),
            Duration::from_secs(config.phantom_sweep_interval_secs),
            cancel.clone(),
        ));
        tasks.push(spawn_periodic(
            EventRetentionCleaner::new(
                store,
                leader.clone(),
                Duration::from_secs(config.event_ttl_secs),
                store_timeout,
            ),
            Duration::from_secs(config.event_cleanup_interval_secs),
            cancel.clone(),
        ));
        if let Some(dir) = &config.backup_dir {
            tasks.push(spawn_periodic(
                BackupRetentionCleaner::new(
                    dir.clone(),
                    leader,
                    Duration::from_secs(config.backup_ttl_secs),
                ),
                Duration::from_secs(config.backup_cleanup_interval_secs),
                cancel.clone(),
            ));
        }

        tracing::info!(node = %node_id, tasks = tasks.len(), "node started");
        Ok(NodeHandle {
            node_id,
            lifecycle,
            mutations,
            rooms,
            phantom,
            cancel,
            tasks,
        })
    }
}

/// Handle to a running node.
pub struct NodeHandle {
    node_id: NodeId,
    lifecycle: Arc<ModuleLifecycle>,
    mutations: Arc<ConfigMutations>,
    rooms: Arc<RoomIndex>,
    phantom: PhantomBackendCleaner,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Node identity.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Lifecycle service the transport calls into.
    pub fn lifecycle(&self) -> Arc<ModuleLifecycle> {
        self.lifecycle.clone()
    }

    /// Config write operations.
    pub fn mutations(&self) -> Arc<ConfigMutations> {
        self.mutations.clone()
    }

    /// Connections attached to this node.
    pub fn rooms(&self) -> Arc<RoomIndex> {
        self.rooms.clone()
    }

    /// Stops the periodic tasks and deletes every backend row this node owns.
    pub async fn shutdown(self) -> Result<SweepReport, HousekeepingError> {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "periodic task panicked");
            }
        }
        let report = self.phantom.delete_own_backends().await?;
        tracing::info!(node = %self.node_id, backends = report.deleted, "node stopped");
        Ok(report)
    }
}
