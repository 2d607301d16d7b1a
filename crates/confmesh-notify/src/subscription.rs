//! Subscription service: room membership plus notification fanout.
//!
//! Every notification re-reads the current authoritative state with
//! `Consistency::None` and pushes a full snapshot; nothing here applies event
//! payloads as deltas. Emits to individual connections run on their own
//! tasks with their own deadline, so one stuck peer never delays the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use confmesh_store::{
    with_deadline, Backend, BackendRepository, Config, ConfigRepository, Consistency, Endpoint,
    ModuleId, Store,
};
use serde::{Deserialize, Serialize};

use crate::connection::{
    Session, BACKENDS_CHANGED_EVENT, CONFIG_CHANGED_EVENT, ROUTING_CHANGED_EVENT,
};
use crate::error::{NotifyError, TransportError};
use crate::rooms::{Room, RoomIndex};
use crate::templating::ConfigTemplating;

/// Deadlines applied by the subscription service.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Deadline for one snapshot read.
    pub store_timeout: Duration,
    /// Deadline for one emit to one connection.
    pub emit_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            emit_timeout: Duration::from_secs(5),
        }
    }
}

/// One reachable instance in a backends snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAddress {
    /// `host:port`.
    pub address: String,
    /// Module version.
    pub version: String,
    /// Client library version.
    pub lib_version: String,
    /// Served endpoints.
    pub endpoints: Vec<Endpoint>,
}

/// Payload of [`BACKENDS_CHANGED_EVENT`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsSnapshot {
    /// Module whose backends are listed.
    pub module_id: ModuleId,
    /// Every live backend of the module.
    pub backends: Vec<BackendAddress>,
}

impl BackendsSnapshot {
    fn from_backends(module_id: ModuleId, backends: Vec<Backend>) -> Self {
        Self {
            module_id,
            backends: backends
                .into_iter()
                .map(|b| BackendAddress {
                    address: b.address,
                    version: b.version,
                    lib_version: b.lib_version,
                    endpoints: b.endpoints,
                })
                .collect(),
        }
    }

    /// Addresses in snapshot order.
    pub fn addresses(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.address.as_str()).collect()
    }
}

/// One entry of the routing table payload ([`ROUTING_CHANGED_EVENT`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    /// Module id.
    pub module_id: ModuleId,
    /// Module name.
    pub module_name: String,
    /// `host:port`.
    pub address: String,
    /// Module version.
    pub version: String,
    /// Served endpoints.
    pub endpoints: Vec<Endpoint>,
}

impl From<Backend> for RouteEntry {
    fn from(b: Backend) -> Self {
        Self {
            module_id: b.module_id,
            module_name: b.module_name,
            address: b.address,
            version: b.version,
            endpoints: b.endpoints,
        }
    }
}

/// Target of the notification handler.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    /// Pushes the active config of `module_id` to its config room.
    async fn notify_config_changed(&self, module_id: ModuleId) -> Result<(), NotifyError>;

    /// Pushes the backend list of `module_id` to its dependents.
    async fn notify_backends_changed(&self, module_id: ModuleId) -> Result<(), NotifyError>;

    /// Pushes the full routing table to the routing room.
    async fn notify_routing_changed(&self) -> Result<(), NotifyError>;
}

/// Room membership and snapshot fanout for connections on this node.
pub struct SubscriptionService {
    store: Arc<dyn Store>,
    rooms: Arc<RoomIndex>,
    templating: Arc<dyn ConfigTemplating>,
    config: SubscriptionConfig,
}

impl SubscriptionService {
    /// Creates a service over the given store and room index.
    pub fn new(
        store: Arc<dyn Store>,
        rooms: Arc<RoomIndex>,
        templating: Arc<dyn ConfigTemplating>,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            store,
            rooms,
            templating,
            config,
        }
    }

    /// The room index this service fans out to.
    pub fn rooms(&self) -> &Arc<RoomIndex> {
        &self.rooms
    }

    /// Sends the current config to `session`, then joins it to the config room.
    pub async fn subscribe_to_config_changes(
        &self,
        session: &Arc<Session>,
        module_id: ModuleId,
    ) -> Result<(), NotifyError> {
        let config = self.active_config(module_id).await?;
        self.subscribe_with_config(session, &config).await
    }

    /// Sends `config` as the baseline, then joins the config room of its module.
    ///
    /// For callers that already hold the config they just read or wrote, so
    /// the baseline does not depend on a lagging local replica.
    pub async fn subscribe_with_config(
        &self,
        session: &Arc<Session>,
        config: &Config,
    ) -> Result<(), NotifyError> {
        let payload = self.templating.render(config)?;
        self.emit_one(session, CONFIG_CHANGED_EVENT, payload).await?;
        self.rooms.join(Room::ConfigChanging(config.module_id), session.id());
        Ok(())
    }

    /// Sends the current backends of `module_id` to `session`, then joins it
    /// to that module's backends room.
    pub async fn subscribe_to_backends_changes(
        &self,
        session: &Arc<Session>,
        module_id: ModuleId,
    ) -> Result<(), NotifyError> {
        let payload = self.backends_snapshot(module_id).await?;
        self.emit_one(session, BACKENDS_CHANGED_EVENT, payload).await?;
        self.rooms.join(Room::BackendsChanging(module_id), session.id());
        Ok(())
    }

    /// Sends the current routing table to `session`, then joins it to the routing room.
    pub async fn subscribe_to_routing_changes(
        &self,
        session: &Arc<Session>,
    ) -> Result<(), NotifyError> {
        let payload = self.routing_snapshot().await?;
        self.emit_one(session, ROUTING_CHANGED_EVENT, payload).await?;
        self.rooms.join(Room::RoutingChanging, session.id());
        Ok(())
    }

    async fn active_config(&self, module_id: ModuleId) -> Result<Config, NotifyError> {
        with_deadline(
            self.config.store_timeout,
            "active_config",
            self.store.active_config(module_id, Consistency::None),
        )
        .await?
        .ok_or(NotifyError::NoActiveConfig(module_id))
    }

    async fn config_snapshot(&self, module_id: ModuleId) -> Result<Bytes, NotifyError> {
        let config = self.active_config(module_id).await?;
        Ok(self.templating.render(&config)?)
    }

    async fn backends_snapshot(&self, module_id: ModuleId) -> Result<Bytes, NotifyError> {
        let backends = with_deadline(
            self.config.store_timeout,
            "backends_by_module",
            self.store.backends_by_module(module_id, Consistency::None),
        )
        .await?;
        let snapshot = BackendsSnapshot::from_backends(module_id, backends);
        Ok(Bytes::from(serde_json::to_vec(&snapshot)?))
    }

    async fn routing_snapshot(&self) -> Result<Bytes, NotifyError> {
        let backends = with_deadline(
            self.config.store_timeout,
            "all_backends",
            self.store.all_backends(Consistency::None),
        )
        .await?;
        let routes: Vec<RouteEntry> = backends.into_iter().map(RouteEntry::from).collect();
        Ok(Bytes::from(serde_json::to_vec(&routes)?))
    }

    async fn emit_one(
        &self,
        session: &Session,
        event: &str,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let timeout = self.config.emit_timeout;
        match tokio::time::timeout(timeout, session.emit(event, payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::EmitTimeout {
                conn: session.id().clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Spawns one emit task per session and returns without waiting.
    fn broadcast(
        &self,
        room: &Room,
        sessions: Vec<Arc<Session>>,
        event: &'static str,
        payload: Bytes,
    ) {
        tracing::debug!(room = %room, connections = sessions.len(), event, "broadcasting snapshot");
        let timeout = self.config.emit_timeout;
        for session in sessions {
            let payload = payload.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, session.emit(event, payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(conn = %session.id(), event, error = %e, "emit failed");
                    }
                    Err(_) => {
                        tracing::warn!(
                            conn = %session.id(),
                            event,
                            timeout_ms = timeout.as_millis() as u64,
                            "emit timed out"
                        );
                    }
                }
            });
        }
    }
}

#[async_trait]
impl ChangeNotifier for SubscriptionService {
    async fn notify_config_changed(&self, module_id: ModuleId) -> Result<(), NotifyError> {
        let room = Room::ConfigChanging(module_id);
        let sessions = self.rooms.members(&room);
        if sessions.is_empty() {
            return Ok(());
        }
        let payload = self.config_snapshot(module_id).await?;
        self.broadcast(&room, sessions, CONFIG_CHANGED_EVENT, payload);
        Ok(())
    }

    async fn notify_backends_changed(&self, module_id: ModuleId) -> Result<(), NotifyError> {
        let room = Room::BackendsChanging(module_id);
        let sessions = self.rooms.members(&room);
        if sessions.is_empty() {
            return Ok(());
        }
        let payload = self.backends_snapshot(module_id).await?;
        self.broadcast(&room, sessions, BACKENDS_CHANGED_EVENT, payload);
        Ok(())
    }

    async fn notify_routing_changed(&self) -> Result<(), NotifyError> {
        let room = Room::RoutingChanging;
        let sessions = self.rooms.members(&room);
        if sessions.is_empty() {
            return Ok(());
        }
        let payload = self.routing_snapshot().await?;
        self.broadcast(&room, sessions, ROUTING_CHANGED_EVENT, payload);
        Ok(())
    }
}
