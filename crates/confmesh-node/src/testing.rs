//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use confmesh_notify::testing::{Emitted, RecordingConnection};
use confmesh_notify::{
    Connection, PlainTemplating, RoomIndex, SubscriptionConfig, SubscriptionService,
};
use confmesh_store::{MemoryStore, NodeId};
use tokio::sync::mpsc;

use crate::lifecycle::ModuleLifecycle;

pub fn connection(id: &str) -> (Arc<dyn Connection>, mpsc::UnboundedReceiver<Emitted>) {
    let (conn, rx) = RecordingConnection::new(id);
    let conn: Arc<dyn Connection> = conn;
    (conn, rx)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub subscriptions: Arc<SubscriptionService>,
    pub lifecycle: ModuleLifecycle,
}

pub fn harness(node_id: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let templating = Arc::new(PlainTemplating);
    let subscriptions = Arc::new(SubscriptionService::new(
        store.clone(),
        Arc::new(RoomIndex::new()),
        templating.clone(),
        SubscriptionConfig::default(),
    ));
    let lifecycle = ModuleLifecycle::new(
        NodeId::new(node_id),
        store.clone(),
        subscriptions.clone(),
        templating,
        Duration::from_secs(5),
    );
    Harness {
        store,
        subscriptions,
        lifecycle,
    }
}
