//! Transport-facing connection abstraction.
//!
//! The wire transport (framing, heartbeats, reconnects) lives outside this
//! crate. It hands every accepted client to the node as an implementation of
//! [`Connection`]; the node wraps it in a [`Session`] that carries the
//! per-connection context the lifecycle state machine needs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use confmesh_store::{Backend, ConnectionId, ModuleId};
use parking_lot::Mutex;

use crate::error::TransportError;

/// Event name carrying the rendered effective config of the module.
pub const CONFIG_CHANGED_EVENT: &str = "config:sendConfigChanged";
/// Event name carrying the backend list of a required module.
pub const BACKENDS_CHANGED_EVENT: &str = "config:sendModuleReady";
/// Event name carrying the full routing table.
pub const ROUTING_CHANGED_EVENT: &str = "config:sendRoutes";
/// Event name carrying a handshake failure before teardown.
pub const ERROR_EVENT: &str = "config:error";

/// An established client connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Transport-assigned identity, unique on this node.
    fn id(&self) -> &ConnectionId;

    /// Sends one named event with an opaque payload.
    async fn emit(&self, event: &str, payload: Bytes) -> Result<(), TransportError>;
}

/// Values stashed on a connection as it moves through its lifecycle.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    /// Resolved on connect.
    pub module_id: Option<ModuleId>,
    /// Declared on connect.
    pub module_name: Option<String>,
    /// Registered on ready.
    pub backend: Option<Backend>,
}

/// A connection plus its lifecycle context.
pub struct Session {
    conn: Arc<dyn Connection>,
    context: Mutex<SessionContext>,
}

impl Session {
    /// Wraps a freshly accepted connection.
    pub fn new(conn: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new(Self {
            conn,
            context: Mutex::new(SessionContext::default()),
        })
    }

    /// Connection identity.
    pub fn id(&self) -> &ConnectionId {
        self.conn.id()
    }

    /// Sends one event to the peer.
    pub async fn emit(&self, event: &str, payload: Bytes) -> Result<(), TransportError> {
        self.conn.emit(event, payload).await
    }

    /// Copy of the current context.
    pub fn context(&self) -> SessionContext {
        self.context.lock().clone()
    }

    /// Module resolved on connect, if any.
    pub fn module_id(&self) -> Option<ModuleId> {
        self.context.lock().module_id
    }

    /// Records the module this connection belongs to.
    pub fn set_module(&self, id: ModuleId, name: &str) {
        let mut ctx = self.context.lock();
        ctx.module_id = Some(id);
        ctx.module_name = Some(name.to_string());
    }

    /// Backend registered on ready, if any.
    pub fn backend(&self) -> Option<Backend> {
        self.context.lock().backend.clone()
    }

    /// Records the backend registered for this connection.
    pub fn set_backend(&self, backend: Backend) {
        self.context.lock().backend = Some(backend);
    }

    /// Removes and returns the registered backend.
    pub fn take_backend(&self) -> Option<Backend> {
        self.context.lock().backend.take()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", self.id())
            .field("context", &*self.context.lock())
            .finish()
    }
}
