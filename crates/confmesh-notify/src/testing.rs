//! Connection doubles for tests in this crate and its dependents.
//!
//! Enabled outside this crate with the `test-util` feature.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use confmesh_store::ConnectionId;
use tokio::sync::mpsc;

use crate::connection::{Connection, Session};
use crate::error::TransportError;

/// One recorded emit.
#[derive(Clone, Debug)]
pub struct Emitted {
    /// Event name.
    pub event: String,
    /// Payload as sent.
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    Record,
    Fail,
    Hang,
}

/// Connection that records emits on a channel, or misbehaves on demand.
pub struct RecordingConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Emitted>,
    behavior: Behavior,
}

impl RecordingConnection {
    /// A connection that delivers every emit to the returned receiver.
    pub fn new(id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Emitted>) {
        Self::build(id, Behavior::Record)
    }

    /// A connection whose every emit fails as if the peer had closed.
    pub fn failing(id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Emitted>) {
        Self::build(id, Behavior::Fail)
    }

    /// A connection whose emits never complete.
    pub fn hanging(id: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Emitted>) {
        Self::build(id, Behavior::Hang)
    }

    fn build(id: &str, behavior: Behavior) -> (Arc<Self>, mpsc::UnboundedReceiver<Emitted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id: ConnectionId::new(id),
            tx,
            behavior,
        });
        (conn, rx)
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn emit(&self, event: &str, payload: Bytes) -> Result<(), TransportError> {
        match self.behavior {
            Behavior::Fail => Err(TransportError::ConnectionClosed(self.id.clone())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Record => self
                .tx
                .send(Emitted {
                    event: event.to_string(),
                    payload,
                })
                .map_err(|_| TransportError::ConnectionClosed(self.id.clone())),
        }
    }
}

/// A recording connection already wrapped in a session.
pub fn session(id: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<Emitted>) {
    let (conn, rx) = RecordingConnection::new(id);
    (Session::new(conn), rx)
}
