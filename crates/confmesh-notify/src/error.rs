//! Error types for the notification pipeline.

use confmesh_store::{ConnectionId, ModuleId, StoreError};
use thiserror::Error;

use crate::templating::TemplateError;

/// Errors raised by the transport when talking to one connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone.
    #[error("connection {0} closed")]
    ConnectionClosed(ConnectionId),

    /// The emit did not finish before its deadline.
    #[error("emit to {conn} timed out after {timeout_ms}ms")]
    EmitTimeout {
        /// Target connection.
        conn: ConnectionId,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// Any other transport failure.
    #[error("send failed: {reason}")]
    SendFailed {
        /// Human-readable cause.
        reason: String,
    },
}

/// Errors raised while computing or delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Reading current state from the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Delivering to a connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The snapshot could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The effective config could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The module has no active config to send.
    #[error("module {0} has no active config")]
    NoActiveConfig(ModuleId),
}
