//! Error types for the node subsystem.

use confmesh_notify::{NotifyError, TemplateError};
use confmesh_store::{ConnectionId, StoreError};
use thiserror::Error;

/// Errors raised by connection lifecycle transitions.
///
/// The transport tears the connection down on any of these. Store-side
/// progress made before the failure is kept.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A transition that needs the module identity ran before connect.
    #[error("connection {0} has not identified its module")]
    NotIdentified(ConnectionId),

    /// The declared module name is empty.
    #[error("module name must not be empty")]
    InvalidModuleName,

    /// The declared backend address is not `host:port`.
    #[error("invalid backend address '{0}'")]
    InvalidAddress(String),

    /// The default config references variables that do not exist.
    #[error("missing config variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// The default config could not be parsed for variable references.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A declaration could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store rejected or timed out a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A baseline snapshot could not be sent.
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

impl LifecycleError {
    /// True for errors caused by what the module declared rather than by
    /// infrastructure. These are reported back to the module before teardown.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotIdentified(_)
                | LifecycleError::InvalidModuleName
                | LifecycleError::InvalidAddress(_)
                | LifecycleError::MissingVariables(_)
                | LifecycleError::Template(_)
                | LifecycleError::Notify(NotifyError::NoActiveConfig(_))
        )
    }
}

/// Errors raised by periodic housekeeping.
#[derive(Debug, Error)]
pub enum HousekeepingError {
    /// The store rejected or timed out a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Backup directory access failed.
    #[error("backup directory error: {0}")]
    Io(#[from] std::io::Error),
}
