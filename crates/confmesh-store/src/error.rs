//! Error types for the replicated store layer.

use thiserror::Error;

/// Errors returned by store repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name (e.g. "config").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The operation did not finish before its deadline.
    #[error("store {op} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        op: &'static str,
        /// Deadline that expired.
        timeout_ms: u64,
    },

    /// A write or leader-routed read reached a node that is not the leader.
    #[error("not the raft leader")]
    NotLeader {
        /// Hint about the current leader
        leader_hint: Option<String>,
    },

    /// The store is unreachable or rejected the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures worth retrying on the next scheduled run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout { .. } | StoreError::NotLeader { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Timeout {
            op: "select",
            timeout_ms: 10
        }
        .is_transient());
        assert!(!StoreError::NotFound {
            entity: "module",
            id: "x".into()
        }
        .is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = StoreError::Timeout {
            op: "events_after",
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "store events_after timed out after 250ms");
    }
}
