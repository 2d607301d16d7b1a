//! Raft leadership as seen by node-local housekeeping.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether this node currently holds Raft leadership.
///
/// The answer is advisory: it may already be stale when acted upon, so
/// callers must only gate idempotent work on it.
pub trait LeaderChecker: Send + Sync {
    /// Returns true if this node is the current leader.
    fn is_leader(&self) -> bool;
}

/// Leadership fixed at construction. Single-node deployments and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticLeader(pub bool);

impl LeaderChecker for StaticLeader {
    fn is_leader(&self) -> bool {
        self.0
    }
}

/// Leadership flag flipped by the consensus layer on role changes.
#[derive(Debug, Default)]
pub struct SwitchableLeader {
    leader: AtomicBool,
}

impl SwitchableLeader {
    /// Creates a flag with the given initial role.
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    /// Records a role change.
    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            tracing::info!(leader, "raft leadership changed");
        }
    }
}

impl LeaderChecker for SwitchableLeader {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
