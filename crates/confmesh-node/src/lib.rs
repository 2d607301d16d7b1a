#![warn(missing_docs)]

//! Confmesh node subsystem: connection lifecycle, config mutations, phantom reconciliation,
//! leader-gated housekeeping

pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod mutations;
pub mod node;
pub mod phantom;
pub mod retention;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{LogFormat, NodeConfig};
pub use error::{HousekeepingError, LifecycleError};
pub use lifecycle::{
    BackendDeclaration, ConfigSchemaDeclaration, ModuleLifecycle, ModuleRequirements,
};
pub use mutations::ConfigMutations;
pub use node::{Node, NodeHandle};
pub use phantom::{PhantomBackendCleaner, SweepReport};
pub use retention::{BackupRetentionCleaner, CleanupOutcome, EventRetentionCleaner};
pub use scheduler::{spawn_periodic, PeriodicTask};
