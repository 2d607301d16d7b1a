#![warn(missing_docs)]

//! Confmesh store subsystem: entities, replicated store repositories, consistency levels,
//! leadership

pub mod deadline;
pub mod error;
pub mod leader;
pub mod memory;
pub mod repo;
pub mod types;

pub use deadline::with_deadline;
pub use error::{Result, StoreError};
pub use leader::{LeaderChecker, StaticLeader, SwitchableLeader};
pub use memory::MemoryStore;
pub use repo::{
    BackendRepository, ConfigRepository, EventLog, ModuleRepository, SchemaRepository, Store,
    VariableRepository,
};
pub use types::*;
