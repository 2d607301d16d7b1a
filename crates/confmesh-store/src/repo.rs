//! Narrow repository interfaces over the replicated relational store.
//!
//! The consensus engine, SQL dialect and snapshotting live behind these traits.
//! Reads take an explicit [`Consistency`]; writes always go through the
//! replicated log and therefore take none.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::*;

/// Append-only event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one event. The store assigns the id and creation time.
    async fn append_event(&self, payload: EventPayload) -> Result<Event>;

    /// Appends several events in one replicated command.
    async fn append_events(&self, payloads: Vec<EventPayload>) -> Result<Vec<Event>>;

    /// Returns up to `limit` events with `id > cursor`.
    ///
    /// `FetchOrder::OldestFirst` yields the lowest ids ascending,
    /// `FetchOrder::NewestFirst` the highest ids descending.
    async fn events_after(
        &self,
        cursor: EventId,
        limit: usize,
        order: FetchOrder,
        consistency: Consistency,
    ) -> Result<Vec<Event>>;

    /// Deletes every event created strictly before `before`; returns the count.
    async fn delete_events_before(&self, before: Timestamp) -> Result<u64>;
}

/// Module rows.
#[async_trait]
pub trait ModuleRepository: Send + Sync {
    /// Inserts the module or refreshes `last_connected_at` of the existing row.
    async fn upsert_module(&self, id: ModuleId, name: &str, connected_at: Timestamp)
        -> Result<Module>;

    /// Records a disconnect. Unknown modules are ignored.
    async fn mark_disconnected(&self, id: ModuleId, at: Timestamp) -> Result<()>;

    /// Looks up one module.
    async fn module(&self, id: ModuleId, consistency: Consistency) -> Result<Option<Module>>;

    /// Lists all modules.
    async fn modules(&self, consistency: Consistency) -> Result<Vec<Module>>;
}

/// Backend rows.
#[async_trait]
pub trait BackendRepository: Send + Sync {
    /// Inserts a backend, replacing any row with the same connection id.
    async fn insert_backend(&self, backend: Backend) -> Result<()>;

    /// Deletes the backend attached to `connection_id`, returning it if present.
    async fn delete_backend(&self, connection_id: &ConnectionId) -> Result<Option<Backend>>;

    /// Deletes every backend attached to one of `connection_ids`.
    async fn delete_backends(&self, connection_ids: &[ConnectionId]) -> Result<Vec<Backend>>;

    /// Lists backends of one module.
    async fn backends_by_module(
        &self,
        module_id: ModuleId,
        consistency: Consistency,
    ) -> Result<Vec<Backend>>;

    /// Lists backends owned by one node.
    async fn backends_by_node(&self, node_id: &NodeId, consistency: Consistency)
        -> Result<Vec<Backend>>;

    /// Lists every backend in the cluster.
    async fn all_backends(&self, consistency: Consistency) -> Result<Vec<Backend>>;
}

/// Config rows.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Returns the active config of a module.
    async fn active_config(
        &self,
        module_id: ModuleId,
        consistency: Consistency,
    ) -> Result<Option<Config>>;

    /// Looks up a config by id.
    async fn config(&self, id: ConfigId, consistency: Consistency) -> Result<Option<Config>>;

    /// Inserts a new config row.
    async fn insert_config(&self, config: Config) -> Result<()>;

    /// Replaces the data of a config, bumping its version and `updated_at`.
    async fn update_config_data(&self, id: ConfigId, data: Bytes) -> Result<Config>;

    /// Marks one config active and deactivates every other config of its module.
    async fn activate_config(&self, id: ConfigId) -> Result<Config>;
}

/// Config schema rows.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    /// Inserts or replaces the schema of a module.
    async fn upsert_schema(&self, schema: ConfigSchema) -> Result<()>;

    /// Returns the schema of a module.
    async fn schema(&self, module_id: ModuleId, consistency: Consistency)
        -> Result<Option<ConfigSchema>>;
}

/// Config variables and their links to configs.
#[async_trait]
pub trait VariableRepository: Send + Sync {
    /// Inserts or replaces a variable.
    async fn upsert_variable(&self, name: &str, value: &str) -> Result<()>;

    /// Returns the subset of `names` that are not defined.
    async fn missing_variables(&self, names: &[String], consistency: Consistency)
        -> Result<Vec<String>>;

    /// Replaces the set of variables a config references.
    async fn link_variables(&self, config_id: ConfigId, names: &[String]) -> Result<()>;

    /// Returns the variables a config references.
    async fn linked_variables(&self, config_id: ConfigId, consistency: Consistency)
        -> Result<Vec<String>>;
}

/// The full replicated store as seen by a node.
pub trait Store:
    EventLog
    + ModuleRepository
    + BackendRepository
    + ConfigRepository
    + SchemaRepository
    + VariableRepository
{
}

impl<T> Store for T where
    T: EventLog
        + ModuleRepository
        + BackendRepository
        + ConfigRepository
        + SchemaRepository
        + VariableRepository
{
}
