//! In-memory store implementing every repository.
//!
//! Used by tests and single-node runs. It does not replicate and does not
//! persist across restarts. Reads at `Consistency::None` can be made to lag
//! behind writes with [`MemoryStore::lag_local_reads`], standing in for a
//! local replica that has not applied the latest log entries yet.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::error::{Result, StoreError};
use crate::repo::*;
use crate::types::*;

#[derive(Clone, Default)]
struct Tables {
    next_event_id: EventId,
    events: BTreeMap<EventId, Event>,
    modules: HashMap<ModuleId, Module>,
    backends: HashMap<ConnectionId, Backend>,
    configs: HashMap<ConfigId, Config>,
    schemas: HashMap<ModuleId, ConfigSchema>,
    variables: HashMap<String, String>,
    variable_links: HashMap<ConfigId, Vec<String>>,
}

/// In-memory store backed by hash maps. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Frozen copy served to `Consistency::None` reads while lagging.
    local: RwLock<Option<Tables>>,
    reads: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes every subsequent operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Freezes what `Consistency::None` reads return at the current state.
    /// Writes and stronger reads keep using the live tables.
    pub fn lag_local_reads(&self) {
        let snapshot = self.tables.read().clone();
        *self.local.write() = Some(snapshot);
    }

    /// Lets `Consistency::None` reads see every write again.
    pub fn catch_up(&self) {
        *self.local.write() = None;
    }

    /// Number of rows in the event log.
    pub fn event_count(&self) -> usize {
        self.tables.read().events.len()
    }

    /// Snapshot of the whole event log in id order.
    pub fn events(&self) -> Vec<Event> {
        self.tables.read().events.values().cloned().collect()
    }

    /// Inserts an event with an explicit creation time.
    pub fn append_event_at(&self, payload: EventPayload, created_at: Timestamp) -> Event {
        let mut tables = self.tables.write();
        Self::push_event(&mut tables, payload, created_at)
    }

    fn push_event(tables: &mut Tables, payload: EventPayload, created_at: Timestamp) -> Event {
        tables.next_event_id += 1;
        let event = Event {
            id: tables.next_event_id,
            payload,
            created_at,
        };
        tables.events.insert(event.id, event.clone());
        event
    }

    fn view(&self, consistency: Consistency) -> MappedRwLockReadGuard<'_, Tables> {
        if consistency == Consistency::None {
            if let Ok(local) = RwLockReadGuard::try_map(self.local.read(), Option::as_ref) {
                return local;
            }
        }
        RwLockReadGuard::map(self.tables.read(), |tables| tables)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> Result<()> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append_event(&self, payload: EventPayload) -> Result<Event> {
        self.check()?;
        let mut tables = self.tables.write();
        Ok(Self::push_event(&mut tables, payload, Timestamp::now()))
    }

    async fn append_events(&self, payloads: Vec<EventPayload>) -> Result<Vec<Event>> {
        self.check()?;
        let mut tables = self.tables.write();
        let now = Timestamp::now();
        Ok(payloads
            .into_iter()
            .map(|p| Self::push_event(&mut tables, p, now))
            .collect())
    }

    async fn events_after(
        &self,
        cursor: EventId,
        limit: usize,
        order: FetchOrder,
        consistency: Consistency,
    ) -> Result<Vec<Event>> {
        self.read()?;
        let tables = self.view(consistency);
        let range = tables.events.range(cursor.saturating_add(1)..);
        let events: Vec<Event> = match order {
            FetchOrder::OldestFirst => range.take(limit).map(|(_, e)| e.clone()).collect(),
            FetchOrder::NewestFirst => range.rev().take(limit).map(|(_, e)| e.clone()).collect(),
        };
        Ok(events)
    }

    async fn delete_events_before(&self, before: Timestamp) -> Result<u64> {
        self.check()?;
        let mut tables = self.tables.write();
        let len = tables.events.len();
        tables.events.retain(|_, e| e.created_at >= before);
        Ok((len - tables.events.len()) as u64)
    }
}

#[async_trait]
impl ModuleRepository for MemoryStore {
    async fn upsert_module(
        &self,
        id: ModuleId,
        name: &str,
        connected_at: Timestamp,
    ) -> Result<Module> {
        self.check()?;
        let mut tables = self.tables.write();
        let module = tables.modules.entry(id).or_insert_with(|| Module {
            id,
            name: name.to_string(),
            last_connected_at: None,
            last_disconnected_at: None,
            created_at: connected_at,
        });
        module.name = name.to_string();
        module.last_connected_at = Some(connected_at);
        Ok(module.clone())
    }

    async fn mark_disconnected(&self, id: ModuleId, at: Timestamp) -> Result<()> {
        self.check()?;
        if let Some(module) = self.tables.write().modules.get_mut(&id) {
            module.last_disconnected_at = Some(at);
        }
        Ok(())
    }

    async fn module(&self, id: ModuleId, consistency: Consistency) -> Result<Option<Module>> {
        self.read()?;
        Ok(self.view(consistency).modules.get(&id).cloned())
    }

    async fn modules(&self, consistency: Consistency) -> Result<Vec<Module>> {
        self.read()?;
        let mut modules: Vec<Module> =
            self.view(consistency).modules.values().cloned().collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }
}

#[async_trait]
impl BackendRepository for MemoryStore {
    async fn insert_backend(&self, backend: Backend) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .backends
            .insert(backend.ws_connection_id.clone(), backend);
        Ok(())
    }

    async fn delete_backend(&self, connection_id: &ConnectionId) -> Result<Option<Backend>> {
        self.check()?;
        Ok(self.tables.write().backends.remove(connection_id))
    }

    async fn delete_backends(&self, connection_ids: &[ConnectionId]) -> Result<Vec<Backend>> {
        self.check()?;
        let mut tables = self.tables.write();
        Ok(connection_ids
            .iter()
            .filter_map(|id| tables.backends.remove(id))
            .collect())
    }

    async fn backends_by_module(
        &self,
        module_id: ModuleId,
        consistency: Consistency,
    ) -> Result<Vec<Backend>> {
        self.read()?;
        let mut backends: Vec<Backend> = self
            .view(consistency)
            .backends
            .values()
            .filter(|b| b.module_id == module_id)
            .cloned()
            .collect();
        backends.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(backends)
    }

    async fn backends_by_node(
        &self,
        node_id: &NodeId,
        consistency: Consistency,
    ) -> Result<Vec<Backend>> {
        self.read()?;
        Ok(self
            .view(consistency)
            .backends
            .values()
            .filter(|b| &b.config_service_node_id == node_id)
            .cloned()
            .collect())
    }

    async fn all_backends(&self, consistency: Consistency) -> Result<Vec<Backend>> {
        self.read()?;
        let mut backends: Vec<Backend> =
            self.view(consistency).backends.values().cloned().collect();
        backends.sort_by(|a, b| {
            a.module_name
                .cmp(&b.module_name)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(backends)
    }
}

#[async_trait]
impl ConfigRepository for MemoryStore {
    async fn active_config(
        &self,
        module_id: ModuleId,
        consistency: Consistency,
    ) -> Result<Option<Config>> {
        self.read()?;
        Ok(self
            .view(consistency)
            .configs
            .values()
            .find(|c| c.module_id == module_id && c.active)
            .cloned())
    }

    async fn config(&self, id: ConfigId, consistency: Consistency) -> Result<Option<Config>> {
        self.read()?;
        Ok(self.view(consistency).configs.get(&id).cloned())
    }

    async fn insert_config(&self, config: Config) -> Result<()> {
        self.check()?;
        self.tables.write().configs.insert(config.id, config);
        Ok(())
    }

    async fn update_config_data(&self, id: ConfigId, data: Bytes) -> Result<Config> {
        self.check()?;
        let mut tables = self.tables.write();
        let module_id = tables
            .configs
            .get(&id)
            .map(|c| c.module_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "config",
                id: id.to_string(),
            })?;
        let max_version = tables
            .configs
            .values()
            .filter(|c| c.module_id == module_id)
            .map(|c| c.version)
            .max()
            .unwrap_or(0);
        let config = tables.configs.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "config",
            id: id.to_string(),
        })?;
        config.data = data;
        config.version = max_version + 1;
        config.updated_at = Timestamp::now();
        Ok(config.clone())
    }

    async fn activate_config(&self, id: ConfigId) -> Result<Config> {
        self.check()?;
        let mut tables = self.tables.write();
        let module_id = tables
            .configs
            .get(&id)
            .map(|c| c.module_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "config",
                id: id.to_string(),
            })?;
        let mut activated = None;
        for config in tables.configs.values_mut() {
            if config.module_id != module_id {
                continue;
            }
            config.active = config.id == id;
            if config.active {
                activated = Some(config.clone());
            }
        }
        activated.ok_or_else(|| StoreError::NotFound {
            entity: "config",
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl SchemaRepository for MemoryStore {
    async fn upsert_schema(&self, schema: ConfigSchema) -> Result<()> {
        self.check()?;
        self.tables.write().schemas.insert(schema.module_id, schema);
        Ok(())
    }

    async fn schema(
        &self,
        module_id: ModuleId,
        consistency: Consistency,
    ) -> Result<Option<ConfigSchema>> {
        self.read()?;
        Ok(self.view(consistency).schemas.get(&module_id).cloned())
    }
}

#[async_trait]
impl VariableRepository for MemoryStore {
    async fn upsert_variable(&self, name: &str, value: &str) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .variables
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn missing_variables(
        &self,
        names: &[String],
        consistency: Consistency,
    ) -> Result<Vec<String>> {
        self.read()?;
        let tables = self.view(consistency);
        let mut seen = HashSet::new();
        Ok(names
            .iter()
            .filter(|n| !tables.variables.contains_key(n.as_str()) && seen.insert(n.as_str()))
            .cloned()
            .collect())
    }

    async fn link_variables(&self, config_id: ConfigId, names: &[String]) -> Result<()> {
        self.check()?;
        self.tables
            .write()
            .variable_links
            .insert(config_id, names.to_vec());
        Ok(())
    }

    async fn linked_variables(
        &self,
        config_id: ConfigId,
        consistency: Consistency,
    ) -> Result<Vec<String>> {
        self.read()?;
        Ok(self
            .view(consistency)
            .variable_links
            .get(&config_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(conn: &str, module: &str, node: &str, address: &str) -> Backend {
        Backend {
            ws_connection_id: ConnectionId::new(conn),
            module_id: ModuleId::from_name(module),
            address: address.to_string(),
            version: "1.0.0".to_string(),
            lib_version: "2.0.0".to_string(),
            module_name: module.to_string(),
            transport: "grpc".to_string(),
            config_service_node_id: NodeId::new(node),
            endpoints: vec![],
            required_modules: vec![],
            metrics_autodiscovery: None,
            created_at: Timestamp::now(),
        }
    }

    fn config(module: &str, version: u64, active: bool) -> Config {
        Config {
            id: ConfigId::generate(),
            module_id: ModuleId::from_name(module),
            name: format!("{module}-v{version}"),
            data: Bytes::from_static(b"{}"),
            version,
            active,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn test_event_ids_are_monotonic() {
        let store = MemoryStore::new();
        let m = ModuleId::from_name("a");
        let first = store
            .append_event(EventPayload::ModuleReady { module_id: m })
            .await
            .unwrap();
        let rest = store
            .append_events(vec![
                EventPayload::ConfigUpdated { module_id: m },
                EventPayload::ModuleDisconnected { module_id: m },
            ])
            .await
            .unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(rest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_events_after_window_orders() {
        let store = MemoryStore::new();
        let m = ModuleId::from_name("a");
        for _ in 0..5 {
            store
                .append_event(EventPayload::ConfigUpdated { module_id: m })
                .await
                .unwrap();
        }

        let oldest = store
            .events_after(1, 2, FetchOrder::OldestFirst, Consistency::None)
            .await
            .unwrap();
        assert_eq!(oldest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);

        let newest = store
            .events_after(1, 2, FetchOrder::NewestFirst, Consistency::None)
            .await
            .unwrap();
        assert_eq!(newest.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 4]);
    }

    #[tokio::test]
    async fn test_delete_events_before() {
        let store = MemoryStore::new();
        let m = ModuleId::from_name("a");
        store.append_event_at(
            EventPayload::ModuleReady { module_id: m },
            Timestamp { secs: 10, nanos: 0 },
        );
        store.append_event_at(
            EventPayload::ModuleReady { module_id: m },
            Timestamp { secs: 20, nanos: 0 },
        );
        let removed = store
            .delete_events_before(Timestamp { secs: 15, nanos: 0 })
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_module_reuses_row() {
        let store = MemoryStore::new();
        let id = ModuleId::from_name("auth");
        let first = store
            .upsert_module(id, "auth", Timestamp { secs: 1, nanos: 0 })
            .await
            .unwrap();
        let second = store
            .upsert_module(id, "auth", Timestamp { secs: 2, nanos: 0 })
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.last_connected_at, Some(Timestamp { secs: 2, nanos: 0 }));
        assert_eq!(store.modules(Consistency::None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_queries() {
        let store = MemoryStore::new();
        store
            .insert_backend(backend("c1", "auth", "n1", "10.0.0.1:80"))
            .await
            .unwrap();
        store
            .insert_backend(backend("c2", "auth", "n2", "10.0.0.2:80"))
            .await
            .unwrap();
        store
            .insert_backend(backend("c3", "billing", "n1", "10.0.0.3:80"))
            .await
            .unwrap();

        let auth = store
            .backends_by_module(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap();
        assert_eq!(auth.len(), 2);

        let n1 = store
            .backends_by_node(&NodeId::new("n1"), Consistency::None)
            .await
            .unwrap();
        assert_eq!(n1.len(), 2);

        let deleted = store
            .delete_backends(&[ConnectionId::new("c1"), ConnectionId::new("missing")])
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(store.all_backends(Consistency::None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_config_bumps_version() {
        let store = MemoryStore::new();
        let old = config("auth", 3, false);
        let active = config("auth", 1, true);
        store.insert_config(old).await.unwrap();
        store.insert_config(active.clone()).await.unwrap();

        let updated = store
            .update_config_data(active.id, Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(updated.version, 4);
        assert_eq!(updated.data, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_activate_config_deactivates_siblings() {
        let store = MemoryStore::new();
        let first = config("auth", 1, true);
        let second = config("auth", 2, false);
        store.insert_config(first.clone()).await.unwrap();
        store.insert_config(second.clone()).await.unwrap();

        store.activate_config(second.id).await.unwrap();
        let active = store
            .active_config(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        let first = store.config(first.id, Consistency::None).await.unwrap().unwrap();
        assert!(!first.active);
    }

    #[tokio::test]
    async fn test_missing_variables_deduplicates() {
        let store = MemoryStore::new();
        store.upsert_variable("host", "db").await.unwrap();
        let missing = store
            .missing_variables(
                &["host".to_string(), "port".to_string(), "port".to_string()],
                Consistency::None,
            )
            .await
            .unwrap();
        assert_eq!(missing, vec!["port".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads_and_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.all_backends(Consistency::None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store
            .append_event(EventPayload::ModuleReady {
                module_id: ModuleId::from_name("a")
            })
            .await
            .is_err());
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn test_read_counter_counts_reads_only() {
        let store = MemoryStore::new();
        store
            .insert_backend(backend("c1", "auth", "n1", "10.0.0.1:80"))
            .await
            .unwrap();
        assert_eq!(store.read_count(), 0);
        store.all_backends(Consistency::None).await.unwrap();
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_lagging_local_reads_miss_recent_writes() {
        let store = MemoryStore::new();
        store.lag_local_reads();
        store.insert_config(config("auth", 1, true)).await.unwrap();
        let m = ModuleId::from_name("auth");

        assert!(store.active_config(m, Consistency::None).await.unwrap().is_none());
        assert!(store.active_config(m, Consistency::Strong).await.unwrap().is_some());
        assert!(store.active_config(m, Consistency::Weak).await.unwrap().is_some());

        store.catch_up();
        assert!(store.active_config(m, Consistency::None).await.unwrap().is_some());
    }
}
