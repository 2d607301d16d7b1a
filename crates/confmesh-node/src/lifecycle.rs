//! Connection lifecycle: connect, declare, ready, disconnect.
//!
//! Each transport callback maps to one method here. Methods mutate the
//! replicated store and append events; they never notify other connections
//! directly. Peers learn about changes when their event worker picks up the
//! appended events.
//!
//! ```text
//! Connected ──requirements / config schema──▶ Connected
//!     │
//!     └──ready──▶ Ready ──disconnect──▶ Disconnected
//! ```
//!
//! Partial progress is not rolled back: if a later step fails the transport
//! drops the connection and the disconnect path or the phantom sweep cleans up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use confmesh_notify::{
    ConfigTemplating, Connection, RoomIndex, Session, SubscriptionService, ERROR_EVENT,
};
use confmesh_store::{
    with_deadline, Backend, BackendRepository, Config, ConfigId, ConfigRepository, ConfigSchema,
    Consistency, Endpoint, EventLog, EventPayload, ModuleId, ModuleRepository, NodeId,
    SchemaRepository, Store, Timestamp, VariableRepository,
};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Dependencies a module declares after connecting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRequirements {
    /// Names of modules whose backends this module calls.
    #[serde(default)]
    pub required_modules: Vec<String>,
    /// Whether the module wants the full routing table.
    #[serde(default)]
    pub require_routes: bool,
}

/// What a module declares when it becomes reachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDeclaration {
    /// `host:port` the module listens on.
    pub address: String,
    /// Module version.
    pub version: String,
    /// Client library version.
    pub lib_version: String,
    /// Transport the module serves (e.g. `grpc`).
    pub transport: String,
    /// Served endpoints.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Names of modules this instance depends on.
    #[serde(default)]
    pub required_modules: Vec<String>,
    /// Metrics scrape hints, passed through untouched.
    #[serde(default)]
    pub metrics_autodiscovery: Option<serde_json::Value>,
}

/// Config schema and default config a module sends on handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSchemaDeclaration {
    /// Module version that produced the schema.
    pub version: String,
    /// Schema document.
    pub schema: serde_json::Value,
    /// Config used when the module has none yet.
    pub default_config: serde_json::Value,
}

/// Drives per-connection state transitions for modules attached to this node.
pub struct ModuleLifecycle {
    node_id: NodeId,
    store: Arc<dyn Store>,
    subscriptions: Arc<SubscriptionService>,
    templating: Arc<dyn ConfigTemplating>,
    store_timeout: Duration,
}

impl ModuleLifecycle {
    /// Creates the lifecycle service for `node_id`.
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn Store>,
        subscriptions: Arc<SubscriptionService>,
        templating: Arc<dyn ConfigTemplating>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            store,
            subscriptions,
            templating,
            store_timeout,
        }
    }

    /// Identity of the node backends are registered under.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Local connections and rooms.
    pub fn rooms(&self) -> &Arc<RoomIndex> {
        self.subscriptions.rooms()
    }

    /// Handles a new connection declaring `module_name`.
    ///
    /// Upserts the module row and registers the connection locally. No event
    /// is appended: a connection without a backend is invisible to peers.
    pub async fn on_connect(
        &self,
        conn: Arc<dyn Connection>,
        module_name: &str,
    ) -> Result<Arc<Session>, LifecycleError> {
        let session = Session::new(conn);
        let result = self.connect(&session, module_name).await;
        self.report(&session, result).await?;
        Ok(session)
    }

    async fn connect(
        &self,
        session: &Arc<Session>,
        module_name: &str,
    ) -> Result<(), LifecycleError> {
        let module_name = module_name.trim();
        if module_name.is_empty() {
            return Err(LifecycleError::InvalidModuleName);
        }
        let module_id = ModuleId::from_name(module_name);
        with_deadline(
            self.store_timeout,
            "upsert_module",
            self.store.upsert_module(module_id, module_name, Timestamp::now()),
        )
        .await?;
        session.set_module(module_id, module_name);
        self.rooms().register(Arc::clone(session));
        tracing::info!(conn = %session.id(), module = module_name, %module_id, "module connected");
        Ok(())
    }

    /// Subscribes the connection to the backends of every required module and,
    /// if asked, to the routing table. Each subscription sends a baseline snapshot.
    pub async fn on_requirements(
        &self,
        session: &Arc<Session>,
        requirements: &ModuleRequirements,
    ) -> Result<(), LifecycleError> {
        let result = self.requirements(session, requirements).await;
        self.report(session, result).await
    }

    async fn requirements(
        &self,
        session: &Arc<Session>,
        requirements: &ModuleRequirements,
    ) -> Result<(), LifecycleError> {
        self.identified(session)?;
        for name in &requirements.required_modules {
            let required = ModuleId::from_name(name);
            self.subscriptions
                .subscribe_to_backends_changes(session, required)
                .await?;
        }
        if requirements.require_routes {
            self.subscriptions.subscribe_to_routing_changes(session).await?;
        }
        tracing::debug!(
            conn = %session.id(),
            required = requirements.required_modules.len(),
            routes = requirements.require_routes,
            "module requirements subscribed"
        );
        Ok(())
    }

    /// Registers the connection as a reachable backend of its module.
    pub async fn on_ready(
        &self,
        session: &Arc<Session>,
        declaration: BackendDeclaration,
    ) -> Result<Backend, LifecycleError> {
        let result = self.ready(session, declaration).await;
        self.report(session, result).await
    }

    async fn ready(
        &self,
        session: &Arc<Session>,
        declaration: BackendDeclaration,
    ) -> Result<Backend, LifecycleError> {
        let module_id = self.identified(session)?;
        validate_address(&declaration.address)?;
        let module_name = session.context().module_name.unwrap_or_default();

        let backend = Backend {
            ws_connection_id: session.id().clone(),
            module_id,
            address: declaration.address,
            version: declaration.version,
            lib_version: declaration.lib_version,
            module_name,
            transport: declaration.transport,
            config_service_node_id: self.node_id.clone(),
            endpoints: declaration.endpoints,
            required_modules: declaration.required_modules,
            metrics_autodiscovery: declaration.metrics_autodiscovery,
            created_at: Timestamp::now(),
        };
        with_deadline(
            self.store_timeout,
            "insert_backend",
            self.store.insert_backend(backend.clone()),
        )
        .await?;
        with_deadline(
            self.store_timeout,
            "append_event",
            self.store.append_event(EventPayload::ModuleReady { module_id }),
        )
        .await?;
        session.set_backend(backend.clone());
        tracing::info!(
            conn = %session.id(),
            module = %backend.module_name,
            address = %backend.address,
            "module ready"
        );
        Ok(backend)
    }

    /// Stores the declared schema, creates the first config if the module has
    /// none, sends the effective config and subscribes to config changes.
    pub async fn on_config_schema(
        &self,
        session: &Arc<Session>,
        declaration: ConfigSchemaDeclaration,
    ) -> Result<(), LifecycleError> {
        let result = self.config_schema(session, declaration).await;
        self.report(session, result).await
    }

    async fn config_schema(
        &self,
        session: &Arc<Session>,
        declaration: ConfigSchemaDeclaration,
    ) -> Result<(), LifecycleError> {
        let module_id = self.identified(session)?;
        let now = Timestamp::now();

        let schema = ConfigSchema {
            module_id,
            module_version: declaration.version,
            data: Bytes::from(serde_json::to_vec(&declaration.schema)?),
            updated_at: now,
        };
        with_deadline(
            self.store_timeout,
            "upsert_schema",
            self.store.upsert_schema(schema),
        )
        .await?;

        let active = with_deadline(
            self.store_timeout,
            "active_config",
            self.store.active_config(module_id, Consistency::Strong),
        )
        .await?;
        let config = match active {
            Some(config) => config,
            None => {
                let name = session.context().module_name.unwrap_or_default();
                let data = Bytes::from(serde_json::to_vec(&declaration.default_config)?);
                self.create_initial_config(module_id, &name, data).await?
            }
        };

        // The baseline is the config read or written above; a local read here
        // could still miss it.
        self.subscriptions
            .subscribe_with_config(session, &config)
            .await?;
        Ok(())
    }

    async fn create_initial_config(
        &self,
        module_id: ModuleId,
        name: &str,
        data: Bytes,
    ) -> Result<Config, LifecycleError> {
        let variables = self.templating.variables(&data)?;
        if !variables.is_empty() {
            let missing = with_deadline(
                self.store_timeout,
                "missing_variables",
                self.store.missing_variables(&variables, Consistency::Strong),
            )
            .await?;
            if !missing.is_empty() {
                return Err(LifecycleError::MissingVariables(missing));
            }
        }

        let now = Timestamp::now();
        let config = Config {
            id: ConfigId::generate(),
            module_id,
            name: name.to_string(),
            data,
            version: 1,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let config_id = config.id;
        with_deadline(
            self.store_timeout,
            "insert_config",
            self.store.insert_config(config.clone()),
        )
        .await?;
        with_deadline(
            self.store_timeout,
            "link_variables",
            self.store.link_variables(config_id, &variables),
        )
        .await?;
        tracing::info!(
            %module_id,
            %config_id,
            variables = variables.len(),
            "initial config created"
        );
        Ok(config)
    }

    /// Handles a closed connection, graceful or not.
    ///
    /// Records the disconnect on the module row and, if the connection had
    /// registered a backend, deletes it and appends `ModuleDisconnected`. The
    /// two steps are independent; the first error is returned after both ran.
    pub async fn on_disconnect(&self, session: &Arc<Session>) -> Result<(), LifecycleError> {
        self.rooms().unregister(session.id());
        let context = session.context();
        let mut first_error: Option<LifecycleError> = None;

        if let Some(module_id) = context.module_id {
            let marked = with_deadline(
                self.store_timeout,
                "mark_disconnected",
                self.store.mark_disconnected(module_id, Timestamp::now()),
            )
            .await;
            if let Err(e) = marked {
                tracing::warn!(
                    conn = %session.id(),
                    %module_id,
                    error = %e,
                    "failed to record disconnect"
                );
                first_error = Some(e.into());
            }
        }

        if let Some(backend) = session.take_backend() {
            if let Err(e) = self.deregister_backend(&backend).await {
                tracing::warn!(
                    conn = %session.id(),
                    module = %backend.module_name,
                    error = %e,
                    "failed to deregister backend"
                );
                first_error = first_error.or(Some(e));
            }
        }

        tracing::info!(
            conn = %session.id(),
            module = context.module_name.as_deref().unwrap_or("<unidentified>"),
            "module disconnected"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn deregister_backend(&self, backend: &Backend) -> Result<(), LifecycleError> {
        with_deadline(
            self.store_timeout,
            "delete_backend",
            self.store.delete_backend(&backend.ws_connection_id),
        )
        .await?;
        with_deadline(
            self.store_timeout,
            "append_event",
            self.store.append_event(EventPayload::ModuleDisconnected {
                module_id: backend.module_id,
            }),
        )
        .await?;
        Ok(())
    }

    fn identified(&self, session: &Session) -> Result<ModuleId, LifecycleError> {
        session
            .module_id()
            .ok_or_else(|| LifecycleError::NotIdentified(session.id().clone()))
    }

    /// Sends data-integrity failures to the module before the transport drops it.
    async fn report<T>(
        &self,
        session: &Session,
        result: Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        if let Err(e) = &result {
            tracing::warn!(conn = %session.id(), error = %e, "lifecycle transition failed");
            if e.is_data_integrity() {
                let body = serde_json::json!({ "error": e.to_string() });
                let payload = Bytes::from(body.to_string());
                if let Err(send_err) = session.emit(ERROR_EVENT, payload).await {
                    tracing::debug!(
                        conn = %session.id(),
                        error = %send_err,
                        "error event not delivered"
                    );
                }
            }
        }
        result
    }
}

fn validate_address(address: &str) -> Result<(), LifecycleError> {
    let invalid = || LifecycleError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().map_err(|_| invalid())? == 0 {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, Harness};
    use confmesh_notify::{Room, BACKENDS_CHANGED_EVENT, CONFIG_CHANGED_EVENT};

    fn declaration(address: &str) -> BackendDeclaration {
        BackendDeclaration {
            address: address.to_string(),
            version: "1.2.0".to_string(),
            lib_version: "3.0.0".to_string(),
            transport: "grpc".to_string(),
            endpoints: vec![Endpoint {
                path: "/auth/login".to_string(),
                inner: false,
            }],
            required_modules: vec![],
            metrics_autodiscovery: None,
        }
    }

    fn schema(default_config: serde_json::Value) -> ConfigSchemaDeclaration {
        ConfigSchemaDeclaration {
            version: "1.2.0".to_string(),
            schema: serde_json::json!({ "type": "object" }),
            default_config,
        }
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("10.0.0.1:9999").is_ok());
        assert!(validate_address("auth.svc:80").is_ok());
        assert!(validate_address("10.0.0.1").is_err());
        assert!(validate_address(":80").is_err());
        assert!(validate_address("host:0").is_err());
        assert!(validate_address("host:http").is_err());
    }

    #[tokio::test]
    async fn test_connect_registers_session() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, _rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();

        assert_eq!(session.module_id(), Some(ModuleId::from_name("auth")));
        assert!(lifecycle.rooms().is_connected(session.id()));
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_name() {
        let Harness { lifecycle, .. } = harness("n1");
        let (conn, mut rx) = crate::testing::connection("c1");
        let err = lifecycle.on_connect(conn, "  ").await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidModuleName));
        assert_eq!(rx.recv().await.unwrap().event, ERROR_EVENT);
    }

    #[tokio::test]
    async fn test_ready_before_connect_is_rejected() {
        let Harness { lifecycle, .. } = harness("n1");
        let (conn, _rx) = crate::testing::connection("c1");
        let session = Session::new(conn);
        let err = lifecycle
            .on_ready(&session, declaration("10.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotIdentified(_)));
    }

    #[tokio::test]
    async fn test_connect_ready_disconnect_leaves_one_module_no_backends() {
        let Harness { lifecycle, store, .. } = harness("n1");
        for round in 0..2 {
            let (conn, _rx) = crate::testing::connection(&format!("c{round}"));
            let session = lifecycle.on_connect(conn, "auth").await.unwrap();
            let backend = lifecycle
                .on_ready(&session, declaration("10.0.0.1:9999"))
                .await
                .unwrap();
            assert_eq!(backend.config_service_node_id, NodeId::new("n1"));
            lifecycle.on_disconnect(&session).await.unwrap();
        }

        let modules = store.modules(Consistency::None).await.unwrap();
        assert_eq!(modules.len(), 1);
        assert!(modules[0].last_disconnected_at.is_some());
        assert!(store.all_backends(Consistency::None).await.unwrap().is_empty());
        let kinds: Vec<_> = store.events().iter().map(|e| e.payload.kind()).collect();
        assert_eq!(kinds.len(), 4);
    }

    #[tokio::test]
    async fn test_disconnect_without_ready_records_timestamp_only() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, _rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle.on_disconnect(&session).await.unwrap();

        let module = store
            .module(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap()
            .unwrap();
        assert!(module.last_disconnected_at.is_some());
        assert_eq!(store.event_count(), 0);
        assert!(!lifecycle.rooms().is_connected(session.id()));
    }

    #[tokio::test]
    async fn test_disconnect_attempts_backend_removal_after_module_failure() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, _rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle
            .on_ready(&session, declaration("10.0.0.1:1"))
            .await
            .unwrap();

        store.set_unavailable(true);
        assert!(lifecycle.on_disconnect(&session).await.is_err());
        store.set_unavailable(false);
        // Row stays for the phantom sweep; the session no longer owns it.
        assert!(session.backend().is_none());
        assert_eq!(store.all_backends(Consistency::None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requirements_send_baseline_and_join_rooms() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (a_conn, _a_rx) = crate::testing::connection("a1");
        let a = lifecycle.on_connect(a_conn, "a").await.unwrap();
        lifecycle.on_ready(&a, declaration("10.0.0.1:9999")).await.unwrap();

        let (b_conn, mut b_rx) = crate::testing::connection("b1");
        let b = lifecycle.on_connect(b_conn, "b").await.unwrap();
        lifecycle
            .on_requirements(
                &b,
                &ModuleRequirements {
                    required_modules: vec!["a".to_string()],
                    require_routes: true,
                },
            )
            .await
            .unwrap();

        let first = b_rx.recv().await.unwrap();
        assert_eq!(first.event, BACKENDS_CHANGED_EVENT);
        let a_id = ModuleId::from_name("a");
        assert!(lifecycle.rooms().is_member(&Room::BackendsChanging(a_id), b.id()));
        assert!(lifecycle.rooms().is_member(&Room::RoutingChanging, b.id()));
        assert!(store.read_count() >= 2);
    }

    #[tokio::test]
    async fn test_config_schema_creates_version_one_and_sends_it() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, mut rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 8080 })))
            .await
            .unwrap();

        let m = ModuleId::from_name("auth");
        let config = store
            .active_config(m, Consistency::None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.version, 1);
        assert!(store.schema(m, Consistency::None).await.unwrap().is_some());

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.event, CONFIG_CHANGED_EVENT);
        let sent: serde_json::Value = serde_json::from_slice(&emitted.payload).unwrap();
        assert_eq!(sent["port"], 8080);
        assert!(lifecycle.rooms().is_member(&Room::ConfigChanging(m), session.id()));
    }

    #[tokio::test]
    async fn test_config_schema_baseline_survives_lagging_local_reads() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, mut rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        store.lag_local_reads();

        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 8080 })))
            .await
            .unwrap();

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.event, CONFIG_CHANGED_EVENT);
        let sent: serde_json::Value = serde_json::from_slice(&emitted.payload).unwrap();
        assert_eq!(sent["port"], 8080);
        let m = ModuleId::from_name("auth");
        assert!(lifecycle.rooms().is_member(&Room::ConfigChanging(m), session.id()));
    }

    #[tokio::test]
    async fn test_config_schema_sends_existing_config_read_strongly() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, mut rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 1 })))
            .await
            .unwrap();
        rx.recv().await.unwrap();

        store.lag_local_reads();
        let m = ModuleId::from_name("auth");
        let active = store.active_config(m, Consistency::Strong).await.unwrap().unwrap();
        store
            .update_config_data(active.id, Bytes::from_static(b"{\"port\":2}"))
            .await
            .unwrap();

        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 3 })))
            .await
            .unwrap();
        let emitted = rx.recv().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&emitted.payload).unwrap();
        assert_eq!(sent["port"], 2);
    }

    #[tokio::test]
    async fn test_config_schema_keeps_existing_config() {
        let Harness { lifecycle, store, .. } = harness("n1");
        let (conn, _rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 1 })))
            .await
            .unwrap();
        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "port": 2 })))
            .await
            .unwrap();

        let config = store
            .active_config(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap()
            .unwrap();
        let data: serde_json::Value = serde_json::from_slice(&config.data).unwrap();
        assert_eq!(data["port"], 1);
    }

    #[tokio::test]
    async fn test_missing_variables_abort_handshake() {
        let Harness { lifecycle, store, .. } = harness("n1");
        store.upsert_variable("db_host", "db").await.unwrap();
        let (conn, mut rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();

        let err = lifecycle
            .on_config_schema(
                &session,
                schema(serde_json::json!({
                    "db": "{{ var:db_host }}",
                    "password": "{{ var:db_password }}"
                })),
            )
            .await
            .unwrap_err();
        match err {
            LifecycleError::MissingVariables(names) => {
                assert_eq!(names, vec!["db_password".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rx.recv().await.unwrap().event, ERROR_EVENT);
        assert!(store
            .active_config(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_known_variables_are_linked() {
        let Harness { lifecycle, store, .. } = harness("n1");
        store.upsert_variable("db_host", "db").await.unwrap();
        let (conn, _rx) = crate::testing::connection("c1");
        let session = lifecycle.on_connect(conn, "auth").await.unwrap();
        lifecycle
            .on_config_schema(&session, schema(serde_json::json!({ "db": "{{ var:db_host }}" })))
            .await
            .unwrap();

        let config = store
            .active_config(ModuleId::from_name("auth"), Consistency::None)
            .await
            .unwrap()
            .unwrap();
        let linked = store
            .linked_variables(config.id, Consistency::None)
            .await
            .unwrap();
        assert_eq!(linked, vec!["db_host".to_string()]);
    }
}
