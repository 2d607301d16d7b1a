//! Config writes made through the admin surface.
//!
//! Each successful write appends exactly one `ConfigUpdated` event; every
//! node's worker then pushes the new effective config to subscribers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use confmesh_notify::ConfigTemplating;
use confmesh_store::{
    with_deadline, Config, ConfigId, ConfigRepository, Consistency, EventLog, EventPayload,
    ModuleId, Store, StoreError, VariableRepository,
};

use crate::error::LifecycleError;

/// Writes config rows and announces them on the event log.
pub struct ConfigMutations {
    store: Arc<dyn Store>,
    templating: Arc<dyn ConfigTemplating>,
    store_timeout: Duration,
}

impl ConfigMutations {
    /// Creates the mutation service.
    pub fn new(
        store: Arc<dyn Store>,
        templating: Arc<dyn ConfigTemplating>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            templating,
            store_timeout,
        }
    }

    /// Replaces the data of the active config of `module_id`.
    ///
    /// Rejects data referencing undefined variables. The version goes up by one.
    pub async fn update_active_config(
        &self,
        module_id: ModuleId,
        data: Bytes,
    ) -> Result<Config, LifecycleError> {
        let active = with_deadline(
            self.store_timeout,
            "active_config",
            self.store.active_config(module_id, Consistency::Strong),
        )
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "active config",
            id: module_id.to_string(),
        })?;

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

        let updated = with_deadline(
            self.store_timeout,
            "update_config_data",
            self.store.update_config_data(active.id, data),
        )
        .await?;
        with_deadline(
            self.store_timeout,
            "link_variables",
            self.store.link_variables(updated.id, &variables),
        )
        .await?;
        self.announce(module_id).await?;
        tracing::info!(
            %module_id,
            config_id = %updated.id,
            version = updated.version,
            "config updated"
        );
        Ok(updated)
    }

    /// Makes `config_id` the active config of its module.
    pub async fn activate_config(&self, config_id: ConfigId) -> Result<Config, LifecycleError> {
        let activated = with_deadline(
            self.store_timeout,
            "activate_config",
            self.store.activate_config(config_id),
        )
        .await?;
        self.announce(activated.module_id).await?;
        tracing::info!(module_id = %activated.module_id, %config_id, "config activated");
        Ok(activated)
    }

    async fn announce(&self, module_id: ModuleId) -> Result<(), LifecycleError> {
        with_deadline(
            self.store_timeout,
            "append_event",
            self.store
                .append_event(EventPayload::ConfigUpdated { module_id }),
        )
        .await?;
        Ok(())
    }
}
