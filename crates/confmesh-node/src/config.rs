use confmesh_notify::{SubscriptionConfig, WorkerConfig};
use confmesh_store::FetchOrder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log output format of the node binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Node configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity of this node; tags every backend row it creates.
    pub node_id: String,
    /// Event log poll period.
    pub poll_interval_ms: u64,
    /// Maximum events read per poll.
    pub event_batch_limit: usize,
    /// Window of events read above the cursor.
    pub event_fetch_order: FetchOrder,
    /// Deadline for any single store call.
    pub store_timeout_ms: u64,
    /// Deadline for any single emit to a connection.
    pub emit_timeout_ms: u64,
    /// Phantom backend sweep period.
    pub phantom_sweep_interval_secs: u64,
    /// Age after which events are deleted.
    pub event_ttl_secs: u64,
    /// Event retention run period.
    pub event_cleanup_interval_secs: u64,
    /// Directory holding store backups; backup retention is off when unset.
    pub backup_dir: Option<PathBuf>,
    /// Age after which backup files are deleted.
    pub backup_ttl_secs: u64,
    /// Backup retention run period.
    pub backup_cleanup_interval_secs: u64,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::from("node-1"),
            poll_interval_ms: 1000,
            event_batch_limit: 100,
            event_fetch_order: FetchOrder::OldestFirst,
            store_timeout_ms: 5000,
            emit_timeout_ms: 5000,
            phantom_sweep_interval_secs: 60,
            event_ttl_secs: 3600,
            event_cleanup_interval_secs: 300,
            backup_dir: None,
            backup_ttl_secs: 7 * 24 * 3600,
            backup_cleanup_interval_secs: 3600,
            log_format: LogFormat::Text,
        }
    }
}

impl NodeConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: NodeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("node_id must not be empty");
        }
        if self.event_batch_limit == 0 {
            anyhow::bail!("event_batch_limit must be positive");
        }
        let periods = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("phantom_sweep_interval_secs", self.phantom_sweep_interval_secs),
            ("event_cleanup_interval_secs", self.event_cleanup_interval_secs),
            ("backup_cleanup_interval_secs", self.backup_cleanup_interval_secs),
        ];
        for (name, value) in periods {
            if value == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        Ok(())
    }

    /// Deadline applied to every store call.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Settings for the event worker's poll loop.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            limit: self.event_batch_limit,
            order: self.event_fetch_order,
            store_timeout: self.store_timeout(),
        }
    }

    /// Store and emit deadlines for the subscription service.
    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            store_timeout: self.store_timeout(),
            emit_timeout: Duration::from_millis(self.emit_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, "node-1");
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.event_batch_limit, 100);
        assert_eq!(config.event_fetch_order, FetchOrder::OldestFirst);
        assert!(config.backup_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node_id = "cfg-2"
poll_interval_ms = 250
event_fetch_order = "newest_first"
backup_dir = "/var/lib/confmesh/backups"
log_format = "json"
            "#
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "cfg-2");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.event_fetch_order, FetchOrder::NewestFirst);
        assert_eq!(
            config.backup_dir,
            Some(PathBuf::from("/var/lib/confmesh/backups"))
        );
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.event_batch_limit, 100);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"node_id": "cfg-3", "event_batch_limit": 10}}"#).unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_id, "cfg-3");
        assert_eq!(config.worker_config().limit, 10);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(NodeConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = NodeConfig {
            poll_interval_ms: 0,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_node_id() {
        let config = NodeConfig {
            node_id: "  ".to_string(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_component_configs() {
        let config = NodeConfig {
            store_timeout_ms: 1500,
            emit_timeout_ms: 700,
            ..NodeConfig::default()
        };
        assert_eq!(config.worker_config().store_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.subscription_config().emit_timeout,
            Duration::from_millis(700)
        );
    }
}
