use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifies a module. Derived from the module name, so every replica of a
/// module that declares the same name shares one id across reconnects.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(Uuid);

impl ModuleId {
    /// Derives the module id from its declared name (BLAKE3, truncated to 128 bits).
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&hash.as_bytes()[..16]);
        ModuleId(Uuid::from_bytes(raw))
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        ModuleId(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a config row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigId(Uuid);

impl ConfigId {
    /// Generates a fresh random config id.
    pub fn generate() -> Self {
        ConfigId(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transport connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a connection id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        ConnectionId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a config service node in the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic event id assigned by the store.
pub type EventId = u64;

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Unix epoch.
    pub const EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Returns the current timestamp
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Converts a `SystemTime`; times before the epoch clamp to the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since.as_secs(),
            nanos: since.subsec_nanos(),
        }
    }

    /// Returns this timestamp moved back by `age`, saturating at the epoch.
    pub fn saturating_sub(self, age: Duration) -> Self {
        let since = Duration::new(self.secs, self.nanos).saturating_sub(age);
        Self {
            secs: since.as_secs(),
            nanos: since.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Requested freshness of a read against the replicated store.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Local read, possibly stale.
    #[default]
    None,
    /// Routed to the leader without a confirmation round trip.
    Weak,
    /// Leader-confirmed read.
    Strong,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consistency::None => "none",
            Consistency::Weak => "weak",
            Consistency::Strong => "strong",
        };
        f.write_str(s)
    }
}

/// Which window of events above a cursor a read returns.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOrder {
    /// Lowest ids above the cursor, ascending.
    #[default]
    OldestFirst,
    /// Highest ids above the cursor, descending.
    NewestFirst,
}

/// Discriminant of an event payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// The active config of a module changed.
    ConfigUpdated,
    /// A backend of a module became reachable.
    ModuleReady,
    /// A backend of a module went away.
    ModuleDisconnected,
}

/// Which snapshot of a module an event invalidates.
///
/// `ModuleReady` and `ModuleDisconnected` both invalidate the backend list,
/// so they share a topic and compact against each other.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventTopic {
    /// The active config.
    Config,
    /// The backend list and the routing table.
    Backends,
}

/// What changed. Every variant carries the module it concerns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// The active config of `module_id` changed.
    ConfigUpdated {
        /// Affected module
        #[serde(rename = "moduleId")]
        module_id: ModuleId,
    },
    /// A backend of `module_id` registered.
    ModuleReady {
        /// Affected module
        #[serde(rename = "moduleId")]
        module_id: ModuleId,
    },
    /// A backend of `module_id` deregistered.
    ModuleDisconnected {
        /// Affected module
        #[serde(rename = "moduleId")]
        module_id: ModuleId,
    },
}

impl EventPayload {
    /// Returns the payload discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ConfigUpdated { .. } => EventKind::ConfigUpdated,
            EventPayload::ModuleReady { .. } => EventKind::ModuleReady,
            EventPayload::ModuleDisconnected { .. } => EventKind::ModuleDisconnected,
        }
    }

    /// Returns the snapshot this payload invalidates.
    pub fn topic(&self) -> EventTopic {
        match self {
            EventPayload::ConfigUpdated { .. } => EventTopic::Config,
            EventPayload::ModuleReady { .. } | EventPayload::ModuleDisconnected { .. } => {
                EventTopic::Backends
            }
        }
    }

    /// Returns the module this payload refers to.
    pub fn module_id(&self) -> ModuleId {
        match self {
            EventPayload::ConfigUpdated { module_id }
            | EventPayload::ModuleReady { module_id }
            | EventPayload::ModuleDisconnected { module_id } => *module_id,
        }
    }
}

/// Row of the append-only event log. A trigger to re-read state, not a delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned monotonic id.
    pub id: EventId,
    /// What changed.
    pub payload: EventPayload,
    /// Append time, used by retention.
    pub created_at: Timestamp,
}

impl Event {
    /// Deduplication key used by compaction.
    pub fn key(&self) -> (EventTopic, ModuleId) {
        (self.payload.topic(), self.payload.module_id())
    }
}

/// A module known to the cluster. Survives reconnects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Name-derived id.
    pub id: ModuleId,
    /// Declared module name.
    pub name: String,
    /// Last time any instance connected.
    pub last_connected_at: Option<Timestamp>,
    /// Last time any instance disconnected.
    pub last_disconnected_at: Option<Timestamp>,
    /// First registration time.
    pub created_at: Timestamp,
}

/// One HTTP/gRPC endpoint a backend serves.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Request path.
    pub path: String,
    /// Whether the endpoint is exposed to external callers.
    #[serde(default)]
    pub inner: bool,
}

/// Live, network-reachable instance of a module. Owned by exactly one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Transport connection this backend is attached to.
    pub ws_connection_id: ConnectionId,
    /// Module this backend belongs to.
    pub module_id: ModuleId,
    /// `host:port` the backend is reachable at.
    pub address: String,
    /// Module version.
    pub version: String,
    /// Client library version.
    pub lib_version: String,
    /// Module name, denormalized for routing snapshots.
    pub module_name: String,
    /// Transport the backend speaks (e.g. `grpc`, `http`).
    pub transport: String,
    /// The only node allowed to delete this row in normal operation.
    pub config_service_node_id: NodeId,
    /// Served endpoints.
    pub endpoints: Vec<Endpoint>,
    /// Modules this backend depends on.
    pub required_modules: Vec<String>,
    /// Metrics scrape hints, opaque.
    pub metrics_autodiscovery: Option<serde_json::Value>,
    /// Registration time.
    pub created_at: Timestamp,
}

/// A versioned config of a module. Exactly one is active per module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Config id.
    pub id: ConfigId,
    /// Owning module.
    pub module_id: ModuleId,
    /// Human-readable name.
    pub name: String,
    /// Raw config document.
    pub data: Bytes,
    /// Strictly increasing per module.
    pub version: u64,
    /// Whether this config is the module's effective config.
    pub active: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last data change.
    pub updated_at: Timestamp,
}

/// Config schema declared by a module on handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSchema {
    /// Owning module.
    pub module_id: ModuleId,
    /// Module version that declared the schema.
    pub module_version: String,
    /// Raw schema document.
    pub data: Bytes,
    /// Last time the schema was declared.
    pub updated_at: Timestamp,
}
