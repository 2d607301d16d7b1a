#![warn(missing_docs)]

//! Confmesh notification subsystem: event log polling, compaction, room index, subscription fanout

pub mod compactor;
pub mod connection;
pub mod error;
pub mod handler;
pub mod rooms;
pub mod subscription;
pub mod templating;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod worker;

pub use compactor::compact;
pub use connection::{
    Connection, Session, SessionContext, BACKENDS_CHANGED_EVENT, CONFIG_CHANGED_EVENT,
    ERROR_EVENT, ROUTING_CHANGED_EVENT,
};
pub use error::{NotifyError, TransportError};
pub use handler::{DispatchReport, NotificationHandler};
pub use rooms::{Room, RoomIndex};
pub use subscription::{
    BackendAddress, BackendsSnapshot, ChangeNotifier, RouteEntry, SubscriptionConfig,
    SubscriptionService,
};
pub use templating::{ConfigTemplating, PlainTemplating, TemplateError};
pub use worker::{EventWorker, PollOutcome, WorkerConfig};
