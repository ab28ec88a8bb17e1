pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod subscription;

pub use config::MonitorConfig;
pub use diff::{diff, ChangeEvent, ChangeKind};
pub use dispatch::{dispatch, DispatchReport};
pub use error::MonitorError;
pub use monitor::Monitor;
pub use registry::{
    parse_lpstat, simulation_enabled, DeviceRecord, DeviceRegistry, LpstatRegistry, RegistryError,
    SimulatedRegistry,
};
pub use scheduler::{PollingScheduler, SchedulerState};
pub use snapshot::{DeviceSnapshot, DeviceState, SnapshotSet, SnapshotStore};
pub use subscription::{Callback, Subscription, SubscriptionId, SubscriptionRegistry};
