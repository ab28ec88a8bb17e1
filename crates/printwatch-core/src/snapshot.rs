use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::registry::DeviceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Idle,
    Printing,
    Paused,
    Offline,
    Unknown,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Printing => "printing",
            Self::Paused => "paused",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lenient parse: backend vocabulary that does not map onto a known state
/// becomes [`DeviceState::Unknown`] instead of an error.
impl FromStr for DeviceState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_lowercase().as_str() {
            "idle" | "ready" => Self::Idle,
            "printing" | "processing" => Self::Printing,
            "paused" | "stopped" => Self::Paused,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        };
        Ok(state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub state: DeviceState,
    pub state_reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Devices observed in one tick, keyed by name and enumerated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotSet {
    devices: BTreeMap<String, DeviceSnapshot>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<DeviceRecord>, at: DateTime<Utc>) -> Self {
        let mut set = Self::new();
        for record in records {
            let snapshot = DeviceSnapshot {
                name: record.name,
                state: record.state,
                state_reasons: record.state_reasons,
                timestamp: at,
            };
            if let Some(previous) = set.insert(snapshot) {
                warn!(device = %previous.name, "registry reported duplicate device, keeping last");
            }
        }
        set
    }

    pub fn insert(&mut self, snapshot: DeviceSnapshot) -> Option<DeviceSnapshot> {
        self.devices.insert(snapshot.name.clone(), snapshot)
    }

    pub fn get(&self, name: &str) -> Option<&DeviceSnapshot> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceSnapshot> {
        self.devices.values()
    }
}

impl FromIterator<DeviceSnapshot> for SnapshotSet {
    fn from_iter<I: IntoIterator<Item = DeviceSnapshot>>(iter: I) -> Self {
        let mut set = Self::new();
        for snapshot in iter {
            set.insert(snapshot);
        }
        set
    }
}

/// Last observed [`SnapshotSet`], tagged with the scheduler generation that
/// produced it. Clearing bumps the generation so results from a worker that
/// started before the clear can be recognised and dropped.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    generation: u64,
    snapshots: SnapshotSet,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current(&self) -> &SnapshotSet {
        &self.snapshots
    }

    pub fn clear(&mut self) -> u64 {
        self.snapshots = SnapshotSet::new();
        self.generation += 1;
        self.generation
    }

    /// Replaces the stored set if `generation` is still current. Returns
    /// whether the replacement happened.
    pub fn replace(&mut self, generation: u64, snapshots: SnapshotSet) -> bool {
        if generation != self.generation {
            return false;
        }
        self.snapshots = snapshots;
        true
    }
}
