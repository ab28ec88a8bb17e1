use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{DeviceState, SnapshotSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Connected {
        name: String,
        timestamp: DateTime<Utc>,
    },
    Disconnected {
        name: String,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        name: String,
        old_state: DeviceState,
        new_state: DeviceState,
        timestamp: DateTime<Utc>,
    },
    ReasonsChanged {
        name: String,
        old_reasons: Vec<String>,
        new_reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Connected,
    Disconnected,
    StateChanged,
    ReasonsChanged,
}

impl ChangeEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { name, .. }
            | Self::Disconnected { name, .. }
            | Self::StateChanged { name, .. }
            | Self::ReasonsChanged { name, .. } => name,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connected { timestamp, .. }
            | Self::Disconnected { timestamp, .. }
            | Self::StateChanged { timestamp, .. }
            | Self::ReasonsChanged { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Connected { .. } => ChangeKind::Connected,
            Self::Disconnected { .. } => ChangeKind::Disconnected,
            Self::StateChanged { .. } => ChangeKind::StateChanged,
            Self::ReasonsChanged { .. } => ChangeKind::ReasonsChanged,
        }
    }
}

/// Compares two snapshot sets and returns the changes in emission order:
/// every connection, then every disconnection, then per-device state and
/// reason changes. Within each group devices appear in name order.
///
/// `at` stamps `Disconnected` events, which have no current snapshot to take
/// a timestamp from.
pub fn diff(previous: &SnapshotSet, current: &SnapshotSet, at: DateTime<Utc>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for device in current.iter().filter(|d| !previous.contains(&d.name)) {
        events.push(ChangeEvent::Connected {
            name: device.name.clone(),
            timestamp: device.timestamp,
        });
    }

    for name in previous.names().filter(|name| !current.contains(name)) {
        events.push(ChangeEvent::Disconnected {
            name: name.to_string(),
            timestamp: at,
        });
    }

    for device in current.iter() {
        let Some(old) = previous.get(&device.name) else {
            continue;
        };

        if old.state != device.state {
            events.push(ChangeEvent::StateChanged {
                name: device.name.clone(),
                old_state: old.state,
                new_state: device.state,
                timestamp: device.timestamp,
            });
        }

        if old.state_reasons != device.state_reasons {
            events.push(ChangeEvent::ReasonsChanged {
                name: device.name.clone(),
                old_reasons: old.state_reasons.clone(),
                new_reasons: device.state_reasons.clone(),
                timestamp: device.timestamp,
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRecord;

    fn set(records: Vec<DeviceRecord>, at: DateTime<Utc>) -> SnapshotSet {
        SnapshotSet::from_records(records, at)
    }

    fn idle(name: &str) -> DeviceRecord {
        DeviceRecord::new(name, DeviceState::Idle)
    }

    #[test]
    fn new_device_is_connected() {
        let at = Utc::now();
        let previous = set(vec![idle("A")], at);
        let current = set(vec![idle("A"), idle("B")], at);

        let events = diff(&previous, &current, at);

        assert_eq!(
            events,
            vec![ChangeEvent::Connected {
                name: "B".to_string(),
                timestamp: at
            }]
        );
    }

    #[test]
    fn missing_device_is_disconnected() {
        let at = Utc::now();
        let previous = set(vec![idle("A")], at);

        let events = diff(&previous, &SnapshotSet::new(), at);

        assert_eq!(
            events,
            vec![ChangeEvent::Disconnected {
                name: "A".to_string(),
                timestamp: at
            }]
        );
    }

    #[test]
    fn state_transition_is_reported() {
        let at = Utc::now();
        let previous = set(vec![idle("A")], at);
        let current = set(vec![DeviceRecord::new("A", DeviceState::Printing)], at);

        let events = diff(&previous, &current, at);

        assert_eq!(
            events,
            vec![ChangeEvent::StateChanged {
                name: "A".to_string(),
                old_state: DeviceState::Idle,
                new_state: DeviceState::Printing,
                timestamp: at,
            }]
        );
    }

    #[test]
    fn cleared_reason_is_reported() {
        let at = Utc::now();
        let previous = set(vec![idle("A").with_reasons(["media-empty"])], at);
        let current = set(vec![idle("A")], at);

        let events = diff(&previous, &current, at);

        assert_eq!(
            events,
            vec![ChangeEvent::ReasonsChanged {
                name: "A".to_string(),
                old_reasons: vec!["media-empty".to_string()],
                new_reasons: Vec::new(),
                timestamp: at,
            }]
        );
    }

    #[test]
    fn reason_order_is_significant() {
        let at = Utc::now();
        let previous = set(vec![idle("A").with_reasons(["a", "b"])], at);
        let current = set(vec![idle("A").with_reasons(["b", "a"])], at);

        let events = diff(&previous, &current, at);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::ReasonsChanged);
    }

    #[test]
    fn state_and_reasons_can_change_together() {
        let at = Utc::now();
        let previous = set(vec![idle("A")], at);
        let current = set(
            vec![DeviceRecord::new("A", DeviceState::Paused).with_reasons(["paused"])],
            at,
        );

        let kinds: Vec<_> = diff(&previous, &current, at).iter().map(ChangeEvent::kind).collect();

        assert_eq!(kinds, vec![ChangeKind::StateChanged, ChangeKind::ReasonsChanged]);
    }

    #[test]
    fn unchanged_devices_produce_no_events() {
        let at = Utc::now();
        let previous = set(vec![idle("A").with_reasons(["toner-low"])], at);
        let current = set(vec![idle("A").with_reasons(["toner-low"])], Utc::now());

        assert!(diff(&previous, &current, at).is_empty());
    }

    #[test]
    fn emission_order_is_connected_disconnected_then_changes() {
        let at = Utc::now();
        let previous = set(vec![idle("gone"), idle("kept"), idle("also-gone")], at);
        let current = set(
            vec![
                DeviceRecord::new("kept", DeviceState::Offline),
                idle("new-b"),
                idle("new-a"),
            ],
            at,
        );

        let events: Vec<_> = diff(&previous, &current, at)
            .iter()
            .map(|e| (e.kind(), e.name().to_string()))
            .collect();

        assert_eq!(
            events,
            vec![
                (ChangeKind::Connected, "new-a".to_string()),
                (ChangeKind::Connected, "new-b".to_string()),
                (ChangeKind::Disconnected, "also-gone".to_string()),
                (ChangeKind::Disconnected, "gone".to_string()),
                (ChangeKind::StateChanged, "kept".to_string()),
            ]
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ChangeEvent::Connected {
            name: "A".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["type"], "connected");
        assert_eq!(json["name"], "A");
    }
}
