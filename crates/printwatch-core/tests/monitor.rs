use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use printwatch_core::{
    ChangeEvent, ChangeKind, DeviceRecord, DeviceState, Monitor, MonitorConfig, MonitorError,
    SimulatedRegistry,
};

type Seen = Arc<Mutex<Vec<ChangeEvent>>>;

fn recorder() -> (Seen, impl Fn(&ChangeEvent) + Send + Sync + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event: &ChangeEvent| sink.lock().push(event.clone()))
}

fn kinds(seen: &Seen) -> Vec<(ChangeKind, String)> {
    seen.lock()
        .iter()
        .map(|e| (e.kind(), e.name().to_string()))
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn next_tick() {
    tokio::time::sleep(Duration::from_millis(2100)).await;
}

fn office_and_lab() -> SimulatedRegistry {
    SimulatedRegistry::new(vec![
        DeviceRecord::new("Office", DeviceState::Idle),
        DeviceRecord::new("Lab", DeviceState::Idle),
    ])
}

#[tokio::test(start_paused = true)]
async fn subscribe_starts_monitoring_and_reports_present_devices() {
    // Arrange
    let monitor = Monitor::new(office_and_lab()).expect("monitor");
    let (seen, callback) = recorder();

    // Act
    let _sub = monitor.subscribe(callback);
    settle().await;

    // Assert
    assert!(monitor.is_monitoring_active());
    assert_eq!(
        kinds(&seen),
        vec![
            (ChangeKind::Connected, "Lab".to_string()),
            (ChangeKind::Connected, "Office".to_string()),
        ]
    );
    assert_eq!(monitor.get_snapshots().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn subscribe_then_unsubscribe_restores_inactive_state() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");
    assert!(!monitor.is_monitoring_active());

    let sub = monitor.subscribe(|_| {});
    assert!(monitor.is_monitoring_active());

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe(), "second unsubscribe removes nothing");
    assert!(!monitor.is_monitoring_active());
    assert_eq!(monitor.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn explicit_start_is_pinned_until_stop() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");
    monitor.start_monitoring(None).expect("start");

    let sub = monitor.subscribe(|_| {});
    sub.unsubscribe();

    assert!(monitor.is_monitoring_active(), "explicit start survives losing subscribers");

    monitor.stop_monitoring();
    assert!(!monitor.is_monitoring_active());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_clears_snapshots() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");
    monitor.start_monitoring(None).expect("start");
    settle().await;
    assert_eq!(monitor.get_snapshots().len(), 2);

    monitor.stop_monitoring();
    monitor.stop_monitoring();

    assert!(!monitor.is_monitoring_active());
    assert!(monitor.get_snapshots().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_interval_is_rejected_and_state_is_unchanged() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");

    let stopped = monitor.set_poll_interval_seconds(0);
    assert!(matches!(stopped, Err(MonitorError::InvalidConfiguration { .. })));
    assert!(!monitor.is_monitoring_active());
    assert_eq!(monitor.poll_interval_seconds(), 2);

    monitor.start_monitoring(None).expect("start");
    let running = monitor.set_poll_interval_seconds(0);
    assert!(running.is_err());
    assert!(monitor.is_monitoring_active());
    assert_eq!(monitor.poll_interval_seconds(), 2);

    let bad_start = monitor.start_monitoring(Some(MonitorConfig::default().with_poll_interval_secs(0)));
    assert!(bad_start.is_err());
    assert_eq!(monitor.poll_interval_seconds(), 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_start_while_running_applies_interval_and_pins() {
    // Arrange
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let (seen, callback) = recorder();
    let sub = monitor.subscribe(callback);
    settle().await;

    // Act
    monitor
        .start_monitoring(Some(MonitorConfig::default().with_poll_interval_secs(10)))
        .expect("start while running");
    sub.unsubscribe();
    next_tick().await;

    // Assert
    assert!(monitor.is_monitoring_active(), "explicit start pins the scheduler");
    assert_eq!(monitor.poll_interval_seconds(), 10);
    assert_eq!(registry.query_count(), 1, "old cadence no longer applies");
    assert_eq!(monitor.get_snapshots().len(), 2, "store kept across the override");

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(registry.query_count(), 2);
    assert_eq!(seen.lock().len(), 2, "no second round of Connected events");
}

#[tokio::test(start_paused = true)]
async fn oversized_interval_does_not_kill_polling() {
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let _sub = monitor.subscribe(|_| {});
    settle().await;

    monitor.set_poll_interval_seconds(u64::MAX).expect("huge interval");
    settle().await;
    monitor.set_poll_interval_seconds(1).expect("one second");
    tokio::time::sleep(Duration::from_millis(5500)).await;

    assert!(monitor.is_monitoring_active());
    assert!(registry.query_count() >= 5, "ticks resumed at the new cadence");
}

#[tokio::test(start_paused = true)]
async fn changes_between_ticks_are_classified() {
    // Arrange
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let (seen, callback) = recorder();
    let _sub = monitor.subscribe(callback);
    settle().await;
    seen.lock().clear();

    // Act
    registry.upsert(DeviceRecord::new("Office", DeviceState::Printing).with_reasons(["toner-low"]));
    registry.remove("Lab");
    registry.upsert(DeviceRecord::new("Annex", DeviceState::Offline));
    next_tick().await;

    // Assert
    assert_eq!(
        kinds(&seen),
        vec![
            (ChangeKind::Connected, "Annex".to_string()),
            (ChangeKind::Disconnected, "Lab".to_string()),
            (ChangeKind::StateChanged, "Office".to_string()),
            (ChangeKind::ReasonsChanged, "Office".to_string()),
        ]
    );
    match &seen.lock()[2] {
        ChangeEvent::StateChanged {
            old_state, new_state, ..
        } => {
            assert_eq!(*old_state, DeviceState::Idle);
            assert_eq!(*new_state, DeviceState::Printing);
        }
        other => panic!("unexpected event {other:?}"),
    };
}

#[tokio::test(start_paused = true)]
async fn registry_failure_does_not_produce_disconnect_storm() {
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let (seen, callback) = recorder();
    let _sub = monitor.subscribe(callback);
    settle().await;
    let before = monitor.get_snapshots();
    seen.lock().clear();

    registry.fail_next(1);
    next_tick().await;

    assert!(seen.lock().is_empty());
    assert_eq!(monitor.get_snapshots(), before);

    next_tick().await;
    assert!(seen.lock().is_empty(), "recovered query matches retained snapshot");
    assert_eq!(registry.query_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_during_inflight_tick_discards_its_result() {
    let registry = office_and_lab();
    registry.set_delay(Some(Duration::from_secs(1)));
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let (seen, callback) = recorder();
    monitor.start_monitoring(None).expect("start");
    let _sub = monitor.subscribe(callback);
    settle().await;
    assert_eq!(registry.query_count(), 1, "first query is in flight");

    monitor.stop_monitoring();
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(monitor.get_snapshots().is_empty());
    assert!(seen.lock().is_empty());
    assert_eq!(registry.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_subscriber_is_isolated() {
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let _bad = monitor.subscribe(|_| panic!("subscriber bug"));
    let (seen, callback) = recorder();
    let _good = monitor.subscribe(callback);
    settle().await;

    registry.upsert(DeviceRecord::new("Lab", DeviceState::Paused));
    next_tick().await;

    assert_eq!(
        kinds(&seen),
        vec![
            (ChangeKind::Connected, "Lab".to_string()),
            (ChangeKind::Connected, "Office".to_string()),
            (ChangeKind::StateChanged, "Lab".to_string()),
        ]
    );
    assert!(monitor.is_monitoring_active());
}

#[tokio::test(start_paused = true)]
async fn subscriber_added_mid_dispatch_misses_inflight_events() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");
    let (late_seen, late_callback) = recorder();
    let late_callback = Arc::new(Mutex::new(Some(late_callback)));
    let handle = monitor.clone();

    let _first = monitor.subscribe(move |_| {
        if let Some(callback) = late_callback.lock().take() {
            let _late = handle.subscribe(callback);
        }
    });
    settle().await;

    assert_eq!(monitor.subscription_count(), 2);
    assert!(late_seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interval_change_reschedules_without_reset() {
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let (seen, callback) = recorder();
    let _sub = monitor.subscribe(callback);
    settle().await;

    monitor.set_poll_interval_seconds(10).expect("interval");
    next_tick().await;
    assert_eq!(registry.query_count(), 1, "old cadence no longer applies");

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(registry.query_count(), 2);
    assert_eq!(seen.lock().len(), 2, "history kept across the interval change");
}

#[tokio::test(start_paused = true)]
async fn subscription_ids_are_unique_and_increasing() {
    let monitor = Monitor::new(office_and_lab()).expect("monitor");

    let a = monitor.subscribe(|_| {});
    a.unsubscribe();
    let b = monitor.subscribe(|_| {});
    let c = monitor.subscribe(|_| {});

    assert!(a.id() < b.id());
    assert!(b.id() < c.id());
    assert!(monitor.unsubscribe(b.id()));
    assert!(!monitor.unsubscribe(b.id()));
}

#[tokio::test(start_paused = true)]
async fn dropping_monitor_stops_polling() {
    let registry = office_and_lab();
    let monitor = Monitor::new(registry.clone()).expect("monitor");
    let sub = monitor.subscribe(|_| {});
    settle().await;

    drop(monitor);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(registry.query_count(), 1);
    assert!(!sub.unsubscribe());
}
