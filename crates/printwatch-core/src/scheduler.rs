use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{validate_interval, MonitorConfig};
use crate::diff::diff;
use crate::dispatch::dispatch;
use crate::error::MonitorError;
use crate::registry::{DeviceRegistry, RegistryError};
use crate::snapshot::{SnapshotSet, SnapshotStore};
use crate::subscription::SubscriptionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Completed { events: usize },
    Skipped,
    Stale,
}

/// Everything one tick touches. Shared between the monitor and its worker.
pub(crate) struct TickContext {
    pub(crate) registry: Arc<dyn DeviceRegistry>,
    pub(crate) store: Arc<Mutex<SnapshotStore>>,
    pub(crate) subscriptions: Arc<SubscriptionRegistry>,
}

impl TickContext {
    /// Query, diff, replace, dispatch. A failed query leaves the store
    /// untouched; a tick whose generation was cleared underneath it is
    /// dropped without dispatching.
    pub(crate) async fn tick(&self, generation: u64, query_timeout: Duration) -> TickOutcome {
        let queried = match tokio::time::timeout(query_timeout, self.registry.query_devices()).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout),
        };

        let records = match queried {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "device registry query failed, keeping previous snapshot");
                return TickOutcome::Skipped;
            }
        };

        let at = Utc::now();
        let current = SnapshotSet::from_records(records, at);

        let events = {
            let mut store = self.store.lock();
            if store.generation() != generation {
                debug!(generation, current = store.generation(), "discarding stale tick");
                return TickOutcome::Stale;
            }
            let events = diff(store.current(), &current, at);
            store.replace(generation, current);
            events
        };

        if events.is_empty() {
            return TickOutcome::Completed { events: 0 };
        }

        let subscribers = self.subscriptions.snapshot();
        let report = dispatch(&events, &subscribers);
        debug!(
            events = events.len(),
            subscribers = subscribers.len(),
            delivered = report.delivered,
            failed = report.failed,
            "tick dispatched"
        );

        TickOutcome::Completed {
            events: events.len(),
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    interval_tx: watch::Sender<Duration>,
}

/// Drives recurring ticks on a single tokio task. At most one worker exists
/// at a time and a worker awaits each tick before waiting for the next one,
/// so ticks never overlap.
pub struct PollingScheduler {
    context: Arc<TickContext>,
    runtime: Handle,
    config: MonitorConfig,
    worker: Option<Worker>,
}

impl PollingScheduler {
    pub(crate) fn new(context: Arc<TickContext>, runtime: Handle, config: MonitorConfig) -> Self {
        Self {
            context,
            runtime,
            config,
            worker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.worker.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Stores `config` for the next start. While running only the interval
    /// takes effect; the running worker keeps its query timeout.
    pub fn configure(&mut self, config: MonitorConfig) -> Result<(), MonitorError> {
        config.validate()?;
        let interval_secs = config.poll_interval_secs;
        let query_timeout = if self.is_active() {
            self.config.query_timeout
        } else {
            config.query_timeout
        };
        self.config = MonitorConfig {
            poll_interval_secs: self.config.poll_interval_secs,
            query_timeout,
            ..config
        };
        self.set_interval(interval_secs)
    }

    /// Starts ticking with `config` (or the stored one). Returns `false` when
    /// already running, in which case only the interval of an explicit
    /// `config` is applied.
    pub fn start(&mut self, config: Option<MonitorConfig>) -> Result<bool, MonitorError> {
        if self.is_active() {
            if let Some(config) = config {
                self.configure(config)?;
            }
            return Ok(false);
        }

        let config = config.unwrap_or_else(|| self.config.clone());
        config.validate()?;
        self.config = config;

        let generation = self.context.store.lock().clear();
        let period = self.config.poll_interval();
        let cancel = CancellationToken::new();
        let (interval_tx, interval_rx) = watch::channel(period);

        self.runtime.spawn(run_worker(
            Arc::clone(&self.context),
            generation,
            self.config.query_timeout,
            interval_rx,
            cancel.clone(),
        ));
        self.worker = Some(Worker { cancel, interval_tx });

        info!(interval_secs = self.config.poll_interval_secs, generation, "monitoring started");
        Ok(true)
    }

    /// Cancels the worker and clears the snapshot store. Returns `false` when
    /// already stopped.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return false;
        };
        worker.cancel.cancel();
        self.context.store.lock().clear();
        info!("monitoring stopped");
        true
    }

    pub fn set_interval(&mut self, secs: u64) -> Result<(), MonitorError> {
        validate_interval(secs)?;
        if secs == self.config.poll_interval_secs {
            return Ok(());
        }
        self.config.poll_interval_secs = secs;

        if let Some(worker) = &self.worker {
            // The worker owns the receiver until it exits.
            let _ = worker.interval_tx.send(Duration::from_secs(secs));
            info!(interval_secs = secs, "poll interval changed");
        }
        Ok(())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

// Roughly 30 years. Longer cadences are scheduled at this horizon so deadline
// arithmetic cannot overflow `Instant`.
const SCHEDULING_HORIZON: Duration = Duration::from_secs(86_400 * 365 * 30);

fn ticker(first: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_worker(
    context: Arc<TickContext>,
    generation: u64,
    query_timeout: Duration,
    mut interval_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    let mut ticks = interval((*interval_rx.borrow_and_update()).min(SCHEDULING_HORIZON));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = (*interval_rx.borrow_and_update()).min(SCHEDULING_HORIZON);
                ticks = ticker(Instant::now() + period, period);
            }
            _ = ticks.tick() => {
                if context.tick(generation, query_timeout).await == TickOutcome::Stale {
                    break;
                }
            }
        }
    }

    debug!(generation, "scheduler worker exited");
}
