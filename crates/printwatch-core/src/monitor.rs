use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::diff::ChangeEvent;
use crate::error::MonitorError;
use crate::registry::DeviceRegistry;
use crate::scheduler::{PollingScheduler, TickContext};
use crate::snapshot::{SnapshotSet, SnapshotStore};
use crate::subscription::{Subscription, SubscriptionId, SubscriptionRegistry, Unsubscriber};

struct Control {
    scheduler: PollingScheduler,
    // Set by an explicit start; only stop_monitoring clears it.
    pinned: bool,
}

struct Inner {
    subscriptions: Arc<SubscriptionRegistry>,
    store: Arc<Mutex<SnapshotStore>>,
    control: Mutex<Control>,
}

impl Unsubscriber for Inner {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut control = self.control.lock();
        let Some(remaining) = self.subscriptions.remove(id) else {
            return false;
        };
        debug!(subscription = %id, remaining, "unsubscribed");

        if remaining == 0 && !control.pinned {
            control.scheduler.stop();
        }
        true
    }
}

/// Watches a [`DeviceRegistry`] and notifies subscribers about changes.
///
/// Cloning is cheap and every clone drives the same scheduler. The worker is
/// cancelled when the last clone is dropped.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("active", &self.is_monitoring_active())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Monitor {
    pub fn new(registry: impl DeviceRegistry + 'static) -> Result<Self, MonitorError> {
        Self::with_config(registry, MonitorConfig::default())
    }

    /// Builds a stopped monitor. Must be called from inside a tokio runtime,
    /// which later hosts the polling worker.
    pub fn with_config(
        registry: impl DeviceRegistry + 'static,
        config: MonitorConfig,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let store = Arc::new(Mutex::new(SnapshotStore::new()));
        let context = Arc::new(TickContext {
            registry: Arc::new(registry),
            store: Arc::clone(&store),
            subscriptions: Arc::clone(&subscriptions),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                subscriptions,
                store,
                control: Mutex::new(Control {
                    scheduler: PollingScheduler::new(context, runtime, config),
                    pinned: false,
                }),
            }),
        })
    }

    /// Starts polling and pins the scheduler so that losing every subscriber
    /// does not stop it. With `None` the stored configuration is used.
    ///
    /// An explicit config with `auto_start == false` is only stored for the
    /// next start. While running, an explicit config changes the interval.
    pub fn start_monitoring(&self, config: Option<MonitorConfig>) -> Result<(), MonitorError> {
        let mut control = self.inner.control.lock();

        if let Some(config) = &config {
            if !config.auto_start {
                return control.scheduler.configure(config.clone());
            }
        }

        control.scheduler.start(config)?;
        control.pinned = true;
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        let mut control = self.inner.control.lock();
        control.pinned = false;
        control.scheduler.stop();
    }

    pub fn is_monitoring_active(&self) -> bool {
        self.inner.control.lock().scheduler.is_active()
    }

    /// Registers `callback` for every future change event and starts polling
    /// if it is not already running.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut control = self.inner.control.lock();
        let (id, active) = self.inner.subscriptions.insert(Arc::new(callback));
        debug!(subscription = %id, active, "subscribed");

        if !control.scheduler.is_active() {
            // The stored configuration was validated when it was accepted.
            if let Err(err) = control.scheduler.start(None) {
                tracing::error!(error = %err, "failed to start monitoring for new subscriber");
            }
        }
        drop(control);

        let owner: Weak<dyn Unsubscriber> = Arc::downgrade(&self.inner) as Weak<dyn Unsubscriber>;
        Subscription::new(id, owner)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.count()
    }

    /// Copy of the last observed snapshot. Empty until the first successful
    /// tick and after every stop.
    pub fn get_snapshots(&self) -> SnapshotSet {
        self.inner.store.lock().current().clone()
    }

    pub fn set_poll_interval_seconds(&self, secs: u64) -> Result<(), MonitorError> {
        self.inner.control.lock().scheduler.set_interval(secs)
    }

    pub fn poll_interval_seconds(&self) -> u64 {
        self.inner.control.lock().scheduler.config().poll_interval_secs
    }
}
