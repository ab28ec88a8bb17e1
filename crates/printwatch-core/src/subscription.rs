use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::diff::ChangeEvent;

pub type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Identifier handed out by [`SubscriptionRegistry`]. Ids increase strictly
/// and are never reused, even after the subscription is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Active callbacks keyed by id. Iteration follows id order, which is also
/// registration order.
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    callbacks: RwLock<BTreeMap<SubscriptionId, Callback>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("active", &self.count())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            callbacks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stores `callback` under a fresh id and returns the id together with
    /// the number of subscriptions active afterwards.
    pub fn insert(&self, callback: Callback) -> (SubscriptionId, usize) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut callbacks = self.callbacks.write();
        callbacks.insert(id, callback);
        (id, callbacks.len())
    }

    /// Removes `id`. Returns `None` when it was not registered, otherwise the
    /// number of subscriptions left.
    pub fn remove(&self, id: SubscriptionId) -> Option<usize> {
        let mut callbacks = self.callbacks.write();
        callbacks.remove(&id).map(|_| callbacks.len())
    }

    pub fn count(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn snapshot(&self) -> Vec<(SubscriptionId, Callback)> {
        self.callbacks
            .read()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect()
    }
}

pub(crate) trait Unsubscriber: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Handle returned by `Monitor::subscribe`. Dropping it leaves the
/// subscription active; only [`Subscription::unsubscribe`] removes it.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    owner: Weak<dyn Unsubscriber>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, owner: Weak<dyn Unsubscriber>) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns whether a subscription was removed. Repeated calls, or calls
    /// after the monitor is gone, return `false`.
    pub fn unsubscribe(&self) -> bool {
        match self.owner.upgrade() {
            Some(owner) => owner.unsubscribe(self.id),
            None => false,
        }
    }
}
