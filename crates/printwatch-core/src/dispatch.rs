use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::diff::ChangeEvent;
use crate::subscription::{Callback, SubscriptionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers every event to every subscriber in `subscribers`, in order. A
/// panicking callback is logged and skipped for that event only.
pub fn dispatch(events: &[ChangeEvent], subscribers: &[(SubscriptionId, Callback)]) -> DispatchReport {
    let mut report = DispatchReport::default();

    for event in events {
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        subscription = %id,
                        device = %event.name(),
                        error = %panic_message(panic.as_ref()),
                        "subscriber callback failed"
                    );
                }
            }
        }
    }

    report
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
