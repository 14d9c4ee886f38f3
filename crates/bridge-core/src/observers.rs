//! Consumer-registered event observers.
//!
//! Each event kind keeps its own ordered list of callbacks. Delivery runs
//! every callback for the event's kind in registration order; a callback
//! that returns an error or panics is logged and skipped, and delivery
//! continues with the next one.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::error;

use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventKind};

/// Callback invoked with each delivered event of the kind it subscribed to.
pub type Observer = Arc<dyn Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Registration handle, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered observer lists per event kind.
#[derive(Default)]
pub struct EventObservers {
    lists: RwLock<HashMap<EventKind, Vec<(ObserverId, Observer)>>>,
    next_id: AtomicU64,
}

impl EventObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observer` to the list for `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, observer: F) -> ObserverId
    where
        F: Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, Arc::new(observer)));
        id
    }

    /// Remove a registration. Returns whether it was present.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        for list in lists.values_mut() {
            if let Some(pos) = list.iter().position(|(entry, _)| *entry == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver `event` to every observer of its kind.
    ///
    /// Returns the failures, already logged. The list is snapshotted before
    /// delivery so observers may subscribe or unsubscribe from inside a callback.
    pub fn notify(&self, event: &BridgeEvent) -> Vec<BridgeError> {
        let kind = event.kind();
        let snapshot: Vec<Observer> = self
            .lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|list| list.iter().map(|(_, observer)| observer.clone()).collect())
            .unwrap_or_default();

        let mut failures = Vec::new();
        for observer in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer(event)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };

            let failure = BridgeError::ObserverFailure {
                event: kind.to_string(),
                message,
            };
            error!("{}", failure);
            failures.push(failure);
        }
        failures
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
