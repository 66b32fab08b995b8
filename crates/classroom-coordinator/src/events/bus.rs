//! In-process publish/subscribe bus.
//!
//! `publish` delivers synchronously, in subscription order, to every
//! listener subscribed at the time of delivery. There is no buffering or
//! replay. A listener that fails (returns an error or panics) is logged and
//! skipped; delivery continues with the next listener.
//!
//! The listener list is snapshotted before delivery and no lock is held
//! while a listener runs, so listeners may publish, subscribe or
//! unsubscribe re-entrantly.

use super::GlobalEvent;
use crate::locked;
use crate::observability::metrics;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, trace, warn};

/// Listener callback.
pub type Listener = Arc<dyn Fn(&GlobalEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

/// Shared classroom event bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It sees only events published after this call.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&GlobalEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        locked(&self.inner.listeners).push((id, Arc::new(listener)));
        trace!(target: "classroom.bus", subscription = id.0, "Listener subscribed");
        id
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = locked(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        before != listeners.len()
    }

    #[must_use]
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        locked(&self.inner.listeners)
            .iter()
            .any(|(sub, _)| *sub == id)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        locked(&self.inner.listeners).len()
    }

    /// Deliver `event` to every current listener.
    pub fn publish(&self, event: &GlobalEvent) {
        let snapshot: Vec<(SubscriptionId, Listener)> = locked(&self.inner.listeners).clone();
        metrics::record_bus_publish(event.event.code());
        trace!(target: "classroom.bus", event = %event, listeners = snapshot.len(), "Publishing");

        for (id, listener) in snapshot {
            // Skip listeners removed by an earlier listener in this delivery.
            if !self.is_subscribed(id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics::record_listener_failure(event.event.code());
                    warn!(
                        target: "classroom.bus",
                        subscription = id.0,
                        event = %event,
                        error = %e,
                        "Listener failed"
                    );
                }
                Err(_) => {
                    metrics::record_listener_failure(event.event.code());
                    error!(
                        target: "classroom.bus",
                        subscription = id.0,
                        event = %event,
                        "Listener panicked"
                    );
                }
            }
        }
    }
}
