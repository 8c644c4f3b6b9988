//! Connection event delivery.
//!
//! The [`ConnectionManager`](crate::ConnectionManager) reports every state
//! change twice: synchronously to callbacks registered in an
//! [`ObserverRegistry`], and asynchronously through a tokio broadcast channel
//! owned by an [`EventDispatcher`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

/// A change of the connection state as seen by observers.
///
/// `connected == true` always carries the device's display name;
/// `connected == false` never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// Whether a link is now open.
    pub connected: bool,
    /// Name of the connected device.
    pub display_name: Option<String>,
}

impl ConnectionEvent {
    /// A link was opened to `display_name`.
    pub fn connected(display_name: impl Into<String>) -> Self {
        Self {
            connected: true,
            display_name: Some(display_name.into()),
        }
    }

    /// The link is gone (or never came up).
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            display_name: None,
        }
    }
}

/// Handle returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Callback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Ordered list of synchronous observers.
///
/// Delivery iterates over a snapshot taken before the first callback runs, so
/// callbacks may subscribe or unsubscribe (themselves included) without
/// affecting the current delivery. A panicking callback is logged and
/// skipped.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionHandle, Callback)>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Callbacks run in registration order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((handle, Arc::new(callback)));
        handle
    }

    /// Remove a callback. Returns `false` if the handle was not registered.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(h, _)| *h != handle);
        observers.len() != before
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every callback registered at the time of the call.
    pub fn notify(&self, event: &ConnectionEvent) {
        let snapshot: Vec<Callback> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(?event, "Connection observer panicked; continuing delivery");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionHandle, Callback)>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiver for connection events.
pub type EventReceiver = broadcast::Receiver<ConnectionEvent>;

/// Event dispatcher for sending events to multiple async receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: ConnectionEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}
