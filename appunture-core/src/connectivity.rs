//! Online/offline tracking.
//!
//! The platform pushes signals into [`ConnectivityMonitor::report`]; listeners
//! are told about transitions only, never about repeated identical signals.
//! A failing signal source counts as offline.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Source of the platform network status.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Returns whether the device has a usable network.
    async fn is_connected(&self) -> Result<bool, String>;
}

/// A probe that always returns the same answer.
///
/// Used where there is no platform signal and the API health check is the
/// only source of truth.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl NetworkProbe for StaticProbe {
    async fn is_connected(&self) -> Result<bool, String> {
        Ok(self.0)
    }
}

struct Inner {
    online: Mutex<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

/// Tracks connectivity and fans transitions out to subscribers.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Creates a monitor. Starts offline until the first signal arrives.
    pub fn new() -> Self {
        Self::with_status(false)
    }

    pub fn with_status(online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                online: Mutex::new(online),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn status(&self) -> bool {
        *lock(&self.inner.online)
    }

    /// Registers a transition callback. Dropping the handle unsubscribes.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(callback)));
        Subscription {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Feeds one platform signal. An error means offline.
    ///
    /// Returns the resulting status.
    pub fn report<E: fmt::Display>(&self, signal: Result<bool, E>) -> bool {
        let online = match signal {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!("Network status unavailable, assuming offline: {}", e);
                false
            }
        };
        self.set_online(online);
        online
    }

    /// Sets the status and notifies listeners if it changed.
    pub fn set_online(&self, online: bool) {
        {
            let mut current = lock(&self.inner.online);
            if *current == online {
                return;
            }
            *current = online;
        }

        tracing::info!(
            "Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );

        // Call outside the lock so callbacks may read status or subscribe.
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.status())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    monitor: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
