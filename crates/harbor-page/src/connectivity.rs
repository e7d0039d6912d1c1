//! Online/offline tracking for the page UI.
//!
//! Purely observational: request routing never consults it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// A transition reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// Handle for removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
    callbacks: Mutex<Vec<(CallbackId, Callback)>>,
    next_callback: AtomicU64,
    was_offline: AtomicBool,
    last_changed: Mutex<Option<Instant>>,
}

impl ConnectivityMonitor {
    /// Start from the host's current flag.
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        Self {
            online,
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
            was_offline: AtomicBool::new(!initially_online),
            last_changed: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Call `callback` with the new flag on every transition.
    pub fn on_change(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> CallbackId {
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
        lock(&self.callbacks).push((id, Arc::new(callback)));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = lock(&self.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() < before
    }

    /// Apply a host report. Returns whether the flag actually changed;
    /// repeated reports of the same state fire nothing.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        *lock(&self.last_changed) = Some(Instant::now());
        if !online {
            self.was_offline.store(true, Ordering::Relaxed);
        }
        info!(online, "Connectivity changed");

        let callbacks: Vec<Callback> = lock(&self.callbacks).iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(online);
        }
        true
    }

    pub fn handle_event(&self, event: ConnectivityEvent) -> bool {
        self.set_online(event == ConnectivityEvent::Online)
    }

    /// Whether the page went offline since the last acknowledgement.
    pub fn was_offline(&self) -> bool {
        self.was_offline.load(Ordering::Relaxed)
    }

    /// Clear `was_offline`, e.g. after showing a "back online" notice.
    pub fn acknowledge(&self) {
        if self.is_online() {
            self.was_offline.store(false, Ordering::Relaxed);
        }
    }

    pub fn last_changed(&self) -> Option<Instant> {
        *lock(&self.last_changed)
    }

    /// Feed host events into the monitor until the sender closes.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                monitor.handle_event(event);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
