use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

type Listener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;
type Listeners = RwLock<BTreeMap<u64, Listener>>;

/// Tracks the host's reachability signal and fans transitions out to
/// subscribed views. Listeners run in subscription order.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    listeners: Arc<Listeners>,
    seq: AtomicU64,
}

/// Removes its listener when dropped or on `unsubscribe`.
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut map = listeners.write().unwrap_or_else(|e| e.into_inner());
            map.remove(&self.id);
        }
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            listeners: Arc::new(RwLock::new(BTreeMap::new())),
            seq: AtomicU64::new(1),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut map = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id, Arc::new(listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Records the host signal. Returns the transition if the state changed;
    /// a repeated signal is not a transition and notifies nobody.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was == online {
            return None;
        }
        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        log::info!("connectivity changed: {:?}", event);

        // Snapshot so a listener may unsubscribe without deadlocking.
        let snapshot: Vec<Listener> = {
            let map = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        for listener in snapshot {
            listener(event);
        }
        Some(event)
    }
}
