//! Network reachability monitor.
//!
//! Owns the single [`ConnectivityState`] for a sync context. Raw platform or
//! probe signals go through [`ConnectivityMonitor::report`], which debounces
//! them; a transition is committed only if the new state holds for the whole
//! debounce window. Listeners fire once per committed transition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use haven_domain::ConnectivityState;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::Clock;

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

struct Inner {
    tx: watch::Sender<ConnectivityState>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
    generation: AtomicU64,
    debounce: Duration,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// A reported change must hold for `debounce` before it is committed.
    pub fn new(initially_online: bool, debounce: Duration, clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState::new(initially_online, clock.now()));
        Self {
            inner: Arc::new(Inner {
                tx,
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                debounce,
                clock,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.tx.borrow().online
    }

    pub fn state(&self) -> ConnectivityState {
        *self.inner.tx.borrow()
    }

    /// Receiver that observes every committed state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.tx.subscribe()
    }

    pub fn on_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(callback));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().remove(&id).is_some()
    }

    /// Feed a raw observation. Never blocks.
    ///
    /// Outside a tokio runtime, or with a zero debounce window, the
    /// observation is committed immediately.
    pub fn report(&self, observed: bool) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if observed == self.is_online() {
            // Cancels any pending opposite transition.
            return;
        }

        let runtime = tokio::runtime::Handle::try_current();
        match runtime {
            Ok(handle) if !self.inner.debounce.is_zero() => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep(inner.debounce).await;
                    if inner.generation.load(Ordering::Acquire) == generation {
                        commit(&inner, observed);
                    } else {
                        debug!(observed, "connectivity signal superseded during debounce");
                    }
                });
            }
            _ => commit(&self.inner, observed),
        }
    }

    /// Commit a state immediately, cancelling any pending debounced signal.
    pub fn set_online(&self, online: bool) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        commit(&self.inner, online);
    }
}

fn commit(inner: &Inner, online: bool) {
    let now = inner.clock.now();
    let changed = inner.tx.send_if_modified(|state| {
        if state.online == online {
            false
        } else {
            *state = ConnectivityState::new(online, now);
            true
        }
    });
    if !changed {
        return;
    }

    info!(online, "connectivity changed");
    let state = ConnectivityState::new(online, now);
    let listeners: Vec<Listener> = inner.listeners.lock().values().cloned().collect();
    for listener in listeners {
        listener(state);
    }
}
