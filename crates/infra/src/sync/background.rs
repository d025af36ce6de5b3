//! In-process [`BackgroundWake`] implementation.
//!
//! Hosts wire their platform hook (a background fetch, a network callback,
//! a push notification) to [`WakeSignal::fire`]; everything registered
//! through the port then runs.

use haven_core::sync::{BackgroundWake, WakeCallback};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct WakeSignal {
    callbacks: Mutex<Vec<WakeCallback>>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every registered callback. Returns how many ran.
    pub fn fire(&self) -> usize {
        let callbacks: Vec<WakeCallback> = self.callbacks.lock().clone();
        debug!(callbacks = callbacks.len(), "background wake fired");
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }
}

impl BackgroundWake for WakeSignal {
    fn register(&self, callback: WakeCallback) {
        self.callbacks.lock().push(callback);
    }
}
