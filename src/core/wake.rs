//! Condvar-based wake signal shared by the dispatcher and the worker pool.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Shared state guarded by the wake mutex.
#[derive(Debug, Default)]
struct WakeState {
    /// Something changed since the waiter last looked.
    pending: bool,
    /// The waiter should exit.
    shutdown: bool,
}

/// Edge-coalescing wake-up with timeout, plus a sticky shutdown flag.
///
/// Any number of `notify` calls between two waits collapse into one wake-up.
#[derive(Debug, Default)]
pub struct Wakeup {
    state: Mutex<WakeState>,
    condvar: Condvar,
}

impl Wakeup {
    /// New signal with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiter (or make its next wait return immediately).
    pub fn notify(&self) {
        self.state.lock().pending = true;
        self.condvar.notify_one();
    }

    /// Set the shutdown flag and wake every waiter.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Block until notified, shut down, or `timeout` elapses.
    ///
    /// Returns `false` once shutdown has been requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.pending && !state.shutdown {
            let _ = self.condvar.wait_for(&mut state, timeout);
        }
        state.pending = false;
        !state.shutdown
    }
}
