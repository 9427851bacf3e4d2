//! A shutdown signal that can interrupt the loop's sleep.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Cloneable handle; all clones observe the same signal.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<Signal>,
}

#[derive(Debug, Default)]
struct Signal {
    triggered: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    // The flag is a plain bool, so a poisoned lock still holds a usable value.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.triggered.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown, waking any sleeper.
    pub fn trigger(&self) {
        *self.inner.lock() = true;
        self.inner.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.lock()
    }

    /// Sleep for `duration`, or until shutdown is requested.
    /// Returns true if shutdown has been requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.inner.lock();
        let (triggered, _) = self
            .inner
            .cv
            .wait_timeout_while(guard, duration, |triggered| !*triggered)
            .unwrap_or_else(PoisonError::into_inner);
        *triggered
    }
}
