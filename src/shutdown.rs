//! Process-wide cancellation signal.
//!
//! Every background thread (supervisor, watchdog, api accept loop, viewer
//! streams, notification worker) holds a clone of `Shutdown` and checks it at
//! its blocking points. Sleeps go through `wait_timeout` so a trip wakes them
//! immediately instead of after the full delay.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tripped: Mutex<bool>,
    cv: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter.
    pub fn trigger(&self) {
        let mut tripped = match self.inner.tripped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *tripped = true;
        self.inner.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        match self.inner.tripped.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for `timeout` unless shutdown is requested first.
    ///
    /// Returns true when shutdown was requested (before or during the wait).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut tripped = match self.inner.tripped.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*tripped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tripped = match self.inner.cv.wait_timeout(tripped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
