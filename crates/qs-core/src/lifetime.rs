//! Keep-alive reference count for the hosting process.
//!
//! A session acquires a [`LifetimeGuard`] when it becomes active and drops
//! it at the end of deactivation. The host waits on
//! [`ServerLifetime::wait_until_released`] to know when it may exit.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug, Default)]
pub struct ServerLifetime {
    count: Mutex<usize>,
    cv: Condvar,
}

impl ServerLifetime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn count(&self) -> MutexGuard<'_, usize> {
        self.count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take one reference. Released when the guard drops.
    pub fn acquire(self: &Arc<Self>) -> LifetimeGuard {
        let mut count = self.count();
        *count += 1;
        trace!(references = *count, "keep-alive acquired");
        LifetimeGuard {
            lifetime: Some(Arc::clone(self)),
        }
    }

    pub fn active_count(&self) -> usize {
        *self.count()
    }

    /// Block until the count is zero or `timeout` elapses. Returns true
    /// when released.
    pub fn wait_until_released(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = match self.cv.wait_timeout(count, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    fn release(&self) {
        let mut count = self.count();
        *count = count.saturating_sub(1);
        trace!(references = *count, "keep-alive released");
        if *count == 0 {
            self.cv.notify_all();
        }
    }
}

/// One keep-alive reference.
#[derive(Debug)]
#[must_use = "dropping the guard releases the keep-alive immediately"]
pub struct LifetimeGuard {
    lifetime: Option<Arc<ServerLifetime>>,
}

impl LifetimeGuard {
    /// Release now. Same as dropping.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(lifetime) = self.lifetime.take() {
            lifetime.release();
        }
    }
}

impl Drop for LifetimeGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
