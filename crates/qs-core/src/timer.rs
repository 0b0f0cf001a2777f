//! Cancellable one-shot countdown timer.
//!
//! A dedicated thread waits on a condition variable until the deadline or
//! until [`Timer::cancel`] wakes it. The callback runs at most once, outside
//! the lock. Cancellation and firing are serialized by the same lock:
//!
//! - cancel before expiry: the callback never runs
//! - cancel while the callback runs: `cancel` blocks until it returns
//!   (unless called from the callback itself)
//! - cancel after expiry: no-op
//!
//! Dropping a [`Timer`] cancels and joins its thread. Never drop one from
//! inside its own callback stack unless that is the last owner; hand the
//! drop to another thread instead (see `QuietSession::stop`).

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use qs_common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Firing,
    Fired,
    Cancelled,
}

struct TimerState {
    deadline: Instant,
    phase: Phase,
}

struct Shared {
    state: Mutex<TimerState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-shot countdown with a callback on expiry.
pub struct Timer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Timer {
    /// Start counting down `duration`; `on_expire` runs on the timer thread.
    pub fn start<F>(duration: Duration, on_expire: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                deadline: Instant::now() + duration,
                phase: Phase::Pending,
            }),
            cv: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("qs-timer".to_string())
            .spawn(move || run(&worker, on_expire))
            .map_err(Error::Io)?;
        let thread_id = handle.thread().id();
        Ok(Self {
            shared,
            thread: Some(handle),
            thread_id,
        })
    }

    /// Suppress the callback if it has not started; wait for it if it has.
    ///
    /// Idempotent. After this returns the callback either never ran or has
    /// completed, except when called from the callback itself.
    pub fn cancel(&self) {
        let mut state = self.shared.lock();
        match state.phase {
            Phase::Pending => {
                state.phase = Phase::Cancelled;
                self.shared.cv.notify_all();
            }
            Phase::Firing if thread::current().id() != self.thread_id => {
                while state.phase == Phase::Firing {
                    state = self
                        .shared
                        .cv
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
            _ => {}
        }
    }

    /// Remaining time; zero once cancelled or expired.
    pub fn time_left(&self) -> Duration {
        let state = self.shared.lock();
        match state.phase {
            Phase::Pending => state.deadline.saturating_duration_since(Instant::now()),
            _ => Duration::ZERO,
        }
    }

    /// True once the callback has started (or finished).
    pub fn has_fired(&self) -> bool {
        matches!(self.shared.lock().phase, Phase::Firing | Phase::Fired)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().phase == Phase::Cancelled
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.thread.take() {
            if thread::current().id() != self.thread_id {
                let _ = handle.join();
            }
        }
    }
}

fn run<F: FnOnce()>(shared: &Shared, on_expire: F) {
    let mut state = shared.lock();
    loop {
        if state.phase != Phase::Pending {
            return;
        }
        let now = Instant::now();
        if now >= state.deadline {
            state.phase = Phase::Firing;
            break;
        }
        let wait = state.deadline - now;
        state = match shared.cv.wait_timeout(state, wait) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }
    drop(state);

    on_expire();

    let mut state = shared.lock();
    state.phase = Phase::Fired;
    shared.cv.notify_all();
}
