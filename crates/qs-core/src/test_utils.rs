//! Test doubles for qs-core.
//!
//! - [`FakeProcessSource`]: a scripted process table with controllable CPU
//!   counters, exits, and open/query failures
//! - [`RecordingPolicy`]: counts enable/disable calls
//! - [`FailingPolicy`]: fails enable or disable on demand
//!
//! Exposed to integration tests through the `test-utils` feature.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use qs_common::{now_unix_micros, Error, Result};

use crate::collect::{ProcessDescriptor, ProcessHandle, ProcessSource, ProcessTimes};
use crate::policy::QuietModePolicy;

// ============================================================================
// FakeProcessSource
// ============================================================================

#[derive(Debug, Clone, Default)]
struct FakeProcess {
    descriptor: ProcessDescriptor,
    times: ProcessTimes,
    fail_times: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    processes: HashMap<u32, FakeProcess>,
    denied: HashSet<u32>,
    vanishing: HashSet<u32>,
    fail_enumerate: bool,
    logical_cpus: u32,
}

/// Scripted [`ProcessSource`].
///
/// Processes stay enumerable after [`exit`](Self::exit) until
/// [`remove`](Self::remove)d, like a zombie that has not been reaped.
#[derive(Debug, Clone)]
pub struct FakeProcessSource {
    state: Arc<Mutex<FakeState>>,
    open_handles: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
}

impl FakeProcessSource {
    pub fn new(logical_cpus: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                logical_cpus,
                ..FakeState::default()
            })),
            open_handles: Arc::new(AtomicUsize::new(0)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_process(&self, pid: u32, name: &str) {
        self.add_described(
            pid,
            ProcessDescriptor {
                name: name.to_string(),
                path: "/usr/bin".to_string(),
                ..ProcessDescriptor::default()
            },
        );
    }

    pub fn add_described(&self, pid: u32, descriptor: ProcessDescriptor) {
        self.state().processes.insert(
            pid,
            FakeProcess {
                descriptor,
                times: ProcessTimes {
                    create_time_us: now_unix_micros(),
                    ..ProcessTimes::default()
                },
                fail_times: false,
            },
        );
    }

    pub fn set_cpu(&self, pid: u32, user_us: u64, kernel_us: u64) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.times.user_us = user_us;
            p.times.kernel_us = kernel_us;
        }
    }

    pub fn advance_cpu(&self, pid: u32, user_us: u64, kernel_us: u64) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.times.user_us += user_us;
            p.times.kernel_us += kernel_us;
        }
    }

    /// Mark a process exited at `exit_time_us` (unix micros).
    pub fn exit(&self, pid: u32, exit_time_us: u64) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.times.exit_time_us = exit_time_us;
        }
    }

    /// Drop a process from the table entirely.
    pub fn remove(&self, pid: u32) {
        self.state().processes.remove(&pid);
    }

    /// Opening this pid fails with `PermissionDenied`.
    pub fn deny(&self, pid: u32) {
        self.state().denied.insert(pid);
    }

    /// Opening this pid fails with `ProcessNotFound`.
    pub fn vanish_on_open(&self, pid: u32) {
        self.state().vanishing.insert(pid);
    }

    pub fn fail_times(&self, pid: u32, fail: bool) {
        if let Some(p) = self.state().processes.get_mut(&pid) {
            p.fail_times = fail;
        }
    }

    pub fn fail_enumerate(&self, fail: bool) {
        self.state().fail_enumerate = fail;
    }

    pub fn set_cpus(&self, logical_cpus: u32) {
        self.state().logical_cpus = logical_cpus;
    }

    /// Handles opened and not yet dropped.
    pub fn open_handle_count(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Total successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ProcessSource for FakeProcessSource {
    fn enumerate(&self) -> Result<Vec<u32>> {
        let state = self.state();
        if state.fail_enumerate {
            return Err(Error::Collection("scripted enumeration failure".to_string()));
        }
        let mut pids: Vec<u32> = state.processes.keys().copied().collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn open(&self, pid: u32) -> Result<Arc<dyn ProcessHandle>> {
        let state = self.state();
        if state.vanishing.contains(&pid) || !state.processes.contains_key(&pid) {
            return Err(Error::ProcessNotFound { pid });
        }
        if state.denied.contains(&pid) {
            return Err(Error::PermissionDenied { pid });
        }
        drop(state);
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeHandle {
            pid,
            state: Arc::clone(&self.state),
            open_handles: Arc::clone(&self.open_handles),
        }))
    }

    fn describe(&self, pid: u32) -> ProcessDescriptor {
        self.state()
            .processes
            .get(&pid)
            .map(|p| p.descriptor.clone())
            .unwrap_or_default()
    }

    fn logical_cpus(&self) -> u32 {
        self.state().logical_cpus
    }
}

struct FakeHandle {
    pid: u32,
    state: Arc<Mutex<FakeState>>,
    open_handles: Arc<AtomicUsize>,
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn times(&self) -> Result<ProcessTimes> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match state.processes.get(&self.pid) {
            Some(p) if p.fail_times => Err(Error::Collection(format!(
                "scripted times failure for pid {}",
                self.pid
            ))),
            Some(p) => Ok(p.times),
            None => Ok(ProcessTimes {
                exit_time_us: now_unix_micros(),
                ..ProcessTimes::default()
            }),
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Policies
// ============================================================================

/// Policy that records calls and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingPolicy {
    enables: AtomicUsize,
    disables: AtomicUsize,
    enabled: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
    disable_delay: Option<Duration>,
}

impl RecordingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside `disable` to widen race windows.
    pub fn with_disable_delay(mut self, delay: Duration) -> Self {
        self.disable_delay = Some(delay);
        self
    }

    pub fn enable_count(&self) -> usize {
        self.enables.load(Ordering::SeqCst)
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Call log in order, as `"enable"` / `"disable"`.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn log(&self, call: &'static str) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl QuietModePolicy for RecordingPolicy {
    fn name(&self) -> &str {
        "recording"
    }

    fn enable(&self) -> Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
        self.log("enable");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        if let Some(delay) = self.disable_delay {
            std::thread::sleep(delay);
        }
        self.disables.fetch_add(1, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        self.log("disable");
        Ok(())
    }
}

/// Policy that fails on demand.
#[derive(Debug, Default)]
pub struct FailingPolicy {
    fail_enable: bool,
    fail_disable: bool,
    disables: AtomicUsize,
}

impl FailingPolicy {
    /// `enable` fails; `disable` succeeds.
    pub fn new() -> Self {
        Self {
            fail_enable: true,
            ..Self::default()
        }
    }

    /// `enable` succeeds; `disable` fails.
    pub fn failing_disable() -> Self {
        Self {
            fail_disable: true,
            ..Self::default()
        }
    }

    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::SeqCst)
    }
}

impl QuietModePolicy for FailingPolicy {
    fn name(&self) -> &str {
        "failing"
    }

    fn enable(&self) -> Result<()> {
        if self.fail_enable {
            Err(Error::PolicyFailed("scripted enable failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn disable(&self) -> Result<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        if self.fail_disable {
            Err(Error::PolicyFailed("scripted disable failure".to_string()))
        } else {
            Ok(())
        }
    }
}
