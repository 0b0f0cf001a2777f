//! Fixed-period per-process CPU sampler.
//!
//! [`SamplerCore`] holds the tracking tables and performs one sampling pass
//! per [`tick`](SamplerCore::tick); [`Sampler`] drives it from a dedicated
//! thread until cancelled.
//!
//! Per tick:
//! 1. enumerate pids (pid 0 is skipped)
//! 2. open and describe pids not seen before in this session
//! 3. re-query every tracked handle; exited processes move to the
//!    terminated list exactly once, live ones record one sample
//! 4. wait for the next tick boundary or cancellation
//!
//! OS calls never run under the state lock: the lock is taken once to
//! read the work list and once to apply results. Only the sampler thread
//! mutates the tables, so nothing changes between the two.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use qs_common::{classify, display_name, Error, ProcessPerformanceSummary, Result};
use qs_math::{cpu_delta_us, monotonic_delta_us, tick_percent, DEFAULT_STRIKE_THRESHOLD_PERCENT};
use tracing::{debug, info, warn};

use crate::collect::{ProcessDescriptor, ProcessHandle, ProcessSource, ProcessTimes};
use crate::logging::event_names;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Cooperative cancellation flag with a timed wait.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let _guard = lock(&self.lock);
        self.cancelled.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Block until `deadline` or cancellation. Returns true if cancelled.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut guard = lock(&self.lock);
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.cv.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

// ----------------------------------------------------------------------------
// Tracking records
// ----------------------------------------------------------------------------

/// Sampler settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub period: Duration,
    /// Per-tick percent above which a sample counts as a strike.
    pub strike_threshold_percent: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            strike_threshold_percent: DEFAULT_STRIKE_THRESHOLD_PERCENT,
        }
    }
}

/// In-flight record for one tracked process.
struct ProcessPerformanceInfo {
    summary: ProcessPerformanceSummary,
    handle: Option<Arc<dyn ProcessHandle>>,
    start_user_us: u64,
    start_kernel_us: u64,
    current_user_us: u64,
    current_kernel_us: u64,
}

impl ProcessPerformanceInfo {
    fn new(pid: u32, desc: ProcessDescriptor) -> Self {
        let category = classify(pid, &desc.name);
        let mut summary = ProcessPerformanceSummary::new(pid, desc.name, category);
        summary.path = desc.path;
        summary.package_identity = desc.package_identity;
        summary.service_name = desc.service_name;
        Self {
            summary,
            handle: None,
            start_user_us: 0,
            start_kernel_us: 0,
            current_user_us: 0,
            current_kernel_us: 0,
        }
    }

    fn with_handle(mut self, handle: Arc<dyn ProcessHandle>, times: ProcessTimes) -> Self {
        self.handle = Some(handle);
        self.summary.create_time_us = times.create_time_us;
        self.start_user_us = times.user_us;
        self.start_kernel_us = times.kernel_us;
        self.current_user_us = times.user_us;
        self.current_kernel_us = times.kernel_us;
        self
    }

    fn record(&mut self, times: &ProcessTimes, period_us: u64, cpus: u32, strike: f64) {
        let delta = cpu_delta_us(
            self.current_user_us,
            times.user_us,
            self.current_kernel_us,
            times.kernel_us,
        );
        // Keep the high-water mark so a backwards reading cannot be
        // counted twice on recovery.
        self.current_user_us = self.current_user_us.max(times.user_us);
        self.current_kernel_us = self.current_kernel_us.max(times.kernel_us);
        let percent = tick_percent(delta, period_us, cpus);
        self.summary.stats.record(percent, strike);
    }

    fn to_summary(&self) -> ProcessPerformanceSummary {
        let mut summary = self.summary.clone();
        summary.name = display_name(summary.pid, &summary.name).to_string();
        summary.total_cpu_time_us = monotonic_delta_us(self.start_user_us, self.current_user_us)
            .saturating_add(monotonic_delta_us(
                self.start_kernel_us,
                self.current_kernel_us,
            ));
        summary
    }
}

#[derive(Default)]
struct SamplerState {
    running: BTreeMap<u32, ProcessPerformanceInfo>,
    terminated: Vec<ProcessPerformanceInfo>,
    seen: HashSet<u32>,
    ticks: u64,
}

// ----------------------------------------------------------------------------
// SamplerCore
// ----------------------------------------------------------------------------

/// Sampling tables plus the single-pass tick algorithm.
pub struct SamplerCore {
    source: Arc<dyn ProcessSource>,
    period_us: u64,
    logical_cpus: u32,
    strike_threshold: f64,
    state: Mutex<SamplerState>,
}

impl SamplerCore {
    pub fn new(source: Arc<dyn ProcessSource>, config: SamplerConfig) -> Result<Self> {
        let period_us = u64::try_from(config.period.as_micros()).unwrap_or(u64::MAX);
        if period_us == 0 {
            return Err(Error::InvalidArgument(
                "sampling period must be positive".to_string(),
            ));
        }
        let logical_cpus = source.logical_cpus().max(1);
        Ok(Self {
            source,
            period_us,
            logical_cpus,
            strike_threshold: config.strike_threshold_percent,
            state: Mutex::new(SamplerState::default()),
        })
    }

    pub fn logical_cpus(&self) -> u32 {
        self.logical_cpus
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }

    /// One sampling pass. Never fails: errors are logged and only skip the
    /// affected process (or, for enumeration, the whole tick).
    pub fn tick(&self) {
        let pids = match self.source.enumerate() {
            Ok(pids) => pids,
            Err(err) => {
                warn!(event = event_names::SAMPLER_TICK_FAILED, error = %err, "process enumeration failed");
                return;
            }
        };

        let (new_pids, tracked): (Vec<u32>, Vec<(u32, Arc<dyn ProcessHandle>)>) = {
            let state = lock(&self.state);
            let new_pids = pids
                .into_iter()
                .filter(|pid| *pid != 0 && !state.seen.contains(pid))
                .collect();
            let tracked = state
                .running
                .iter()
                .filter_map(|(pid, info)| info.handle.clone().map(|h| (*pid, h)))
                .collect();
            (new_pids, tracked)
        };

        let readings: Vec<(u32, Result<ProcessTimes>)> = tracked
            .into_iter()
            .map(|(pid, handle)| (pid, handle.times()))
            .collect();
        let fresh: Vec<ProcessPerformanceInfo> =
            new_pids.into_iter().filter_map(|pid| self.track(pid)).collect();

        let mut state = lock(&self.state);
        for (pid, reading) in readings {
            match reading {
                Err(err) => {
                    debug!(event = event_names::SAMPLER_TICK_FAILED, pid, error = %err, "skipping process this tick");
                }
                Ok(times) if times.has_exited() => {
                    if let Some(mut info) = state.running.remove(&pid) {
                        info.summary.exit_time_us = times.exit_time_us;
                        info.handle = None;
                        debug!(event = event_names::SAMPLER_PROCESS_EXITED, pid, name = %info.summary.name, "process exited");
                        state.terminated.push(info);
                    }
                }
                Ok(times) => {
                    if let Some(info) = state.running.get_mut(&pid) {
                        info.record(
                            &times,
                            self.period_us,
                            self.logical_cpus,
                            self.strike_threshold,
                        );
                    }
                }
            }
        }
        for info in fresh {
            let pid = info.summary.pid;
            state.seen.insert(pid);
            state.running.insert(pid, info);
        }
        state.ticks += 1;
    }

    /// Build a tracking record for a pid seen for the first time.
    ///
    /// `None` when the process vanished or had already exited; a record
    /// without a handle when it exists but cannot be queried.
    fn track(&self, pid: u32) -> Option<ProcessPerformanceInfo> {
        let handle = match self.source.open(pid) {
            Ok(handle) => handle,
            Err(Error::ProcessNotFound { .. }) => return None,
            Err(err) => {
                debug!(event = event_names::SAMPLER_OPEN_FAILED, pid, error = %err, "tracking without handle");
                return Some(ProcessPerformanceInfo::new(pid, self.source.describe(pid)));
            }
        };
        match handle.times() {
            Ok(times) if times.has_exited() => None,
            Ok(times) => {
                let desc = self.source.describe(pid);
                Some(ProcessPerformanceInfo::new(pid, desc).with_handle(handle, times))
            }
            Err(err) => {
                debug!(event = event_names::SAMPLER_OPEN_FAILED, pid, error = %err, "initial times query failed; tracking without handle");
                Some(ProcessPerformanceInfo::new(pid, self.source.describe(pid)))
            }
        }
    }

    /// Live view: running records then terminated ones.
    pub fn snapshot(&self) -> Vec<ProcessPerformanceSummary> {
        let state = lock(&self.state);
        state
            .running
            .values()
            .chain(state.terminated.iter())
            .map(ProcessPerformanceInfo::to_summary)
            .collect()
    }

    /// Final summaries. Drops every handle; the tables are left empty.
    pub fn finish(&self) -> Vec<ProcessPerformanceSummary> {
        let mut state = lock(&self.state);
        let running = std::mem::take(&mut state.running);
        let terminated = std::mem::take(&mut state.terminated);
        running
            .into_values()
            .chain(terminated)
            .map(|info| info.to_summary())
            .collect()
    }

    pub fn tick_count(&self) -> u64 {
        lock(&self.state).ticks
    }

    pub fn running_count(&self) -> usize {
        lock(&self.state).running.len()
    }

    pub fn terminated_count(&self) -> usize {
        lock(&self.state).terminated.len()
    }
}

// ----------------------------------------------------------------------------
// Sampler thread
// ----------------------------------------------------------------------------

/// Background sampling thread.
pub struct Sampler {
    core: Arc<SamplerCore>,
    token: Arc<CancellationToken>,
    thread: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawn the sampling thread. The first tick runs immediately.
    pub fn start(source: Arc<dyn ProcessSource>, config: SamplerConfig) -> Result<Self> {
        let core = Arc::new(SamplerCore::new(source, config)?);
        let token = Arc::new(CancellationToken::new());
        let thread = {
            let core = Arc::clone(&core);
            let token = Arc::clone(&token);
            thread::Builder::new()
                .name("qs-sampler".to_string())
                .spawn(move || run(&core, &token))
                .map_err(Error::Io)?
        };
        info!(
            event = event_names::SAMPLER_STARTED,
            period_ms = config.period.as_millis() as u64,
            logical_cpus = core.logical_cpus(),
            "sampler started"
        );
        Ok(Self {
            core,
            token,
            thread: Some(thread),
        })
    }

    pub fn snapshot(&self) -> Vec<ProcessPerformanceSummary> {
        self.core.snapshot()
    }

    pub fn core(&self) -> &SamplerCore {
        &self.core
    }

    /// Cancel, join, and return the final summaries.
    ///
    /// After this returns no process handle is used again. Calling it twice
    /// returns an empty list the second time.
    pub fn stop(&mut self) -> Vec<ProcessPerformanceSummary> {
        self.token.cancel();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!(event = event_names::SAMPLER_STOPPED, "sampler thread panicked");
            }
        }
        let summaries = self.core.finish();
        info!(
            event = event_names::SAMPLER_STOPPED,
            processes = summaries.len(),
            ticks = self.core.tick_count(),
            "sampler stopped"
        );
        summaries
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run(core: &SamplerCore, token: &CancellationToken) {
    let period = core.period();
    let mut next = Instant::now();
    loop {
        if token.is_cancelled() {
            break;
        }
        core.tick();
        next += period;
        let now = Instant::now();
        if next <= now {
            // Overran a whole period; resynchronize instead of bursting.
            next = now + period;
        }
        if token.wait_until(next) {
            break;
        }
    }
}
