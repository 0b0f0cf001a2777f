//! Quiet session lifecycle.
//!
//! A [`QuietSession`] moves `Inactive -> Active -> Deactivated` exactly once.
//! Starting enables the quiet-mode policy, starts the sampler, arms the
//! expiry timer and takes a keep-alive reference. Deactivation, from the
//! timer or an explicit stop, runs the teardown once:
//!
//! 1. stop the sampler and collect its summaries
//! 2. disable the quiet-mode policy (failures logged)
//! 3. persist the summary file (failures logged)
//! 4. publish the report telemetry (failures logged)
//! 5. emit the session-stopped event
//! 6. release the keep-alive
//!
//! The session lock only guards state changes; policy calls, sampler
//! joins, and file or telemetry I/O happen outside it.

pub mod manager;

pub use manager::SessionManager;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

use qs_common::{Error, FlagThresholds, ProcessPerformanceSummary, Result, SessionId};
use qs_telemetry::{MultiSink, TelemetryEvent, TelemetryRecord, TelemetrySink, TracingSink};
use tracing::{error, info, warn};

use crate::collect::{self, collect_host_info, ProcessSource};
use crate::config::QuietConfig;
use crate::debug;
use crate::lifetime::{LifetimeGuard, ServerLifetime};
use crate::logging::event_names;
use crate::policy::{policy_from_commands, QuietModePolicy};
use crate::report;
use crate::sampler::{Sampler, SamplerConfig};
use crate::timer::Timer;

/// Collaborators shared by every session of a process.
#[derive(Clone)]
pub struct SessionDeps {
    pub source: Arc<dyn ProcessSource>,
    pub policy: Arc<dyn QuietModePolicy>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub lifetime: Arc<ServerLifetime>,
}

impl SessionDeps {
    /// Platform process source, configured policy, and a tracing sink plus
    /// the optional JSONL telemetry file.
    pub fn from_config(config: &QuietConfig) -> Result<Self> {
        let source = collect::default_source()?;
        let policy = policy_from_commands(
            &config.policy.enable_command,
            &config.policy.disable_command,
            Duration::from_secs(config.policy.command_timeout_secs),
        )?;
        let mut telemetry = MultiSink::new().with(Arc::new(TracingSink));
        if let Some(path) = &config.report.telemetry_path {
            let sink = qs_telemetry::JsonlFileSink::open(path)
                .map_err(|e| Error::Config(format!("telemetry file {}: {e}", path.display())))?;
            telemetry = telemetry.with(Arc::new(sink));
        }
        Ok(Self {
            source,
            policy,
            telemetry: Arc::new(telemetry),
            lifetime: ServerLifetime::new(),
        })
    }
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub duration: Duration,
    pub sampler: SamplerConfig,
    pub flags: FlagThresholds,
    pub summary_path: PathBuf,
    pub system_directory: PathBuf,
    pub wait_for_debugger: bool,
}

impl SessionSettings {
    pub fn from_config(config: &QuietConfig) -> Self {
        Self {
            duration: config.session_duration(),
            sampler: config.sampler_config(),
            flags: config.flags.clone(),
            summary_path: config.summary_path(),
            system_directory: config.report.system_directory.clone(),
            wait_for_debugger: config.session.wait_for_debugger,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active,
    Deactivated,
}

struct SessionCore {
    state: SessionState,
    starting: bool,
    sampler: Option<Sampler>,
    timer: Option<Timer>,
    keepalive: Option<LifetimeGuard>,
    started_at: Option<Instant>,
    results: Option<Vec<ProcessPerformanceSummary>>,
}

struct SessionInner {
    id: SessionId,
    deps: SessionDeps,
    settings: SessionSettings,
    core: Mutex<SessionCore>,
    deactivated: AtomicBool,
    teardowns: AtomicUsize,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: TelemetryEvent) {
        let record = TelemetryRecord::new(self.id.as_str(), event);
        if let Err(err) = self.deps.telemetry.emit(&record) {
            warn!(event = event_names::REPORT_TELEMETRY_FAILED, session_id = %self.id, error = %err, "telemetry emit failed");
        }
    }

    fn disable_policy(&self) {
        if let Err(err) = self.deps.policy.disable() {
            error!(
                event = event_names::POLICY_DISABLE_FAILED,
                session_id = %self.id,
                policy = self.deps.policy.name(),
                error = %err,
                "failed to disable quiet mode"
            );
        }
    }
}

/// One quiet session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct QuietSession {
    inner: Arc<SessionInner>,
}

impl QuietSession {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                deps,
                settings,
                core: Mutex::new(SessionCore {
                    state: SessionState::Inactive,
                    starting: false,
                    sampler: None,
                    timer: None,
                    keepalive: None,
                    started_at: None,
                    results: None,
                }),
                deactivated: AtomicBool::new(false),
                teardowns: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Start the session and return the time left.
    ///
    /// Only valid once, on a fresh session. On failure nothing stays
    /// enabled or running and the session remains `Inactive`.
    pub fn start(&self) -> Result<Duration> {
        {
            let mut core = self.inner.lock();
            if core.state != SessionState::Inactive
                || core.starting
                || self.inner.deactivated.load(Ordering::SeqCst)
            {
                return Err(Error::SessionAlreadyStarted {
                    session_id: self.inner.id.to_string(),
                });
            }
            core.starting = true;
        }

        let result = self.start_unlocked();
        if let Err(err) = &result {
            self.inner.lock().starting = false;
            warn!(event = event_names::SESSION_START_FAILED, session_id = %self.inner.id, error = %err, "quiet session start failed");
        }
        result
    }

    fn start_unlocked(&self) -> Result<Duration> {
        let inner = &self.inner;
        if inner.settings.wait_for_debugger {
            debug::wait_for_debugger(debug::MAX_DEBUGGER_WAIT);
        }

        inner.deps.policy.enable()?;

        let mut sampler = match Sampler::start(Arc::clone(&inner.deps.source), inner.settings.sampler)
        {
            Ok(sampler) => sampler,
            Err(err) => {
                inner.disable_policy();
                return Err(err);
            }
        };

        let mut core = inner.lock();
        if core.state == SessionState::Deactivated {
            drop(core);
            sampler.stop();
            inner.disable_policy();
            return Err(Error::SessionStartFailed(
                "session was stopped while starting".to_string(),
            ));
        }

        let weak: Weak<SessionInner> = Arc::downgrade(inner);
        let timer = match Timer::start(inner.settings.duration, move || {
            if let Some(inner) = weak.upgrade() {
                info!(event = event_names::SESSION_EXPIRED, session_id = %inner.id, "quiet session expired");
                QuietSession { inner }.deactivate(false);
            }
        }) {
            Ok(timer) => timer,
            Err(err) => {
                drop(core);
                sampler.stop();
                inner.disable_policy();
                return Err(err);
            }
        };

        let time_left = timer.time_left();
        core.sampler = Some(sampler);
        core.timer = Some(timer);
        core.keepalive = Some(inner.deps.lifetime.acquire());
        core.started_at = Some(Instant::now());
        core.state = SessionState::Active;
        core.starting = false;
        drop(core);

        info!(
            event = event_names::SESSION_STARTED,
            session_id = %inner.id,
            duration_secs = inner.settings.duration.as_secs(),
            "quiet session started"
        );
        inner.emit(TelemetryEvent::SessionStarted {
            duration_secs: inner.settings.duration.as_secs(),
        });
        Ok(time_left)
    }

    /// Explicit stop: deactivate, then cancel the timer.
    ///
    /// The timer is dropped on a detached thread so `stop` never joins the
    /// timer thread itself.
    pub fn stop(&self) {
        self.deactivate(true);
        let timer = self.inner.lock().timer.take();
        if let Some(timer) = timer {
            timer.cancel();
            let _ = thread::Builder::new()
                .name("qs-timer-reaper".to_string())
                .spawn(move || drop(timer));
        }
    }

    /// Run the teardown once. Later or concurrent calls return immediately.
    pub fn deactivate(&self, manually_stopped: bool) {
        let inner = &self.inner;
        if inner.deactivated.swap(true, Ordering::SeqCst) {
            return;
        }

        let (sampler, keepalive, started_at) = {
            let mut core = inner.lock();
            let previous = core.state;
            core.state = SessionState::Deactivated;
            if previous != SessionState::Active {
                // Never started, or a concurrent start will roll back.
                return;
            }
            (core.sampler.take(), core.keepalive.take(), core.started_at)
        };
        inner.teardowns.fetch_add(1, Ordering::SeqCst);

        let summaries = sampler.map(|mut s| s.stop()).unwrap_or_default();

        inner.disable_policy();

        match qs_telemetry::write_summaries(&inner.settings.summary_path, &summaries) {
            Ok(()) => info!(
                event = event_names::REPORT_PERSISTED,
                session_id = %inner.id,
                path = %inner.settings.summary_path.display(),
                processes = summaries.len(),
                "performance summaries persisted"
            ),
            Err(err) => warn!(
                event = event_names::REPORT_PERSIST_FAILED,
                session_id = %inner.id,
                path = %inner.settings.summary_path.display(),
                error = %err,
                "failed to persist performance summaries"
            ),
        }

        let report = report::build_report(
            &summaries,
            &inner.settings.flags,
            &inner.settings.system_directory,
        );
        let host = collect_host_info(inner.deps.source.logical_cpus());
        if let Err(err) = report::publish(
            &report,
            &host,
            inner.settings.sampler.period,
            inner.id.as_str(),
            inner.deps.telemetry.as_ref(),
        ) {
            warn!(event = event_names::REPORT_TELEMETRY_FAILED, session_id = %inner.id, error = %err, "failed to publish performance report");
        }

        let actual = started_at.map(|t| t.elapsed()).unwrap_or_default();
        inner.emit(TelemetryEvent::SessionStopped {
            requested_duration_secs: inner.settings.duration.as_secs(),
            actual_duration_secs: actual.as_secs(),
            manually_stopped,
        });

        inner.lock().results = Some(summaries);
        drop(keepalive);

        info!(
            event = event_names::SESSION_DEACTIVATED,
            session_id = %inner.id,
            manually_stopped,
            actual_secs = actual.as_secs(),
            flagged = report.details.len(),
            "quiet session deactivated"
        );
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        !self.inner.deactivated.load(Ordering::SeqCst) && self.state() == SessionState::Active
    }

    pub fn time_left(&self) -> Duration {
        if !self.is_active() {
            return Duration::ZERO;
        }
        self.inner
            .lock()
            .timer
            .as_ref()
            .map(Timer::time_left)
            .unwrap_or_default()
    }

    pub fn time_left_secs(&self) -> u64 {
        self.time_left().as_secs()
    }

    /// Live view while active, the final summaries once deactivated.
    pub fn snapshot(&self) -> Vec<ProcessPerformanceSummary> {
        let core = self.inner.lock();
        if let Some(sampler) = &core.sampler {
            return sampler.snapshot();
        }
        core.results.clone().unwrap_or_default()
    }

    /// Final summaries, once the teardown has finished.
    pub fn results(&self) -> Option<Vec<ProcessPerformanceSummary>> {
        self.inner.lock().results.clone()
    }

    /// How many times the teardown ran (0 or 1).
    pub fn teardown_count(&self) -> usize {
        self.inner.teardowns.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for QuietSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuietSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FailingPolicy, FakeProcessSource, RecordingPolicy};
    use qs_telemetry::MemorySink;
    use tempfile::TempDir;

    struct Harness {
        source: FakeProcessSource,
        policy: Arc<RecordingPolicy>,
        telemetry: Arc<MemorySink>,
        lifetime: Arc<ServerLifetime>,
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let source = FakeProcessSource::new(2);
            source.add_process(100, "svchost.exe");
            source.add_process(200, "worker");
            Self {
                source,
                policy: Arc::new(RecordingPolicy::new()),
                telemetry: Arc::new(MemorySink::new()),
                lifetime: ServerLifetime::new(),
                dir: TempDir::new().unwrap(),
            }
        }

        fn deps(&self) -> SessionDeps {
            SessionDeps {
                source: Arc::new(self.source.clone()),
                policy: self.policy.clone(),
                telemetry: self.telemetry.clone(),
                lifetime: self.lifetime.clone(),
            }
        }

        fn settings(&self, duration: Duration) -> SessionSettings {
            SessionSettings {
                duration,
                sampler: SamplerConfig {
                    period: Duration::from_millis(10),
                    strike_threshold_percent: 2.0,
                },
                flags: FlagThresholds::default(),
                summary_path: self.dir.path().join("perf.bin"),
                system_directory: PathBuf::from("/usr/sbin"),
                wait_for_debugger: false,
            }
        }

        fn session(&self, duration: Duration) -> QuietSession {
            QuietSession::new(self.deps(), self.settings(duration))
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_start_then_stop_runs_teardown_in_order() {
        let h = Harness::new();
        let session = h.session(Duration::from_secs(60));
        let left = session.start().unwrap();
        assert!(left > Duration::from_secs(50));
        assert!(session.is_active());
        assert!(wait_for(|| session.snapshot().len() == 2));
        assert!(session.time_left_secs() > 0);
        assert_eq!(h.lifetime.active_count(), 1);
        assert!(h.policy.is_enabled());

        session.stop();
        assert_eq!(session.state(), SessionState::Deactivated);
        assert!(!session.is_active());
        assert_eq!(session.time_left_secs(), 0);
        assert_eq!(h.policy.calls(), vec!["enable", "disable"]);
        assert_eq!(h.lifetime.active_count(), 0);
        assert_eq!(h.source.open_handle_count(), 0);
        assert_eq!(session.results().unwrap().len(), 2);

        let names = h.telemetry.event_names();
        assert_eq!(names.first(), Some(&"session_started"));
        assert_eq!(names.last(), Some(&"session_stopped"));
        assert!(names.contains(&"category_aggregate"));
        match &h.telemetry.records().last().unwrap().event {
            TelemetryEvent::SessionStopped { manually_stopped, requested_duration_secs, .. } => {
                assert!(*manually_stopped);
                assert_eq!(*requested_duration_secs, 60);
            }
            other => panic!("unexpected {other:?}"),
        }

        let persisted = qs_telemetry::read_summaries(&h.dir.path().join("perf.bin")).unwrap();
        assert_eq!(persisted, session.results().unwrap());
    }

    #[test]
    fn test_timer_expiry_deactivates() {
        let h = Harness::new();
        let session = h.session(Duration::from_millis(50));
        session.start().unwrap();
        assert!(wait_for(|| session.state() == SessionState::Deactivated));
        assert!(wait_for(|| h.lifetime.active_count() == 0));
        assert_eq!(h.policy.disable_count(), 1);
        assert_eq!(session.teardown_count(), 1);
        match &h.telemetry.records().last().unwrap().event {
            TelemetryEvent::SessionStopped { manually_stopped, .. } => assert!(!*manually_stopped),
            other => panic!("unexpected {other:?}"),
        }
        session.stop();
        assert_eq!(h.policy.disable_count(), 1);
    }

    #[test]
    fn test_second_start_rejected() {
        let h = Harness::new();
        let session = h.session(Duration::from_secs(60));
        session.start().unwrap();
        assert!(matches!(session.start(), Err(Error::SessionAlreadyStarted { .. })));
        session.stop();
        assert!(matches!(session.start(), Err(Error::SessionAlreadyStarted { .. })));
        assert_eq!(h.policy.enable_count(), 1);
    }

    #[test]
    fn test_enable_failure_leaves_nothing_running() {
        let h = Harness::new();
        let policy = Arc::new(FailingPolicy::new());
        let deps = SessionDeps {
            policy: policy.clone(),
            ..h.deps()
        };
        let session = QuietSession::new(deps, h.settings(Duration::from_secs(60)));
        assert!(matches!(session.start(), Err(Error::PolicyFailed(_))));
        assert_eq!(session.state(), SessionState::Inactive);
        assert!(!session.is_active());
        assert_eq!(h.lifetime.active_count(), 0);
        assert_eq!(h.source.open_count(), 0);
        assert!(h.telemetry.records().is_empty());
        assert_eq!(policy.disable_count(), 0);
    }

    #[test]
    fn test_invalid_sampler_config_rolls_back_policy() {
        let h = Harness::new();
        let mut settings = h.settings(Duration::from_secs(60));
        settings.sampler.period = Duration::ZERO;
        let session = QuietSession::new(h.deps(), settings);
        assert!(matches!(session.start(), Err(Error::InvalidArgument(_))));
        assert_eq!(h.policy.calls(), vec!["enable", "disable"]);
        assert_eq!(h.lifetime.active_count(), 0);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let h = Harness::new();
        let session = h.session(Duration::from_secs(60));
        session.stop();
        assert_eq!(session.state(), SessionState::Deactivated);
        assert_eq!(session.teardown_count(), 0);
        assert_eq!(h.policy.disable_count(), 0);
        assert!(session.start().is_err());
    }

    #[test]
    fn test_disable_failure_still_completes_teardown() {
        let h = Harness::new();
        let policy = Arc::new(FailingPolicy::failing_disable());
        let deps = SessionDeps {
            policy: policy.clone(),
            ..h.deps()
        };
        let session = QuietSession::new(deps, h.settings(Duration::from_secs(60)));
        session.start().unwrap();
        session.stop();
        assert_eq!(policy.disable_count(), 1);
        assert_eq!(session.state(), SessionState::Deactivated);
        assert_eq!(h.lifetime.active_count(), 0);
        assert!(session.results().is_some());
        assert_eq!(h.telemetry.event_names().last(), Some(&"session_stopped"));
    }

    #[test]
    fn test_persist_failure_does_not_block_teardown() {
        let h = Harness::new();
        let mut settings = h.settings(Duration::from_secs(60));
        let blocker = h.dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        settings.summary_path = blocker.join("perf.bin");
        let session = QuietSession::new(h.deps(), settings);
        session.start().unwrap();
        session.stop();
        assert_eq!(h.policy.disable_count(), 1);
        assert_eq!(h.lifetime.active_count(), 0);
        assert!(session.results().is_some());
        assert_eq!(h.telemetry.event_names().last(), Some(&"session_stopped"));
    }

    #[test]
    fn test_concurrent_deactivate_runs_once() {
        let h = Harness::new();
        let policy = Arc::new(RecordingPolicy::new().with_disable_delay(Duration::from_millis(30)));
        let deps = SessionDeps {
            policy: policy.clone(),
            ..h.deps()
        };
        let session = QuietSession::new(deps, h.settings(Duration::from_secs(60)));
        session.start().unwrap();

        let a = session.clone();
        let b = session.clone();
        let t1 = thread::spawn(move || a.stop());
        let t2 = thread::spawn(move || b.deactivate(false));
        t1.join().unwrap();
        t2.join().unwrap();

        assert_eq!(policy.disable_count(), 1);
        assert_eq!(session.teardown_count(), 1);
        assert_eq!(
            h.telemetry
                .event_names()
                .iter()
                .filter(|n| **n == "session_stopped")
                .count(),
            1
        );
    }

    #[test]
    fn test_snapshot_live_then_final() {
        let h = Harness::new();
        let session = h.session(Duration::from_secs(60));
        session.start().unwrap();
        assert!(wait_for(|| session.snapshot().len() == 2));
        h.source.exit(100, qs_common::now_unix_micros());
        assert!(wait_for(|| session
            .snapshot()
            .iter()
            .any(|s| s.pid == 100 && s.has_exited())));
        session.stop();
        let results = session.snapshot();
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|s| s.pid == 100).count(), 1);
        // Running records come before terminated ones.
        assert_eq!(results.last().unwrap().pid, 100);
    }
}
