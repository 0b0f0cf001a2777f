#![cfg(feature = "test-utils")]
//! End-to-end session behavior against scripted collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use qs_common::{FlagThresholds, ProcessCategory};
use qs_core::config::StartOverrides;
use qs_core::lifetime::ServerLifetime;
use qs_core::policy::QuietModePolicy;
use qs_core::sampler::SamplerConfig;
use qs_core::test_utils::{FailingPolicy, FakeProcessSource, RecordingPolicy};
use qs_core::{QuietSession, SessionDeps, SessionManager, SessionSettings, SessionState};
use qs_telemetry::{MemorySink, TelemetryEvent};
use tempfile::TempDir;

struct Fixture {
    source: FakeProcessSource,
    telemetry: Arc<MemorySink>,
    lifetime: Arc<ServerLifetime>,
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let source = FakeProcessSource::new(4);
        source.add_process(4, "");
        source.add_process(500, "svchost.exe");
        source.add_process(600, "baloo_file");
        source.add_process(700, "burner");
        Self {
            source,
            telemetry: Arc::new(MemorySink::new()),
            lifetime: ServerLifetime::new(),
            dir: TempDir::new().unwrap(),
        }
    }

    fn deps(&self, policy: Arc<dyn QuietModePolicy>) -> SessionDeps {
        SessionDeps {
            source: Arc::new(self.source.clone()),
            policy,
            telemetry: self.telemetry.clone(),
            lifetime: self.lifetime.clone(),
        }
    }

    fn summary_path(&self) -> PathBuf {
        self.dir.path().join("quiet-session-performance.bin")
    }

    fn settings(&self, duration: Duration) -> SessionSettings {
        SessionSettings {
            duration,
            sampler: SamplerConfig {
                period: Duration::from_millis(20),
                strike_threshold_percent: 2.0,
            },
            flags: FlagThresholds::default(),
            summary_path: self.summary_path(),
            system_directory: PathBuf::from("/usr/sbin"),
            wait_for_debugger: false,
        }
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
fn racing_expiry_and_stop_tear_down_once() {
    for _ in 0..10 {
        let fx = Fixture::new();
        let policy = Arc::new(RecordingPolicy::new().with_disable_delay(Duration::from_millis(5)));
        let session = QuietSession::new(fx.deps(policy.clone()), fx.settings(Duration::from_millis(30)));
        session.start().unwrap();

        thread::sleep(Duration::from_millis(25));
        let stopper = {
            let session = session.clone();
            thread::spawn(move || session.stop())
        };
        stopper.join().unwrap();
        assert!(wait_for(|| fx.lifetime.active_count() == 0));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(policy.disable_count(), 1);
        assert_eq!(policy.calls(), vec!["enable", "disable"]);
        assert_eq!(session.teardown_count(), 1);
        assert_eq!(session.state(), SessionState::Deactivated);
        let stopped = fx
            .telemetry
            .event_names()
            .into_iter()
            .filter(|n| *n == "session_stopped")
            .count();
        assert_eq!(stopped, 1);
    }
}

#[test]
fn exited_process_reported_once_with_exit_time() {
    let fx = Fixture::new();
    let session = QuietSession::new(
        fx.deps(Arc::new(RecordingPolicy::new())),
        fx.settings(Duration::from_secs(60)),
    );
    session.start().unwrap();
    assert!(wait_for(|| session.snapshot().len() == 4));

    fx.source.advance_cpu(700, 400_000, 0);
    assert!(wait_for(|| session
        .snapshot()
        .iter()
        .any(|s| s.pid == 700 && s.total_cpu_time_us >= 400_000)));
    fx.source.exit(700, 1_760_000_000_000_000);
    fx.source.remove(700);
    assert!(wait_for(|| session
        .snapshot()
        .iter()
        .any(|s| s.pid == 700 && s.has_exited())));
    let samples_at_exit = session
        .snapshot()
        .iter()
        .find(|s| s.pid == 700)
        .map(|s| s.sample_count())
        .unwrap();
    thread::sleep(Duration::from_millis(100));

    session.stop();
    let results = session.results().unwrap();
    let burner: Vec<_> = results.iter().filter(|s| s.pid == 700).collect();
    assert_eq!(burner.len(), 1);
    assert_eq!(burner[0].sample_count(), samples_at_exit);
    assert!(burner[0].exit_time_us > 0);
    assert!(burner[0].total_cpu_time_us >= 400_000);

    let system = results.iter().find(|s| s.pid == 4).unwrap();
    assert_eq!(system.name, "[System]");
    assert_eq!(system.category, ProcessCategory::System);
}

#[test]
fn report_flags_and_persists_full_table() {
    let fx = Fixture::new();
    let session = QuietSession::new(
        fx.deps(Arc::new(RecordingPolicy::new())),
        fx.settings(Duration::from_secs(60)),
    );
    session.start().unwrap();
    assert!(wait_for(|| session.snapshot().len() == 4));
    // One full core of a 4-cpu box for a whole period is 25%.
    fx.source.advance_cpu(700, 20_000, 0);
    assert!(wait_for(|| session
        .snapshot()
        .iter()
        .any(|s| s.pid == 700 && s.max_percent() >= 20.0)));
    session.stop();

    let persisted = qs_telemetry::read_summaries(&fx.summary_path()).unwrap();
    assert_eq!(persisted, session.results().unwrap());
    assert_eq!(persisted.len(), 4);

    let details: Vec<_> = fx
        .telemetry
        .records()
        .into_iter()
        .filter_map(|r| match r.event {
            TelemetryEvent::ProcessDetail(d) => Some(d),
            _ => None,
        })
        .collect();
    assert!(details.iter().any(|d| d.name == "burner" && d.reason.as_str() == "MaxPercent"));
    assert!(details.iter().any(|d| d.name == "baloo_file" && d.reason.as_str() == "SearchIndexer"));
    assert!(!details.iter().any(|d| d.name == "svchost.exe"));

    let aggregate = fx
        .telemetry
        .records()
        .into_iter()
        .find_map(|r| match r.event {
            TelemetryEvent::CategoryAggregate(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(aggregate.total_processes(), 4);
    assert_eq!(aggregate.get(ProcessCategory::Background).process_count, 2);
}

#[test]
fn failed_start_leaves_system_untouched() {
    let fx = Fixture::new();
    let policy = Arc::new(FailingPolicy::new());
    let manager = SessionManager::new(fx.deps(policy.clone()), fx.settings(Duration::from_secs(60)));
    assert!(manager.start_with(StartOverrides::default()).is_err());
    assert!(!manager.is_active());
    assert_eq!(manager.time_left_secs(), 0);
    assert_eq!(fx.lifetime.active_count(), 0);
    assert_eq!(fx.source.open_count(), 0);
    assert!(!fx.summary_path().exists());
}

#[test]
fn manager_reads_back_last_session_after_restart() {
    let fx = Fixture::new();
    let manager = SessionManager::new(
        fx.deps(Arc::new(RecordingPolicy::new())),
        fx.settings(Duration::from_millis(200)),
    );
    manager.start_with(StartOverrides::default()).unwrap();
    assert!(manager.is_active());
    assert!(fx.lifetime.wait_until_released(Duration::from_secs(10)));
    assert!(!manager.is_active());
    let table = manager.performance_table().unwrap();

    let fresh = SessionManager::new(
        fx.deps(Arc::new(RecordingPolicy::new())),
        fx.settings(Duration::from_secs(60)),
    );
    assert_eq!(fresh.performance_table().unwrap(), table);
}
