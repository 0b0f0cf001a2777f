//! Process-wide session slot.
//!
//! At most one [`QuietSession`] is active per process. Starting stops the
//! previous session first and waits for its teardown, including one already
//! running on an expiry (discard-then-start). The slot lock is held
//! across start and stop so concurrent callers are serialized; policy
//! commands are bounded by their timeout.

use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use qs_common::{Error, ProcessPerformanceSummary, Result};
use tracing::info;

use super::{QuietSession, SessionDeps, SessionSettings};
use crate::config::{load_config, ConfigOptions, StartOverrides};
use crate::logging::event_names;

static GLOBAL: OnceLock<SessionManager> = OnceLock::new();

pub struct SessionManager {
    deps: SessionDeps,
    settings: SessionSettings,
    slot: Mutex<Option<QuietSession>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            deps,
            settings,
            slot: Mutex::new(None),
        }
    }

    /// The process-wide manager, built from the discovered configuration on
    /// first use and never dropped.
    pub fn global() -> Result<&'static SessionManager> {
        if let Some(manager) = GLOBAL.get() {
            return Ok(manager);
        }
        let resolved = load_config(&ConfigOptions::default())?;
        let deps = SessionDeps::from_config(&resolved.config)?;
        let settings = SessionSettings::from_config(&resolved.config);
        Ok(GLOBAL.get_or_init(|| SessionManager::new(deps, settings)))
    }

    /// Install `manager` as the process-wide instance. False if one was
    /// already installed.
    pub fn init_global(manager: SessionManager) -> bool {
        GLOBAL.set(manager).is_ok()
    }

    fn slot(&self) -> MutexGuard<'_, Option<QuietSession>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn deps(&self) -> &SessionDeps {
        &self.deps
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new session with overrides read from the environment.
    pub fn start(&self) -> Result<Duration> {
        self.start_with(StartOverrides::from_env())
    }

    /// Start a new session, stopping any active one first.
    pub fn start_with(&self, overrides: StartOverrides) -> Result<Duration> {
        let mut slot = self.slot();
        if let Some(previous) = slot.as_ref() {
            if previous.is_active() {
                info!(event = event_names::SESSION_DISCARDED, session_id = %previous.id(), "stopping active session before starting a new one");
            }
            // An expired session may still be tearing down on its timer
            // thread; stop() waits for that callback to finish.
            previous.stop();
        }

        let mut settings = self.settings.clone();
        if let Some(duration) = overrides.duration {
            settings.duration = duration;
        }
        settings.wait_for_debugger |= overrides.wait_for_debugger;

        let session = QuietSession::new(self.deps.clone(), settings);
        let time_left = session.start()?;
        *slot = Some(session);
        Ok(time_left)
    }

    /// Stop the active session.
    pub fn stop(&self) -> Result<()> {
        let slot = self.slot();
        match slot.as_ref() {
            Some(session) if session.is_active() => {
                session.stop();
                Ok(())
            }
            _ => Err(Error::SessionNotActive),
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().as_ref().is_some_and(QuietSession::is_active)
    }

    pub fn time_left_secs(&self) -> u64 {
        self.slot()
            .as_ref()
            .map(QuietSession::time_left_secs)
            .unwrap_or(0)
    }

    /// The current session, if any (active or finished).
    pub fn current(&self) -> Option<QuietSession> {
        self.slot().clone()
    }

    /// Live table of the active session, else the last finished session's
    /// summaries, else the persisted file.
    pub fn performance_table(&self) -> Result<Vec<ProcessPerformanceSummary>> {
        if let Some(session) = self.current() {
            if session.is_active() {
                return Ok(session.snapshot());
            }
            if let Some(results) = session.results() {
                return Ok(results);
            }
        }
        Ok(qs_telemetry::read_summaries(&self.settings.summary_path)?)
    }
}
