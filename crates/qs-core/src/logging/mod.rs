//! Structured logging for qs-core.
//!
//! Two output modes:
//! - Human-readable console output for interactive use
//! - JSON lines for supervised/agent workflows
//!
//! stdout is reserved for command payloads (tables, JSON); all log output
//! goes to stderr. Important events carry a stable `event` field from
//! [`event_names`] so logs can be filtered by machine.

pub mod config;

pub use config::{LogConfig, LogFormat, LogLevel};

use std::io::IsTerminal;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Stable event names attached to log records as `event = ...`.
pub mod event_names {
    // Session lifecycle
    pub const SESSION_STARTED: &str = "session.started";
    pub const SESSION_START_FAILED: &str = "session.start_failed";
    pub const SESSION_DEACTIVATED: &str = "session.deactivated";
    pub const SESSION_DISCARDED: &str = "session.discarded";
    pub const SESSION_EXPIRED: &str = "session.expired";

    // Sampler
    pub const SAMPLER_STARTED: &str = "sampler.started";
    pub const SAMPLER_TICK_FAILED: &str = "sampler.tick_failed";
    pub const SAMPLER_PROCESS_EXITED: &str = "sampler.process_exited";
    pub const SAMPLER_OPEN_FAILED: &str = "sampler.open_failed";
    pub const SAMPLER_STOPPED: &str = "sampler.stopped";

    // Quiet-mode policy
    pub const POLICY_ENABLED: &str = "policy.enabled";
    pub const POLICY_DISABLED: &str = "policy.disabled";
    pub const POLICY_DISABLE_FAILED: &str = "policy.disable_failed";

    // Reporting
    pub const REPORT_PERSISTED: &str = "report.persisted";
    pub const REPORT_PERSIST_FAILED: &str = "report.persist_failed";
    pub const REPORT_TELEMETRY_FAILED: &str = "report.telemetry_failed";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_OVERRIDE_INVALID: &str = "config.override_invalid";
}

/// Initialize the global subscriber.
///
/// The level comes from `config` alone; [`LogConfig::from_env`] has already
/// folded `QS_LOG`/`RUST_LOG` into it. Calling this more than once is
/// harmless; later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::default().add_directive(LevelFilter::from(config.level).into());

    let result = match config.format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());
            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    // Already initialized (tests, embedding): keep the existing subscriber.
    let _ = result;
}
