//! Configuration loading for qs-core.
//!
//! A single TOML file with one section per component. Every field has a
//! default, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [session]
//! duration_secs = 7200
//!
//! [sampler]
//! period_ms = 1000
//! strike_threshold_percent = 2.0
//!
//! [flags]
//! max_percent = 20.0
//!
//! [policy]
//! enable_command = ["systemctl", "isolate", "quiet.target"]
//! disable_command = ["systemctl", "isolate", "default.target"]
//!
//! [report]
//! telemetry_path = "/var/log/qs/telemetry.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use qs_common::FlagThresholds;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::logging::event_names;
use crate::sampler::SamplerConfig;

/// XDG directory name.
const CONFIG_DIR_NAME: &str = "quiet-session";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "QS_CONFIG";

/// Per-start duration override, in whole seconds.
pub const DURATION_ENV: &str = "QS_DURATION_SECS";

/// Per-start "wait for debugger" flag.
pub const WAIT_FOR_DEBUGGER_ENV: &str = "QS_WAIT_FOR_DEBUGGER";

pub const DEFAULT_DURATION_SECS: u64 = 2 * 60 * 60;

pub const DEFAULT_SYSTEM_DIRECTORY: &str = "/usr/sbin";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(String),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for qs_common::Error {
    fn from(err: ConfigError) -> Self {
        match &err {
            ConfigError::NotFound { path }
            | ConfigError::ParseError { path, .. }
            | ConfigError::IoError { path, .. } => qs_common::Error::InvalidConfig {
                path: path.display().to_string(),
                message: err.to_string(),
            },
            ConfigError::ValidationError(msg) => qs_common::Error::Config(msg.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub duration_secs: u64,
    pub wait_for_debugger: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_DURATION_SECS,
            wait_for_debugger: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSection {
    pub period_ms: u64,
    pub strike_threshold_percent: f64,
}

impl Default for SamplerSection {
    fn default() -> Self {
        let defaults = SamplerConfig::default();
        Self {
            period_ms: defaults.period.as_millis() as u64,
            strike_threshold_percent: defaults.strike_threshold_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// argv run to enable quiet mode; empty for no-op.
    pub enable_command: Vec<String>,
    /// argv run to disable quiet mode; empty for no-op.
    pub disable_command: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            enable_command: Vec::new(),
            disable_command: Vec::new(),
            command_timeout_secs: crate::policy::DEFAULT_COMMAND_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    /// Persisted summary file; `None` for the temp-dir default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    /// JSONL telemetry file; `None` sends telemetry to the log only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_path: Option<PathBuf>,
    pub system_directory: PathBuf,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            summary_path: None,
            telemetry_path: None,
            system_directory: PathBuf::from(DEFAULT_SYSTEM_DIRECTORY),
        }
    }
}

/// Full configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietConfig {
    pub session: SessionSection,
    pub sampler: SamplerSection,
    pub flags: FlagThresholds,
    pub policy: PolicySection,
    pub report: ReportSection,
}

impl QuietConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.duration_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.duration_secs must be positive".to_string(),
            ));
        }
        if self.sampler.period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sampler.period_ms must be positive".to_string(),
            ));
        }
        let thresholds = [
            ("sampler.strike_threshold_percent", self.sampler.strike_threshold_percent),
            ("flags.max_percent", self.flags.max_percent),
            ("flags.sigma4_deviation", self.flags.sigma4_deviation),
            ("flags.standard_deviation", self.flags.standard_deviation),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.policy.enable_command.is_empty() != self.policy.disable_command.is_empty() {
            return Err(ConfigError::ValidationError(
                "policy.enable_command and policy.disable_command must be set together".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session.duration_secs)
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            period: Duration::from_millis(self.sampler.period_ms),
            strike_threshold_percent: self.sampler.strike_threshold_percent,
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.report
            .summary_path
            .clone()
            .unwrap_or_else(qs_telemetry::default_summary_path)
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Cli,
    Env,
    Xdg,
    Defaults,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: QuietConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// 1. `--config` file: must exist and be valid
/// 2. `QS_CONFIG` file
/// 3. `$XDG_CONFIG_HOME/quiet-session/config.toml`
/// 4. built-in defaults
///
/// Discovered files (2 and 3) may be absent; a discovered file that fails
/// to load is logged and defaults are used instead.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let env_path = std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    load_config_from(options, env_path, default_config_path())
}

/// [`load_config`] with the environment and XDG lookups supplied.
pub fn load_config_from(
    options: &ConfigOptions,
    env_path: Option<PathBuf>,
    xdg_path: Option<PathBuf>,
) -> Result<ResolvedConfig, ConfigError> {
    if let Some(path) = &options.config_path {
        if !path.exists() {
            return Err(ConfigError::NotFound { path: path.clone() });
        }
        let config = load_file(path)?;
        return Ok(loaded(config, path, ConfigSource::Cli));
    }

    for (candidate, source) in [(env_path, ConfigSource::Env), (xdg_path, ConfigSource::Xdg)] {
        let Some(path) = candidate else { continue };
        if !path.exists() {
            debug!(path = %path.display(), "config file absent");
            continue;
        }
        match load_file(&path) {
            Ok(config) => return Ok(loaded(config, &path, source)),
            Err(err) => {
                warn!(
                    event = event_names::CONFIG_DEFAULT_USED,
                    path = %path.display(),
                    error = %err,
                    "ignoring invalid config file; using defaults"
                );
                return Ok(defaults());
            }
        }
    }

    Ok(defaults())
}

fn loaded(config: QuietConfig, path: &Path, source: ConfigSource) -> ResolvedConfig {
    debug!(event = event_names::CONFIG_LOADED, path = %path.display(), ?source, "config loaded");
    ResolvedConfig {
        config,
        path: Some(path.to_path_buf()),
        source,
    }
}

fn defaults() -> ResolvedConfig {
    ResolvedConfig {
        config: QuietConfig::default(),
        path: None,
        source: ConfigSource::Defaults,
    }
}

/// `$XDG_CONFIG_HOME/quiet-session/config.toml`, if a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn load_file(path: &Path) -> Result<QuietConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config = QuietConfig::from_toml_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

// ----------------------------------------------------------------------------
// Per-start overrides
// ----------------------------------------------------------------------------

/// Overrides read once at every session start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOverrides {
    pub duration: Option<Duration>,
    pub wait_for_debugger: bool,
}

impl StartOverrides {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(DURATION_ENV).ok().as_deref(),
            std::env::var(WAIT_FOR_DEBUGGER_ENV).ok().as_deref(),
        )
    }

    /// Invalid durations (non-numeric, zero) are ignored with a warning.
    pub fn from_vars(duration: Option<&str>, wait_for_debugger: Option<&str>) -> Self {
        let duration = duration.and_then(|raw| match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => {
                warn!(
                    event = event_names::CONFIG_OVERRIDE_INVALID,
                    variable = DURATION_ENV,
                    value = raw,
                    "ignoring invalid duration override"
                );
                None
            }
        });
        let wait_for_debugger = wait_for_debugger
            .map(|raw| {
                let raw = raw.trim();
                raw == "1" || raw.eq_ignore_ascii_case("true")
            })
            .unwrap_or(false);
        Self {
            duration,
            wait_for_debugger,
        }
    }

    /// Apply an explicit duration (from the command line) over the
    /// environment value.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        if duration.is_some() {
            self.duration = duration;
        }
        self
    }
}
