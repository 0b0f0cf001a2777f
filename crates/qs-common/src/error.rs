//! Error types for quiet sessions.
//!
//! Every error carries:
//! - a stable numeric code for machine parsing
//! - a category for grouping
//! - a recoverability hint
//! - a remediation line for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Quiet Mode Policy Failed
//!   Reason: enable command exited with status 1
//!   Fix: Check the [policy] commands in config.toml and run them by hand once.
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for quiet session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and argument errors.
    Config,
    /// Process enumeration and inspection errors.
    Collection,
    /// Quiet-mode policy toggle errors.
    Policy,
    /// Session lifecycle errors.
    Session,
    /// File I/O and serialization errors.
    Io,
    /// Platform compatibility errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Collection => write!(f, "collection"),
            ErrorCategory::Policy => write!(f, "policy"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Unified error type for quiet sessions.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration file {path}: {message}")]
    InvalidConfig { path: String, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Collection errors (20-29)
    #[error("process collection failed: {0}")]
    Collection(String),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("permission denied accessing process {pid}")]
    PermissionDenied { pid: u32 },

    // Policy errors (30-39)
    #[error("quiet mode policy failed: {0}")]
    PolicyFailed(String),

    #[error("quiet mode policy unavailable: {0}")]
    PolicyUnavailable(String),

    // Session errors (40-49)
    #[error("no quiet session is active")]
    SessionNotActive,

    #[error("session {session_id} was already started")]
    SessionAlreadyStarted { session_id: String },

    #[error("session start failed: {0}")]
    SessionStartFailed(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("summary file error: {0}")]
    SummaryFile(String),

    // Platform errors (70-79)
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Collection errors
    /// - 30-39: Policy errors
    /// - 40-49: Session errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig { .. } => 11,
            Error::InvalidArgument(_) => 12,
            Error::Collection(_) => 20,
            Error::ProcessNotFound { .. } => 21,
            Error::PermissionDenied { .. } => 22,
            Error::PolicyFailed(_) => 30,
            Error::PolicyUnavailable(_) => 31,
            Error::SessionNotActive => 40,
            Error::SessionAlreadyStarted { .. } => 41,
            Error::SessionStartFailed(_) => 42,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::SummaryFile(_) => 62,
            Error::UnsupportedPlatform(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig { .. } | Error::InvalidArgument(_) => {
                ErrorCategory::Config
            }

            Error::Collection(_)
            | Error::ProcessNotFound { .. }
            | Error::PermissionDenied { .. } => ErrorCategory::Collection,

            Error::PolicyFailed(_) | Error::PolicyUnavailable(_) => ErrorCategory::Policy,

            Error::SessionNotActive
            | Error::SessionAlreadyStarted { .. }
            | Error::SessionStartFailed(_) => ErrorCategory::Session,

            Error::Io(_) | Error::Json(_) | Error::SummaryFile(_) => ErrorCategory::Io,

            Error::UnsupportedPlatform(_) => ErrorCategory::Platform,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::InvalidConfig { .. } => true,
            Error::InvalidArgument(_) => true,

            Error::Collection(_) => true,
            Error::ProcessNotFound { .. } => false, // Process is gone
            Error::PermissionDenied { .. } => true, // Can elevate

            Error::PolicyFailed(_) => true,
            Error::PolicyUnavailable(_) => false,

            Error::SessionNotActive => true,
            Error::SessionAlreadyStarted { .. } => false,
            Error::SessionStartFailed(_) => true,

            Error::Io(_) => true,
            Error::Json(_) => true,
            Error::SummaryFile(_) => true,

            Error::UnsupportedPlatform(_) => false,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidConfig { .. } => {
                "Run 'qs config' to print the effective configuration and check config.toml syntax."
            }
            Error::InvalidArgument(_) => "Check the command-line arguments with 'qs --help'.",

            Error::Collection(_) => {
                "Retry. If persistent, check /proc permissions and system load."
            }
            Error::ProcessNotFound { .. } => {
                "The process exited before it could be inspected. This is normal for short-lived processes."
            }
            Error::PermissionDenied { .. } => {
                "Run with elevated privileges to sample processes owned by other users."
            }

            Error::PolicyFailed(_) => {
                "Check the [policy] commands in config.toml and run them by hand once."
            }
            Error::PolicyUnavailable(_) => {
                "No quiet-mode policy is available on this system. Configure [policy] commands."
            }

            Error::SessionNotActive => "Start a session first with 'qs run'.",
            Error::SessionAlreadyStarted { .. } => {
                "A session can only be started once. Start a new session instead."
            }
            Error::SessionStartFailed(_) => {
                "Retry. Quiet mode was left disabled and no sampler is running."
            }

            Error::Io(_) => {
                "Check disk space, permissions, and that the target directory exists. Retry the operation."
            }
            Error::Json(_) => "Invalid JSON. Check the file syntax or delete and regenerate it.",
            Error::SummaryFile(_) => {
                "The summary file is truncated or from another version. Run a new session to regenerate it."
            }

            Error::UnsupportedPlatform(_) => {
                "This feature is not available on your platform. Linux is required for process sampling."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidConfig { .. } => "Invalid Configuration File",
            Error::InvalidArgument(_) => "Invalid Argument",
            Error::Collection(_) => "Process Collection Error",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::PolicyFailed(_) => "Quiet Mode Policy Failed",
            Error::PolicyUnavailable(_) => "Quiet Mode Policy Unavailable",
            Error::SessionNotActive => "No Active Session",
            Error::SessionAlreadyStarted { .. } => "Session Already Started",
            Error::SessionStartFailed(_) => "Session Start Failed",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::SummaryFile(_) => "Summary File Error",
            Error::UnsupportedPlatform(_) => "Unsupported Platform",
        }
    }

    /// Format for a terminal: headline, reason, and fix.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }

    /// Structured form for `--format json`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category().to_string(),
            "message": self.to_string(),
            "recoverable": self.is_recoverable(),
            "remediation": self.remediation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped_by_category() {
        let cases: Vec<(Error, ErrorCategory, std::ops::Range<u32>)> = vec![
            (Error::Config("x".into()), ErrorCategory::Config, 10..20),
            (Error::ProcessNotFound { pid: 1 }, ErrorCategory::Collection, 20..30),
            (Error::PolicyFailed("x".into()), ErrorCategory::Policy, 30..40),
            (Error::SessionNotActive, ErrorCategory::Session, 40..50),
            (Error::SummaryFile("x".into()), ErrorCategory::Io, 60..70),
            (Error::UnsupportedPlatform("x".into()), ErrorCategory::Platform, 70..80),
        ];
        for (err, category, range) in cases {
            assert_eq!(err.category(), category, "{err}");
            assert!(range.contains(&err.code()), "{err} code {}", err.code());
        }
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.code(), 60);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_format_human_contains_fix() {
        let err = Error::PolicyFailed("exit status 1".into());
        let text = err.format_human();
        assert!(text.contains("Quiet Mode Policy Failed"));
        assert!(text.contains("exit status 1"));
        assert!(text.contains("Fix:"));
    }

    #[test]
    fn test_to_json_fields() {
        let json = Error::PermissionDenied { pid: 42 }.to_json();
        assert_eq!(json["code"], 22);
        assert_eq!(json["category"], "collection");
        assert_eq!(json["recoverable"], true);
    }
}
