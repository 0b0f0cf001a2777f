//! Exit codes for the `qs` CLI.
//!
//! Exit code ranges:
//! - 0-2: Operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors

use qs_common::{Error, ErrorCategory};

/// Exit codes for `qs` operations. Stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ------------------------------------------------------------------
    // Operational outcomes (0-2)
    // ------------------------------------------------------------------
    /// Success; nothing flagged.
    Clean = 0,

    /// Report contains flagged processes.
    Flagged = 1,

    /// Session ended by an explicit stop (signal) before its timer.
    Interrupted = 2,

    // ------------------------------------------------------------------
    // User / environment errors (10-19)
    // ------------------------------------------------------------------
    ArgsError = 10,

    ConfigError = 11,

    PermissionError = 12,

    /// Quiet-mode policy could not be toggled.
    PolicyError = 13,

    SessionError = 14,

    PlatformError = 15,

    // ------------------------------------------------------------------
    // Internal errors (20-29)
    // ------------------------------------------------------------------
    InternalError = 20,

    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0-2.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::Flagged => "OK_FLAGGED",
            ExitCode::Interrupted => "OK_INTERRUPTED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::PolicyError => "ERR_POLICY",
            ExitCode::SessionError => "ERR_SESSION",
            ExitCode::PlatformError => "ERR_PLATFORM",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidArgument(_) => ExitCode::ArgsError,
            Error::PermissionDenied { .. } => ExitCode::PermissionError,
            _ => match err.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Collection => ExitCode::InternalError,
                ErrorCategory::Policy => ExitCode::PolicyError,
                ErrorCategory::Session => ExitCode::SessionError,
                ErrorCategory::Io => ExitCode::IoError,
                ErrorCategory::Platform => ExitCode::PlatformError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
