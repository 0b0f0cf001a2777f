//! Quiet session common types, IDs, and errors.
//!
//! This crate provides foundational types shared across qs-core modules:
//! - Process categories and the static classification table
//! - Per-process performance summaries
//! - The upload/flag policy applied at session end
//! - Session identity
//! - Common error types
//! - Output format selection

pub mod category;
pub mod error;
pub mod flags;
pub mod id;
pub mod output;
pub mod summary;

pub use category::{classify, display_name, ProcessCategory, SYSTEM_PID};
pub use error::{Error, ErrorCategory, Result};
pub use flags::{evaluate_flag, FlagReason, FlagThresholds};
pub use id::SessionId;
pub use output::OutputFormat;
pub use summary::{now_unix_micros, ProcessPerformanceSummary};

/// Telemetry/persistence schema version.
pub const SCHEMA_VERSION: u32 = 1;
