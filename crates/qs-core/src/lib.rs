//! Quiet Session Core Library
//!
//! Runs bounded "quiet sessions": background activity is suppressed through
//! a quiet-mode policy while a sampler profiles per-process CPU usage. At
//! the end the summaries are persisted and reported.
//!
//! - Cancellable countdown timer
//! - Process collection over `/proc`
//! - Fixed-period CPU sampler
//! - Quiet-mode policy, keep-alive, session state machine and manager
//! - Reporting, configuration, logging, exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod collect;
pub mod config;
pub mod debug;
pub mod exit_codes;
pub mod lifetime;
pub mod logging;
pub mod policy;
pub mod report;
pub mod sampler;
pub mod session;
pub mod timer;

// Re-export test doubles for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use session::{QuietSession, SessionDeps, SessionManager, SessionSettings, SessionState};
