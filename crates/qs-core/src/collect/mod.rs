//! Process enumeration and inspection.
//!
//! The sampler talks to the OS through two small traits so it can run
//! against `/proc` in production and against a scripted source in tests:
//!
//! - [`ProcessSource`] enumerates pids, opens handles and describes
//!   processes
//! - [`ProcessHandle`] re-queries CPU accounting for one process
//!   incarnation and reports when it has exited
//!
//! Times are microseconds; wall-clock timestamps are unix microseconds with
//! `0` meaning "not set".

pub mod host;
#[cfg(target_os = "linux")]
pub mod procfs;

use std::sync::Arc;

use qs_common::Result;

pub use host::{collect_host_info, HostInfo};
#[cfg(target_os = "linux")]
pub use procfs::ProcfsSource;

/// CPU accounting for one process at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTimes {
    pub user_us: u64,
    pub kernel_us: u64,
    pub create_time_us: u64,
    /// Non-zero once the process has terminated.
    pub exit_time_us: u64,
}

impl ProcessTimes {
    pub fn has_exited(&self) -> bool {
        self.exit_time_us != 0
    }

    pub fn total_us(&self) -> u64 {
        self.user_us.saturating_add(self.kernel_us)
    }
}

/// Static facts about a process, resolved once when tracking starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessDescriptor {
    /// Image file name.
    pub name: String,
    /// Directory holding the image.
    pub path: String,
    pub package_identity: Option<String>,
    pub service_name: Option<String>,
}

/// A limited-query handle to one process incarnation.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    fn times(&self) -> Result<ProcessTimes>;
}

/// Enumeration and inspection of live processes.
pub trait ProcessSource: Send + Sync {
    /// Current process ids, in no particular order.
    fn enumerate(&self) -> Result<Vec<u32>>;

    /// Open a handle. `ProcessNotFound` means the process vanished;
    /// any other error means it exists but cannot be queried.
    fn open(&self, pid: u32) -> Result<Arc<dyn ProcessHandle>>;

    /// Resolve name, path, package identity and service name. Best-effort:
    /// unknown fields are left empty.
    fn describe(&self, pid: u32) -> ProcessDescriptor;

    /// Logical CPUs used to normalize per-tick percentages.
    fn logical_cpus(&self) -> u32;
}

/// The platform's process source.
#[cfg(target_os = "linux")]
pub fn default_source() -> Result<Arc<dyn ProcessSource>> {
    Ok(Arc::new(ProcfsSource::new()))
}

#[cfg(not(target_os = "linux"))]
pub fn default_source() -> Result<Arc<dyn ProcessSource>> {
    Err(qs_common::Error::UnsupportedPlatform(
        std::env::consts::OS.to_string(),
    ))
}
