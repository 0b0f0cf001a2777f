//! "Wait for debugger" support for session start.

use std::time::{Duration, Instant};

use tracing::info;

/// Upper bound on how long a start may block waiting for a tracer.
pub const MAX_DEBUGGER_WAIT: Duration = Duration::from_secs(5 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `TracerPid` from `/proc/<pid>/status` content; 0 when untraced.
pub fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

/// Whether a tracer is attached to this process.
pub fn debugger_attached() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_tracer_pid(&status))
            .is_some_and(|pid| pid != 0)
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Block until a debugger attaches or `timeout` elapses. Returns true if
/// one attached.
pub fn wait_for_debugger(timeout: Duration) -> bool {
    let timeout = timeout.min(MAX_DEBUGGER_WAIT);
    info!(pid = std::process::id(), timeout_secs = timeout.as_secs(), "waiting for debugger to attach");
    let deadline = Instant::now() + timeout;
    loop {
        if debugger_attached() {
            info!("debugger attached");
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
