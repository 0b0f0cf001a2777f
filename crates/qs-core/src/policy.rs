//! Quiet-mode policy toggle.
//!
//! The OS capability that suppresses background activity is opaque to the
//! session: it only needs `enable` and `disable`. Both must be idempotent.
//! Enable failures abort session start; disable failures are logged by the
//! caller and swallowed.

use std::io::{self, Read};
use std::process::{ChildStderr, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use qs_common::{Error, Result};
use tracing::{debug, info};

use crate::logging::event_names;

/// Default time allowed for one policy command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of helper stderr kept for error messages; the rest is discarded.
const MAX_STDERR_BYTES: u64 = 4096;

/// Privileged quiet-mode toggle.
pub trait QuietModePolicy: Send + Sync {
    fn name(&self) -> &str;

    fn enable(&self) -> Result<()>;

    fn disable(&self) -> Result<()>;
}

/// Policy with no effect beyond logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPolicy;

impl QuietModePolicy for NoopPolicy {
    fn name(&self) -> &str {
        "noop"
    }

    fn enable(&self) -> Result<()> {
        debug!(event = event_names::POLICY_ENABLED, policy = "noop", "quiet mode enable (no-op)");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        debug!(event = event_names::POLICY_DISABLED, policy = "noop", "quiet mode disable (no-op)");
        Ok(())
    }
}

/// Policy backed by two external commands.
///
/// Each command is an argv vector; the first element is the program. A
/// non-zero exit status or a timeout is a [`Error::PolicyFailed`].
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    enable_argv: Vec<String>,
    disable_argv: Vec<String>,
    timeout: Duration,
}

impl CommandPolicy {
    pub fn new(enable_argv: Vec<String>, disable_argv: Vec<String>) -> Result<Self> {
        if enable_argv.is_empty() || disable_argv.is_empty() {
            return Err(Error::PolicyUnavailable(
                "both enable and disable commands are required".to_string(),
            ));
        }
        Ok(Self {
            enable_argv,
            disable_argv,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::PolicyUnavailable("empty command".to_string()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::PolicyUnavailable(format!("{program}: {e}")))?;
        let stderr_reader = child.stderr.take().and_then(spawn_stderr_reader);

        let start = Instant::now();
        let status: ExitStatus = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::PolicyFailed(format!(
                            "{program} timed out after {}s",
                            self.timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(Error::PolicyFailed(format!("{program}: {e}"))),
            }
        };

        if status.success() {
            return Ok(());
        }
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        let stderr = stderr.trim();
        Err(Error::PolicyFailed(if stderr.is_empty() {
            format!("{program} exited with {status}")
        } else {
            format!("{program} exited with {status}: {stderr}")
        }))
    }
}

/// Drain the helper's stderr while it runs so a chatty helper never blocks
/// on a full pipe. Keeps the first [`MAX_STDERR_BYTES`].
fn spawn_stderr_reader(stderr: ChildStderr) -> Option<JoinHandle<String>> {
    thread::Builder::new()
        .name("qs-policy-stderr".to_string())
        .spawn(move || {
            let mut kept = Vec::new();
            let mut stderr = stderr;
            let _ = stderr.by_ref().take(MAX_STDERR_BYTES).read_to_end(&mut kept);
            let _ = io::copy(&mut stderr, &mut io::sink());
            String::from_utf8_lossy(&kept).into_owned()
        })
        .ok()
}

impl QuietModePolicy for CommandPolicy {
    fn name(&self) -> &str {
        "command"
    }

    fn enable(&self) -> Result<()> {
        self.run(&self.enable_argv)?;
        info!(event = event_names::POLICY_ENABLED, policy = "command", "quiet mode enabled");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.run(&self.disable_argv)?;
        info!(event = event_names::POLICY_DISABLED, policy = "command", "quiet mode disabled");
        Ok(())
    }
}

/// Build the policy described by configuration: commands when both are
/// set, otherwise [`NoopPolicy`].
pub fn policy_from_commands(
    enable: &[String],
    disable: &[String],
    timeout: Duration,
) -> Result<Arc<dyn QuietModePolicy>> {
    match (enable.is_empty(), disable.is_empty()) {
        (true, true) => Ok(Arc::new(NoopPolicy)),
        (false, false) => Ok(Arc::new(
            CommandPolicy::new(enable.to_vec(), disable.to_vec())?.with_timeout(timeout),
        )),
        _ => Err(Error::Config(
            "policy.enable_command and policy.disable_command must be set together".to_string(),
        )),
    }
}
