//! `qs run` against the real /proc (Linux only).

#![cfg(target_os = "linux")]

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn config_file(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let summary = dir.path().join("perf.bin");
    std::fs::write(
        &path,
        format!(
            "[sampler]\nperiod_ms = 50\n\n[report]\nsummary_path = {:?}\n",
            summary.display().to_string()
        ),
    )
    .unwrap();
    path
}

fn qs(dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_qs"));
    cmd.env("XDG_CONFIG_HOME", dir.path())
        .env_remove("QS_CONFIG")
        .env_remove("QS_DURATION_SECS")
        .env_remove("QS_WAIT_FOR_DEBUGGER")
        .arg("--config")
        .arg(config_file(dir));
    cmd
}

#[test]
fn run_expires_and_persists() {
    let dir = TempDir::new().unwrap();
    let output = qs(&dir)
        .args(["run", "--duration", "1", "-f", "json", "-q"])
        .output()
        .unwrap();
    let code = output.status.code().unwrap();
    assert!(code == 0 || code == 1, "unexpected exit code {code}");

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["process_count"].as_u64().unwrap() > 0);
    let own_pid = std::process::id() as u64;
    assert!(json["processes"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["pid"].as_u64() == Some(own_pid)));

    let persisted = qs_telemetry::read_summaries(&dir.path().join("perf.bin")).unwrap();
    assert_eq!(persisted.len() as u64, json["process_count"].as_u64().unwrap());
}

#[test]
fn run_sigterm_stops_early() {
    let dir = TempDir::new().unwrap();
    let mut child = qs(&dir)
        .args(["run", "--duration", "600", "-f", "summary", "-q"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Let the session start and take a few samples.
    std::thread::sleep(Duration::from_millis(500));
    let rc = unsafe { libc::kill(child.id() as i32, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        assert!(Instant::now() < deadline, "qs run did not stop after SIGTERM");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(2));
    assert!(dir.path().join("perf.bin").exists());
}

#[test]
fn run_duration_flag_beats_env() {
    let dir = TempDir::new().unwrap();
    let mut child = qs(&dir)
        .env("QS_DURATION_SECS", "600")
        .args(["run", "--duration", "1", "-f", "summary", "-q"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("qs run ignored --duration in favor of QS_DURATION_SECS");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    let code = status.code().unwrap();
    assert!(code == 0 || code == 1, "unexpected exit code {code}");
}
