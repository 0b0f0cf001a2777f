//! `/proc` backed process source.
//!
//! A "handle" is the pid plus the `starttime` field of `/proc/<pid>/stat`
//! captured at open. Re-querying a handle whose stat file is gone, whose
//! start time changed (pid reuse) or whose state is zombie/dead reports
//! the process as exited. The first observed exit time is sticky.
//!
//! Parsers take file contents (`*_content`) so they can be tested without
//! a live `/proc`, and the source itself can be rooted at any directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use qs_common::{now_unix_micros, Error, Result};
use qs_math::ticks_to_us;

use super::{ProcessDescriptor, ProcessHandle, ProcessSource, ProcessTimes};

/// System clock ticks per second (USER_HZ).
pub fn clk_tck() -> u64 {
    static CLK_TCK: OnceLock<u64> = OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    })
}

/// Fields of `/proc/<pid>/stat` used for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFields {
    pub state: char,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
}

impl StatFields {
    pub fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Parse `/proc/<pid>/stat`.
///
/// The command name (field 2) may contain spaces and parentheses, so
/// fields are counted from the last `)`.
pub fn parse_stat_content(content: &str) -> Option<StatFields> {
    let close = content.rfind(')')?;
    let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    // fields[0] is state (field 3); utime/stime are fields 14/15 and
    // starttime is field 22.
    Some(StatFields {
        state: fields.first()?.chars().next()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        starttime: fields.get(19)?.parse().ok()?,
    })
}

/// Command name between the parentheses of `/proc/<pid>/stat`.
pub fn parse_stat_comm(content: &str) -> Option<String> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    (close > open).then(|| content[open + 1..close].to_string())
}

/// `btime` (boot time, unix seconds) from `/proc/stat`.
pub fn parse_btime_content(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Identity hints extracted from `/proc/<pid>/cgroup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgroupIdentity {
    /// `snap:<name>` or `flatpak:<app-id>`.
    pub package_identity: Option<String>,
    /// Innermost `*.service` unit.
    pub service_name: Option<String>,
}

/// Parse `/proc/<pid>/cgroup` for package and service identity.
///
/// Prefers the unified (v2) hierarchy line and falls back to the first
/// v1 `name=systemd` line.
pub fn parse_cgroup_content(content: &str) -> CgroupIdentity {
    let mut unified = None;
    let mut systemd_v1 = None;
    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(hierarchy), Some(controllers), Some(path)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if hierarchy == "0" && controllers.is_empty() {
            unified = Some(path);
        } else if controllers == "name=systemd" && systemd_v1.is_none() {
            systemd_v1 = Some(path);
        }
    }
    let Some(path) = unified.or(systemd_v1) else {
        return CgroupIdentity::default();
    };

    let mut identity = CgroupIdentity::default();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if identity.package_identity.is_none() {
            identity.package_identity = package_from_unit(segment);
        }
        if segment.ends_with(".service") {
            identity.service_name = Some(segment.to_string());
        }
    }
    identity
}

/// `snap.<name>.<app>[-<uuid>].scope|service` or `app-flatpak-<id>-<n>.scope`.
fn package_from_unit(unit: &str) -> Option<String> {
    if let Some(rest) = unit.strip_prefix("snap.") {
        let name = rest.split('.').next().filter(|n| !n.is_empty())?;
        return Some(format!("snap:{name}"));
    }
    if let Some(rest) = unit.strip_prefix("app-flatpak-") {
        let rest = rest.strip_suffix(".scope")?;
        let (id, _instance) = rest.rsplit_once('-')?;
        if id.is_empty() {
            return None;
        }
        return Some(format!("flatpak:{id}"));
    }
    None
}

/// Split a resolved `/proc/<pid>/exe` target into (name, directory).
pub fn split_exe_target(target: &Path) -> (String, String) {
    let text = target.to_string_lossy();
    let trimmed = text.strip_suffix(" (deleted)").unwrap_or(&text);
    let path = Path::new(trimmed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    (name, dir)
}

/// Logical CPU count from `/proc/cpuinfo` content.
pub fn parse_cpu_count_content(content: &str) -> u32 {
    content
        .lines()
        .filter(|l| {
            l.split(':')
                .next()
                .is_some_and(|key| key.trim() == "processor")
        })
        .count() as u32
}

/// Process source over a `/proc` tree.
pub struct ProcfsSource {
    root: PathBuf,
    clk_tck: u64,
    boot_time_us: u64,
    logical_cpus: u32,
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsSource {
    /// Source over the live `/proc`.
    pub fn new() -> Self {
        Self::with_root("/proc", clk_tck())
    }

    /// Source over an arbitrary proc-like tree (for tests).
    pub fn with_root(root: impl Into<PathBuf>, clk_tck: u64) -> Self {
        let root = root.into();
        let boot_time_us = fs::read_to_string(root.join("stat"))
            .ok()
            .and_then(|c| parse_btime_content(&c))
            .map(|secs| secs.saturating_mul(1_000_000))
            .unwrap_or(0);
        let mut logical_cpus = fs::read_to_string(root.join("cpuinfo"))
            .map(|c| parse_cpu_count_content(&c))
            .unwrap_or(0);
        if logical_cpus == 0 {
            // SAFETY: sysconf has no preconditions.
            let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
            logical_cpus = if online > 0 { online as u32 } else { 1 };
        }
        Self {
            root,
            clk_tck: clk_tck.max(1),
            boot_time_us,
            logical_cpus,
        }
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }
}

impl ProcessSource for ProcfsSource {
    fn enumerate(&self) -> Result<Vec<u32>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| Error::Collection(format!("{}: {e}", self.root.display())))?;
        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect())
    }

    fn open(&self, pid: u32) -> Result<Arc<dyn ProcessHandle>> {
        let stat_path = self.pid_dir(pid).join("stat");
        let content = fs::read_to_string(&stat_path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ProcessNotFound { pid },
            ErrorKind::PermissionDenied => Error::PermissionDenied { pid },
            _ => Error::Collection(format!("{}: {e}", stat_path.display())),
        })?;
        let fields = parse_stat_content(&content)
            .ok_or_else(|| Error::Collection(format!("malformed stat for pid {pid}")))?;
        let create_time_us = self
            .boot_time_us
            .saturating_add(ticks_to_us(fields.starttime, self.clk_tck));
        Ok(Arc::new(ProcfsHandle {
            pid,
            stat_path,
            starttime: fields.starttime,
            create_time_us,
            clk_tck: self.clk_tck,
            exit_time_us: AtomicU64::new(0),
        }))
    }

    fn describe(&self, pid: u32) -> ProcessDescriptor {
        let dir = self.pid_dir(pid);
        let (mut name, path) = fs::read_link(dir.join("exe"))
            .map(|target| split_exe_target(&target))
            .unwrap_or_default();
        if name.is_empty() {
            name = fs::read_to_string(dir.join("comm"))
                .map(|c| c.trim_end_matches('\n').to_string())
                .ok()
                .or_else(|| {
                    fs::read_to_string(dir.join("stat"))
                        .ok()
                        .and_then(|c| parse_stat_comm(&c))
                })
                .unwrap_or_default();
        }
        let cgroup = fs::read_to_string(dir.join("cgroup"))
            .map(|c| parse_cgroup_content(&c))
            .unwrap_or_default();
        ProcessDescriptor {
            name,
            path,
            package_identity: cgroup.package_identity,
            service_name: cgroup.service_name,
        }
    }

    fn logical_cpus(&self) -> u32 {
        self.logical_cpus
    }
}

struct ProcfsHandle {
    pid: u32,
    stat_path: PathBuf,
    starttime: u64,
    create_time_us: u64,
    clk_tck: u64,
    exit_time_us: AtomicU64,
}

impl ProcfsHandle {
    fn exited(&self, last: Option<&StatFields>) -> ProcessTimes {
        let now = now_unix_micros().max(1);
        let exit = match self
            .exit_time_us
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => now,
            Err(existing) => existing,
        };
        ProcessTimes {
            user_us: last.map_or(0, |f| ticks_to_us(f.utime, self.clk_tck)),
            kernel_us: last.map_or(0, |f| ticks_to_us(f.stime, self.clk_tck)),
            create_time_us: self.create_time_us,
            exit_time_us: exit,
        }
    }
}

impl ProcessHandle for ProcfsHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn times(&self) -> Result<ProcessTimes> {
        if self.exit_time_us.load(Ordering::Acquire) != 0 {
            return Ok(self.exited(None));
        }
        let content = match fs::read_to_string(&self.stat_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(self.exited(None)),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(Error::PermissionDenied { pid: self.pid })
            }
            Err(e) => return Err(Error::Collection(format!("pid {}: {e}", self.pid))),
        };
        let fields = parse_stat_content(&content)
            .ok_or_else(|| Error::Collection(format!("malformed stat for pid {}", self.pid)))?;
        if fields.starttime != self.starttime {
            return Ok(self.exited(None));
        }
        if fields.is_dead() {
            return Ok(self.exited(Some(&fields)));
        }
        Ok(ProcessTimes {
            user_us: ticks_to_us(fields.utime, self.clk_tck),
            kernel_us: ticks_to_us(fields.stime, self.clk_tck),
            create_time_us: self.create_time_us,
            exit_time_us: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn stat_line(pid: u32, comm: &str, state: char, utime: u64, stime: u64, start: u64) -> String {
        // Fields 4..13 are filler; 16..21 filler; 22 is starttime.
        format!(
            "{pid} ({comm}) {state} 1 1 1 0 -1 4194560 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 {start} 1000 100 18446744073709551615\n"
        )
    }

    #[test]
    fn test_parse_stat_content() {
        let fields = parse_stat_content(&stat_line(7, "bash", 'S', 150, 50, 12345)).unwrap();
        assert_eq!(fields.state, 'S');
        assert_eq!(fields.utime, 150);
        assert_eq!(fields.stime, 50);
        assert_eq!(fields.starttime, 12345);
        assert!(!fields.is_dead());
    }

    #[test]
    fn test_parse_stat_comm_with_parens_and_spaces() {
        let line = stat_line(7, "tmux: server (1)", 'Z', 1, 2, 3);
        assert_eq!(parse_stat_comm(&line).as_deref(), Some("tmux: server (1)"));
        let fields = parse_stat_content(&line).unwrap();
        assert!(fields.is_dead());
        assert_eq!(fields.starttime, 3);
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(parse_stat_content("7 (bash) S 1 1").is_none());
        assert!(parse_stat_content("garbage").is_none());
    }

    #[test]
    fn test_parse_btime() {
        let content = "cpu  1 2 3\nintr 0\nbtime 1700000000\nprocesses 10\n";
        assert_eq!(parse_btime_content(content), Some(1_700_000_000));
        assert_eq!(parse_btime_content("cpu 1 2 3\n"), None);
    }

    #[test]
    fn test_parse_cgroup_snap() {
        let content = "0::/user.slice/user-1000.slice/user@1000.service/app.slice/snap.firefox.firefox-1f2e.scope\n";
        let id = parse_cgroup_content(content);
        assert_eq!(id.package_identity.as_deref(), Some("snap:firefox"));
        assert_eq!(id.service_name.as_deref(), Some("user@1000.service"));
    }

    #[test]
    fn test_parse_cgroup_flatpak() {
        let content =
            "0::/user.slice/user-1000.slice/user@1000.service/app.slice/app-flatpak-org.gnome.Calculator-12345.scope\n";
        let id = parse_cgroup_content(content);
        assert_eq!(
            id.package_identity.as_deref(),
            Some("flatpak:org.gnome.Calculator")
        );
    }

    #[test]
    fn test_parse_cgroup_system_service() {
        let id = parse_cgroup_content("0::/system.slice/NetworkManager.service\n");
        assert_eq!(id.service_name.as_deref(), Some("NetworkManager.service"));
        assert_eq!(id.package_identity, None);
    }

    #[test]
    fn test_parse_cgroup_v1_systemd() {
        let content = "12:cpu,cpuacct:/\n1:name=systemd:/system.slice/cron.service\n";
        let id = parse_cgroup_content(content);
        assert_eq!(id.service_name.as_deref(), Some("cron.service"));
    }

    #[test]
    fn test_split_exe_target() {
        let (name, dir) = split_exe_target(Path::new("/usr/bin/python3.12"));
        assert_eq!(name, "python3.12");
        assert_eq!(dir, "/usr/bin");
        let (name, dir) = split_exe_target(Path::new("/tmp/build/a.out (deleted)"));
        assert_eq!(name, "a.out");
        assert_eq!(dir, "/tmp/build");
    }

    #[test]
    fn test_parse_cpu_count() {
        let content = "processor\t: 0\nmodel name\t: X\n\nprocessor\t: 1\nmodel name\t: X\n";
        assert_eq!(parse_cpu_count_content(content), 2);
    }

    fn write_proc(root: &Path, pid: u32, stat: &str) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stat"), stat).unwrap();
    }

    fn fake_root() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("stat"), "cpu 0 0 0\nbtime 1000\n").unwrap();
        fs::write(
            dir.path().join("cpuinfo"),
            "processor\t: 0\nprocessor\t: 1\nprocessor\t: 2\nprocessor\t: 3\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("self")).unwrap();
        dir
    }

    #[test]
    fn test_fake_root_enumerate_and_open() {
        let root = fake_root();
        write_proc(root.path(), 10, &stat_line(10, "worker", 'S', 100, 100, 500));
        write_proc(root.path(), 11, &stat_line(11, "other", 'R', 0, 0, 600));
        let source = ProcfsSource::with_root(root.path(), 100);
        assert_eq!(source.logical_cpus(), 4);

        let mut pids = source.enumerate().unwrap();
        pids.sort_unstable();
        assert_eq!(pids, vec![10, 11]);

        let handle = source.open(10).unwrap();
        let times = handle.times().unwrap();
        assert_eq!(times.user_us, 1_000_000);
        assert_eq!(times.kernel_us, 1_000_000);
        // btime 1000s + 500 ticks @ 100Hz = 1005s.
        assert_eq!(times.create_time_us, 1_005_000_000);
        assert!(!times.has_exited());

        let desc = source.describe(10);
        assert_eq!(desc.name, "worker");
    }

    #[test]
    fn test_fake_root_open_missing_is_not_found() {
        let root = fake_root();
        let source = ProcfsSource::with_root(root.path(), 100);
        assert!(matches!(
            source.open(999),
            Err(Error::ProcessNotFound { pid: 999 })
        ));
    }

    #[test]
    fn test_exit_detection() {
        let root = fake_root();
        write_proc(root.path(), 10, &stat_line(10, "w", 'S', 1, 1, 500));
        write_proc(root.path(), 11, &stat_line(11, "z", 'S', 1, 1, 600));
        write_proc(root.path(), 12, &stat_line(12, "r", 'S', 1, 1, 700));
        let source = ProcfsSource::with_root(root.path(), 100);
        let vanished = source.open(10).unwrap();
        let zombie = source.open(11).unwrap();
        let reused = source.open(12).unwrap();

        fs::remove_dir_all(root.path().join("10")).unwrap();
        write_proc(root.path(), 11, &stat_line(11, "z", 'Z', 5, 5, 600));
        write_proc(root.path(), 12, &stat_line(12, "r2", 'S', 0, 0, 999));

        assert!(vanished.times().unwrap().has_exited());
        assert!(zombie.times().unwrap().has_exited());
        assert!(reused.times().unwrap().has_exited());

        // Exit time is sticky.
        let first = zombie.times().unwrap().exit_time_us;
        let second = zombie.times().unwrap().exit_time_us;
        assert_eq!(first, second);
    }
}
