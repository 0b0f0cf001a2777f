//! Process category taxonomy and the static classification table.
//!
//! Classification is a pure function of the process name, except that the
//! kernel placeholder pid is always [`ProcessCategory::System`]. Names are
//! matched exactly (case-insensitive) against four fixed sets checked in
//! priority order: user, system, developer (including VM hosts), then
//! background. The first match wins.
//!
//! The tables carry both the Windows image names the session format was
//! first defined against and their common Linux counterparts, so summary
//! files from either platform classify the same way.

use serde::{Deserialize, Serialize};

/// Pid that always classifies as [`ProcessCategory::System`].
pub const SYSTEM_PID: u32 = 4;

/// Display name substituted for [`SYSTEM_PID`].
pub const SYSTEM_DISPLAY_NAME: &str = "[System]";

/// Display name used when a process name could not be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "[unk]";

/// Process categories. Discriminants are stable and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ProcessCategory {
    #[default]
    Unknown = 0,
    /// Interactive user applications: browsers, office, shell UI.
    User = 1,
    /// Core OS processes.
    System = 2,
    /// Developer tools, terminals, compilers and VM hosts.
    Developer = 3,
    /// Services and background agents.
    Background = 4,
}

impl ProcessCategory {
    /// All categories in discriminant order.
    pub fn all() -> &'static [ProcessCategory] {
        &[
            ProcessCategory::Unknown,
            ProcessCategory::User,
            ProcessCategory::System,
            ProcessCategory::Developer,
            ProcessCategory::Background,
        ]
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Inverse of [`index`](Self::index). Out-of-range values map to Unknown.
    pub fn from_index(idx: usize) -> Self {
        Self::all()
            .get(idx)
            .copied()
            .unwrap_or(ProcessCategory::Unknown)
    }

    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    pub fn from_u32(value: u32) -> Self {
        Self::from_index(value as usize)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcessCategory::Unknown => "Unknown",
            ProcessCategory::User => "User",
            ProcessCategory::System => "System",
            ProcessCategory::Developer => "Developer",
            ProcessCategory::Background => "Background",
        }
    }
}

impl std::fmt::Display for ProcessCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const USER_PROCESSES: &[&str] = &[
    "chrome.exe",
    "OUTLOOK.exe",
    "EXCEL.exe",
    "explorer.exe",
    "WINWORD.exe",
    "POWERPOINT.exe",
    "OfficeClickToRun.exe",
    "Microsoft.SharePoint.exe",
    "msedge.exe",
    "msedgewebview2.exe",
    "ShellExperienceHost.exe",
    "StartMenuExperienceHost.exe",
    "smartscreen.exe",
    "sihost.exe",
    "SystemSettings.exe",
    "electron.exe",
    "CrmSandbox.exe",
    "ms-teams.exe",
    "TextInputHost.exe",
    "UserOOBEBroker.exe",
    "WebViewHost.exe",
    "Widgets.exe",
    "WidgetService.exe",
    "XboxGameBarWidgets.exe",
    "teams.exe",
    // Linux desktop
    "chrome",
    "chromium",
    "firefox",
    "thunderbird",
    "electron",
    "teams-for-linux",
    "slack",
    "gnome-shell",
    "plasmashell",
    "kwin_wayland",
    "kwin_x11",
    "Xorg",
    "Xwayland",
    "nautilus",
    "dolphin",
    "libreoffice",
    "soffice.bin",
    "evince",
    "gnome-control-center",
];

const SYSTEM_PROCESSES: &[&str] = &[
    "System",
    "Registry",
    "Secure System",
    "audiodg.exe",
    "ctfmon.exe",
    "LogonUI.exe",
    "MpDefenderCoreService.exe",
    "MpDlpService.exe",
    "ShellHost.exe",
    "smss.exe",
    "spoolsv.exe",
    "wininit.exe",
    "lsass.exe",
    // Linux
    "systemd",
    "init",
    "kthreadd",
    "systemd-udevd",
    "systemd-logind",
    "systemd-journald",
    "pipewire",
    "pulseaudio",
    "wireplumber",
    "gdm",
    "sddm",
    "lightdm",
    "cupsd",
    "polkitd",
];

const DEVELOPER_PROCESSES: &[&str] = &[
    "cmd.exe",
    "conhost.exe",
    "console.exe",
    "OpenConsole.exe",
    "powershell.exe",
    "cl.exe",
    "link.exe",
    "devenv.exe",
    "DevHome.exe",
    "DevHomeGitHubExtension.exe",
    "python.exe",
    "build.exe",
    "msbuild.exe",
    "windbg.exe",
    "windbgx.exe",
    "EngHost.exe",
    "DbgX.Shell.exe",
    "GVFS.Mount.exe",
    "GVFS.Service.exe",
    "GVFS.ServiceUI.exe",
    "vscode.exe",
    "code.exe",
    "cpptools.exe",
    "notepad.exe",
    "notepad++.exe",
    "Wex.Services.exe",
    "Taskmgr.exe",
    "wpa.exe",
    "wpr.exe",
    "CalculatorApp.exe",
    "npm.exe",
    "winget.exe",
    "chocolatey.exe",
    "pip.exe",
    "vshost.exe",
    "VSSVC.exe",
    "VBCSCompiler.exe",
    "vcpkgsrv.exe",
    "WindowsTerminal.exe",
    "WindowsPackageManagerServer.exe",
    "reSearch.exe",
    // Linux
    "bash",
    "zsh",
    "fish",
    "sh",
    "gnome-terminal-server",
    "konsole",
    "alacritty",
    "kitty",
    "wezterm-gui",
    "tmux: server",
    "code",
    "vim",
    "nvim",
    "emacs",
    "gdb",
    "lldb",
    "cargo",
    "rustc",
    "rust-analyzer",
    "gcc",
    "cc1",
    "cc1plus",
    "clang",
    "ld",
    "make",
    "ninja",
    "cmake",
    "python3",
    "node",
    "npm",
    "pip",
    "git",
    "top",
    "htop",
    "perf",
];

const VM_PROCESSES: &[&str] = &[
    "vmmem",
    "vmwp.exe",
    "vmcompute.exe",
    "vmconnect.exe",
    "vmms.exe",
    // Linux
    "qemu-system-x86_64",
    "qemu-system-aarch64",
    "VBoxHeadless",
    "VirtualBoxVM",
    "containerd",
    "dockerd",
];

const BACKGROUND_PROCESSES: &[&str] = &[
    "services.exe",
    "svchost.exe",
    "SCNotification.exe",
    "SecurityHealthyService.exe",
    "DevHome.QuietBackgroundProcesses.Server.exe",
    "DevHome.QuietBackgroundProcesses.ElevatedServer.exe",
    "OneDrive.exe",
    "MsMpEng.exe",
    "MsSense.exe",
    "NdrSetup.exe",
    "NisSrv.exe",
    "RuntimeBroker.exe",
    "rundll32.exe",
    "SearchHost.exe",
    "SenseCE.exe",
    "SenseNdr.exe",
    "SenseNdrX.exe",
    "SenseTVM.exe",
    "SearchIndexer.exe",
    "taskhostw.exe",
    "winlogon.exe",
    // Linux
    "qs",
    "dbus-daemon",
    "dbus-broker",
    "NetworkManager",
    "snapd",
    "packagekitd",
    "tracker-miner-fs-3",
    "tracker-miner-fs",
    "baloo_file",
    "updatedb",
    "cron",
    "crond",
    "rsyslogd",
    "sshd",
    "avahi-daemon",
    "fwupd",
    "thermald",
    "unattended-upgrade",
    "gvfsd",
    "evolution-data-server",
    "gsd-housekeeping",
];

fn contains_name(table: &[&str], name: &str) -> bool {
    table.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

/// Classify a process by pid and image name.
///
/// Deterministic and stateless: the same `(pid, name)` always yields the
/// same category.
pub fn classify(pid: u32, name: &str) -> ProcessCategory {
    if pid == SYSTEM_PID {
        return ProcessCategory::System;
    }
    if contains_name(USER_PROCESSES, name) {
        ProcessCategory::User
    } else if contains_name(SYSTEM_PROCESSES, name) {
        ProcessCategory::System
    } else if contains_name(DEVELOPER_PROCESSES, name) || contains_name(VM_PROCESSES, name) {
        ProcessCategory::Developer
    } else if contains_name(BACKGROUND_PROCESSES, name) {
        ProcessCategory::Background
    } else {
        ProcessCategory::Unknown
    }
}

/// Name shown for a process in tables and reports.
pub fn display_name(pid: u32, name: &str) -> &str {
    if pid == SYSTEM_PID {
        SYSTEM_DISPLAY_NAME
    } else if name.is_empty() {
        UNKNOWN_DISPLAY_NAME
    } else {
        name
    }
}
