//! Host hardware facts for the `ComputerInfo` telemetry event.

use std::fs;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub processor_count: u32,
    pub processor_name: String,
    pub motherboard_name: String,
    pub ram_mib: u64,
}

/// First `model name` (x86) or `Hardware`/`Model` (ARM) line of `/proc/cpuinfo`.
pub fn parse_cpu_model_content(content: &str) -> Option<String> {
    ["model name", "Hardware", "Model"].iter().find_map(|wanted| {
        content.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == *wanted && !value.trim().is_empty()).then(|| value.trim().to_string())
        })
    })
}

/// `MemTotal` from `/proc/meminfo`, in MiB.
pub fn parse_mem_total_mib_content(content: &str) -> Option<u64> {
    let line = content.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib / 1024)
}

fn read_trimmed(path: &str) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collect host facts. Missing sources leave fields empty or zero.
pub fn collect_host_info(logical_cpus: u32) -> HostInfo {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    let meminfo = fs::read_to_string("/proc/meminfo").unwrap_or_default();
    let motherboard_name = match (
        read_trimmed("/sys/class/dmi/id/board_vendor"),
        read_trimmed("/sys/class/dmi/id/board_name"),
    ) {
        (Some(vendor), Some(name)) => format!("{vendor} {name}"),
        (None, Some(name)) => name,
        (Some(vendor), None) => vendor,
        (None, None) => String::new(),
    };
    HostInfo {
        processor_count: logical_cpus,
        processor_name: parse_cpu_model_content(&cpuinfo).unwrap_or_default(),
        motherboard_name,
        ram_mib: parse_mem_total_mib_content(&meminfo).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_model_x86() {
        let content = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7-9750H CPU @ 2.60GHz\n";
        assert_eq!(
            parse_cpu_model_content(content).as_deref(),
            Some("Intel(R) Core(TM) i7-9750H CPU @ 2.60GHz")
        );
    }

    #[test]
    fn test_cpu_model_arm() {
        let content = "processor\t: 0\nBogoMIPS\t: 108.00\n\nModel\t\t: Raspberry Pi 4 Model B Rev 1.4\n";
        assert_eq!(
            parse_cpu_model_content(content).as_deref(),
            Some("Raspberry Pi 4 Model B Rev 1.4")
        );
        assert_eq!(parse_cpu_model_content(""), None);
    }

    #[test]
    fn test_mem_total() {
        let content = "MemTotal:       16303428 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_mem_total_mib_content(content), Some(15921));
        assert_eq!(parse_mem_total_mib_content("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_collect_keeps_cpu_count() {
        assert_eq!(collect_host_info(6).processor_count, 6);
    }
}
