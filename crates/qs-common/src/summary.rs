//! Per-process performance summary produced at session end.

use chrono::{DateTime, TimeZone, Utc};
use qs_math::SampleStats;
use serde::{Deserialize, Serialize};

use crate::category::{display_name, ProcessCategory};

/// Immutable per-process record for one quiet session.
///
/// Timestamps are unix microseconds; `0` means "not set". `exit_time_us`
/// stays `0` until the process is observed to have terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPerformanceSummary {
    pub pid: u32,
    pub name: String,
    /// Directory holding the process image.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub category: ProcessCategory,
    pub create_time_us: u64,
    pub exit_time_us: u64,
    #[serde(flatten)]
    pub stats: SampleStats,
    pub total_cpu_time_us: u64,
}

impl ProcessPerformanceSummary {
    /// Empty summary for a pid; statistics start at zero.
    pub fn new(pid: u32, name: impl Into<String>, category: ProcessCategory) -> Self {
        Self {
            pid,
            name: name.into(),
            path: String::new(),
            package_identity: None,
            service_name: None,
            category,
            create_time_us: 0,
            exit_time_us: 0,
            stats: SampleStats::default(),
            total_cpu_time_us: 0,
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit_time_us != 0
    }

    pub fn display_name(&self) -> &str {
        display_name(self.pid, &self.name)
    }

    pub fn sample_count(&self) -> u64 {
        self.stats.sample_count
    }

    pub fn average_percent(&self) -> f64 {
        self.stats.average_percent()
    }

    pub fn standard_deviation(&self) -> f64 {
        self.stats.standard_deviation()
    }

    pub fn sigma4_deviation(&self) -> f64 {
        self.stats.sigma4_deviation()
    }

    pub fn max_percent(&self) -> f64 {
        self.stats.max_percent
    }

    pub fn samples_above_threshold(&self) -> u32 {
        self.stats.samples_above_threshold
    }

    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        micros_to_datetime(self.create_time_us)
    }

    pub fn exit_time(&self) -> Option<DateTime<Utc>> {
        micros_to_datetime(self.exit_time_us)
    }
}

fn micros_to_datetime(us: u64) -> Option<DateTime<Utc>> {
    if us == 0 {
        return None;
    }
    Utc.timestamp_micros(i64::try_from(us).ok()?).single()
}

/// Current wall-clock time in unix microseconds.
pub fn now_unix_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}
