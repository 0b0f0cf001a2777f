//! Telemetry event schema.
//!
//! Every event is wrapped in a [`TelemetryRecord`] carrying a timestamp and
//! the session id, and serializes to one flat JSON object with an `event`
//! discriminator:
//!
//! ```json
//! {"ts":"2026-01-15T14:30:22Z","session_id":"qs-20260115-143022-a7xq",
//!  "event":"session_stopped","requested_duration_secs":7200,
//!  "actual_duration_secs":311,"manually_stopped":true}
//! ```

use chrono::{DateTime, Utc};
use qs_common::{FlagReason, ProcessCategory};
use serde::{Deserialize, Serialize};

/// One category bucket of the aggregate event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryBucket {
    pub process_count: u64,
    pub cpu_time_us: u64,
}

/// Process counts and CPU totals for the five fixed categories.
///
/// Indexed by [`ProcessCategory::index`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub buckets: [CategoryBucket; 5],
}

impl CategoryTotals {
    pub fn add(&mut self, category: ProcessCategory, cpu_time_us: u64) {
        let bucket = &mut self.buckets[category.index()];
        bucket.process_count += 1;
        bucket.cpu_time_us = bucket.cpu_time_us.saturating_add(cpu_time_us);
    }

    pub fn get(&self, category: ProcessCategory) -> CategoryBucket {
        self.buckets[category.index()]
    }

    pub fn total_processes(&self) -> u64 {
        self.buckets.iter().map(|b| b.process_count).sum()
    }

    pub fn total_cpu_time_us(&self) -> u64 {
        self.buckets
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.cpu_time_us))
    }
}

/// Detail record for one flagged process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDetail {
    pub reason: FlagReason,
    pub is_in_system_directory: bool,
    pub name: String,
    pub category: ProcessCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_identity: Option<String>,
    pub sample_count: u64,
    pub average_percent: f64,
    pub max_percent: f64,
    pub samples_above_threshold: u32,
    pub sigma4_deviation: f64,
    pub total_cpu_time_us: u64,
}

/// Structured telemetry events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    SessionStarted {
        duration_secs: u64,
    },
    SessionStopped {
        requested_duration_secs: u64,
        actual_duration_secs: u64,
        manually_stopped: bool,
    },
    PerformanceMetrics {
        version: u32,
        sampling_period_ms: u64,
        total_cpu_time_us: u64,
    },
    ComputerInfo {
        processor_count: u32,
        processor_name: String,
        motherboard_name: String,
        ram_mib: u64,
    },
    CategoryAggregate(CategoryTotals),
    ProcessDetail(ProcessDetail),
}

impl TelemetryEvent {
    /// Stable event name, as used in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::SessionStarted { .. } => "session_started",
            TelemetryEvent::SessionStopped { .. } => "session_stopped",
            TelemetryEvent::PerformanceMetrics { .. } => "performance_metrics",
            TelemetryEvent::ComputerInfo { .. } => "computer_info",
            TelemetryEvent::CategoryAggregate(_) => "category_aggregate",
            TelemetryEvent::ProcessDetail(_) => "process_detail",
        }
    }
}

/// Timestamped, session-scoped event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub ts: DateTime<Utc>,
    pub session_id: String,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    pub fn new(session_id: impl Into<String>, event: TelemetryEvent) -> Self {
        Self {
            ts: Utc::now(),
            session_id: session_id.into(),
            event,
        }
    }
}
