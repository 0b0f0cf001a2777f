//! Quiet session telemetry and persistence.
//!
//! This crate provides:
//! - The telemetry event schema emitted at session start and end
//! - Sinks that deliver events (JSONL file, tracing, in-memory)
//! - The fixed-layout binary summary file read back by later processes

pub mod events;
pub mod sink;
pub mod summary_file;

pub use events::{CategoryBucket, CategoryTotals, ProcessDetail, TelemetryEvent, TelemetryRecord};
pub use sink::{JsonlFileSink, MemorySink, MultiSink, TelemetryError, TelemetrySink, TracingSink};
pub use summary_file::{
    default_summary_path, read_summaries, write_summaries, SummaryFileError, RECORD_SIZE,
};

/// Version stamped on every `PerformanceMetrics` event.
pub const TELEMETRY_VERSION: u32 = qs_common::SCHEMA_VERSION;
