//! Telemetry sinks.
//!
//! Emission is best-effort from the caller's point of view: the session
//! logs sink errors and carries on. Sinks themselves still report failures
//! so callers can decide.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::events::TelemetryRecord;

/// Errors from telemetry sinks.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Destination for telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError>;

    fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Appends one JSON object per line to a file.
pub struct JsonlFileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlFileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(TelemetryError::InvalidPath("empty path".to_string()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlFileSink {
    fn emit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let line = serde_json::to_string(record)?;
        let mut writer = lock(&self.writer);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        lock(&self.writer).flush()?;
        Ok(())
    }
}

impl Drop for JsonlFileSink {
    fn drop(&mut self) {
        let _ = lock(&self.writer).flush();
    }
}

/// Forwards records to `tracing` under the `qs::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let payload = serde_json::to_string(&record.event)?;
        tracing::info!(
            target: "qs::telemetry",
            event = record.event.name(),
            session_id = %record.session_id,
            payload = %payload,
            "telemetry"
        );
        Ok(())
    }
}

/// Keeps records in memory. Used by tests and by `qs run --format json`.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        lock(&self.records).clone()
    }

    /// Event names in emission order.
    pub fn event_names(&self) -> Vec<&'static str> {
        lock(&self.records).iter().map(|r| r.event.name()).collect()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

/// Fans each record out to several sinks.
///
/// Every sink sees every record; the first error is returned after all
/// sinks have been tried.
#[derive(Default, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TelemetrySink for MultiSink {
    fn emit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(record) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.flush() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
