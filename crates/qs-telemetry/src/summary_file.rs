//! Fixed-layout binary summary file.
//!
//! The last session's full summary table is written to a well-known path so
//! a later process can read it back after the sampler's host has exited.
//! The file is a flat array of fixed-size little-endian records with no
//! header:
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0 | 4 | pid (u32) |
//! | 4 | 4 | category (u32) |
//! | 8 | 256 | name (UTF-8, NUL padded) |
//! | 264 | 512 | path |
//! | 776 | 256 | package identity (empty = none) |
//! | 1032 | 256 | service name (empty = none) |
//! | 1288 | 8 | create time (unix µs) |
//! | 1296 | 8 | exit time (unix µs, 0 = running) |
//! | 1304 | 8 | sample count |
//! | 1312 | 8 | Σ percent (f64) |
//! | 1320 | 8 | Σ percent² (f64) |
//! | 1328 | 8 | Σ percent⁴ (f64) |
//! | 1336 | 8 | max percent (f64) |
//! | 1344 | 4 | samples above threshold (u32) |
//! | 1348 | 4 | reserved |
//! | 1352 | 8 | total CPU time (µs) |
//!
//! Strings longer than their buffer minus one byte (255 bytes for name,
//! package identity and service name, 511 for path) are truncated on a
//! UTF-8 character boundary, so such records do not read back identically.
//! Each truncation is logged at debug level.

use std::fs;
use std::path::{Path, PathBuf};

use qs_common::{ProcessCategory, ProcessPerformanceSummary};
use qs_math::SampleStats;
use thiserror::Error;
use tracing::debug;

const NAME_LEN: usize = 256;
const PATH_LEN: usize = 512;
const PACKAGE_LEN: usize = 256;
const SERVICE_LEN: usize = 256;

/// Size in bytes of one encoded record.
pub const RECORD_SIZE: usize =
    4 + 4 + NAME_LEN + PATH_LEN + PACKAGE_LEN + SERVICE_LEN + 8 * 3 + 8 * 4 + 4 + 4 + 8;

/// File name used under the temp directory.
pub const DEFAULT_FILE_NAME: &str = "quiet-session-performance.bin";

/// Errors from summary file operations.
#[derive(Error, Debug)]
pub enum SummaryFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("summary file {path} is {len} bytes, not a multiple of the {record_size}-byte record")]
    Corrupt {
        path: String,
        len: usize,
        record_size: usize,
    },

    #[error("record buffer has the wrong length: {0} bytes")]
    BadRecordLength(usize),
}

impl From<SummaryFileError> for qs_common::Error {
    fn from(err: SummaryFileError) -> Self {
        match err {
            SummaryFileError::Io(io) => qs_common::Error::Io(io),
            other => qs_common::Error::SummaryFile(other.to_string()),
        }
    }
}

/// `<temp dir>/quiet-session-performance.bin`.
pub fn default_summary_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_FILE_NAME)
}

/// Fields of `summary` that do not fit their fixed buffers.
pub fn truncated_fields(summary: &ProcessPerformanceSummary) -> Vec<&'static str> {
    let fields = [
        ("name", summary.name.as_str(), NAME_LEN),
        ("path", summary.path.as_str(), PATH_LEN),
        ("package_identity", summary.package_identity.as_deref().unwrap_or(""), PACKAGE_LEN),
        ("service_name", summary.service_name.as_deref().unwrap_or(""), SERVICE_LEN),
    ];
    fields
        .into_iter()
        .filter(|(_, value, width)| value.len() >= *width)
        .map(|(field, _, _)| field)
        .collect()
}

fn put_str(out: &mut Vec<u8>, value: &str, width: usize) {
    let mut end = value.len().min(width - 1);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    out.extend_from_slice(&value.as_bytes()[..end]);
    out.resize(out.len() + (width - end), 0);
}

/// Append one encoded record to `out`.
pub fn encode_record(summary: &ProcessPerformanceSummary, out: &mut Vec<u8>) {
    for field in truncated_fields(summary) {
        debug!(pid = summary.pid, field, "summary field truncated to fit record");
    }
    let start = out.len();
    out.extend_from_slice(&summary.pid.to_le_bytes());
    out.extend_from_slice(&summary.category.as_u32().to_le_bytes());
    put_str(out, &summary.name, NAME_LEN);
    put_str(out, &summary.path, PATH_LEN);
    put_str(out, summary.package_identity.as_deref().unwrap_or(""), PACKAGE_LEN);
    put_str(out, summary.service_name.as_deref().unwrap_or(""), SERVICE_LEN);
    out.extend_from_slice(&summary.create_time_us.to_le_bytes());
    out.extend_from_slice(&summary.exit_time_us.to_le_bytes());

    let stats = &summary.stats;
    out.extend_from_slice(&stats.sample_count.to_le_bytes());
    out.extend_from_slice(&stats.percent_cumulative.to_le_bytes());
    out.extend_from_slice(&stats.variance_cumulative.to_le_bytes());
    out.extend_from_slice(&stats.sigma4_cumulative.to_le_bytes());
    out.extend_from_slice(&stats.max_percent.to_le_bytes());
    out.extend_from_slice(&stats.samples_above_threshold.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&summary.total_cpu_time_us.to_le_bytes());
    debug_assert_eq!(out.len() - start, RECORD_SIZE);
}

/// Cursor over one record's bytes. Callers guarantee the length.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }

    fn str(&mut self, width: usize) -> String {
        let raw = &self.buf[self.pos..self.pos + width];
        self.pos += width;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(width);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Decode one record.
pub fn decode_record(buf: &[u8]) -> Result<ProcessPerformanceSummary, SummaryFileError> {
    if buf.len() != RECORD_SIZE {
        return Err(SummaryFileError::BadRecordLength(buf.len()));
    }
    let mut r = Reader { buf, pos: 0 };
    let pid = r.u32();
    let category = ProcessCategory::from_u32(r.u32());
    let name = r.str(NAME_LEN);
    let path = r.str(PATH_LEN);
    let package_identity = non_empty(r.str(PACKAGE_LEN));
    let service_name = non_empty(r.str(SERVICE_LEN));
    let create_time_us = r.u64();
    let exit_time_us = r.u64();
    let stats = SampleStats {
        sample_count: r.u64(),
        percent_cumulative: r.f64(),
        variance_cumulative: r.f64(),
        sigma4_cumulative: r.f64(),
        max_percent: r.f64(),
        samples_above_threshold: r.u32(),
    };
    let _reserved = r.u32();
    let total_cpu_time_us = r.u64();

    Ok(ProcessPerformanceSummary {
        pid,
        name,
        path,
        package_identity,
        service_name,
        category,
        create_time_us,
        exit_time_us,
        stats,
        total_cpu_time_us,
    })
}

/// Encode a full table.
pub fn encode_summaries(summaries: &[ProcessPerformanceSummary]) -> Vec<u8> {
    let mut out = Vec::with_capacity(summaries.len() * RECORD_SIZE);
    for summary in summaries {
        encode_record(summary, &mut out);
    }
    out
}

/// Write the table to `path`, replacing any previous file.
///
/// Writes to a sibling temp file first and renames it into place, so a
/// reader never observes a half-written table. Strings over their field
/// limit (255 bytes, 511 for the path) are stored truncated.
pub fn write_summaries(
    path: &Path,
    summaries: &[ProcessPerformanceSummary],
) -> Result<(), SummaryFileError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp_path = path.with_extension("bin.tmp");
    fs::write(&temp_path, encode_summaries(summaries))?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a table written by [`write_summaries`].
///
/// Strings come back exactly as stored, which for over-long fields is the
/// truncated prefix.
pub fn read_summaries(path: &Path) -> Result<Vec<ProcessPerformanceSummary>, SummaryFileError> {
    let bytes = fs::read(path)?;
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(SummaryFileError::Corrupt {
            path: path.display().to_string(),
            len: bytes.len(),
            record_size: RECORD_SIZE,
        });
    }
    bytes.chunks_exact(RECORD_SIZE).map(decode_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProcessPerformanceSummary {
        let mut s = ProcessPerformanceSummary::new(4242, "worker", ProcessCategory::Background);
        s.path = "/usr/libexec".into();
        s.package_identity = Some("snap:worker".into());
        s.create_time_us = 1_700_000_000_123_456;
        for p in [0.0, 0.0, 50.0, 0.0] {
            s.stats.record(p, 2.0);
        }
        s.total_cpu_time_us = 2_000_000;
        s
    }

    #[test]
    fn test_record_size_layout() {
        assert_eq!(RECORD_SIZE, 1360);
        let mut buf = Vec::new();
        encode_record(&sample(), &mut buf);
        assert_eq!(buf.len(), RECORD_SIZE);
        assert_eq!(&buf[0..4], &4242u32.to_le_bytes());
        assert_eq!(&buf[4..8], &4u32.to_le_bytes());
        assert_eq!(&buf[8..14], b"worker");
        assert_eq!(buf[14], 0);
    }

    #[test]
    fn test_decode_matches_encode() {
        let original = sample();
        let mut buf = Vec::new();
        encode_record(&original, &mut buf);
        assert_eq!(decode_record(&buf).expect("decode"), original);
    }

    #[test]
    fn test_long_strings_truncate_on_char_boundary() {
        let mut s = sample();
        // 'é' is two bytes; 200 of them overflow the 256-byte name buffer.
        s.name = "é".repeat(200);
        let mut buf = Vec::new();
        encode_record(&s, &mut buf);
        let back = decode_record(&buf).expect("decode");
        assert_eq!(back.name, "é".repeat(127));
        assert_eq!(truncated_fields(&s), vec!["name"]);
    }

    #[test]
    fn test_truncated_fields_reports_long_path() {
        let mut s = sample();
        assert!(truncated_fields(&s).is_empty());

        s.path = format!("/{}", "d".repeat(510));
        assert!(truncated_fields(&s).is_empty());

        s.path.push('x');
        s.service_name = Some(format!("{}.service", "u".repeat(300)));
        assert_eq!(truncated_fields(&s), vec!["path", "service_name"]);

        let mut buf = Vec::new();
        encode_record(&s, &mut buf);
        let back = decode_record(&buf).expect("decode");
        assert_eq!(back.path.len(), 511);
        assert!(s.path.starts_with(&back.path));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            decode_record(&[0u8; 10]),
            Err(SummaryFileError::BadRecordLength(10))
        ));
    }

    #[test]
    fn test_unknown_category_decodes_as_unknown() {
        let mut buf = Vec::new();
        encode_record(&sample(), &mut buf);
        buf[4..8].copy_from_slice(&77u32.to_le_bytes());
        assert_eq!(
            decode_record(&buf).expect("decode").category,
            ProcessCategory::Unknown
        );
    }
}
