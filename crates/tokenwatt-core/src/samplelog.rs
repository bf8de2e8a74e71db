//! The raw sample log: the only hand-off between the sampler daemon and the
//! correlator.
//!
//! # Storage Format
//!
//! A CSV file with a fixed header and one row per power reading:
//!
//! ```text
//! Timestamp,GPU Power (mW)
//! 2026-02-15 01:30:00.125,5123
//! 2026-02-15 01:30:00.226,4980
//! ```
//!
//! The log is append-only. Every row is flushed before the next reading is
//! handled, so a crash loses at most the row in flight. The log is truncated
//! and re-headered at the start of every measurement run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default sample log path, relative to the daemon's working directory.
pub const DEFAULT_SAMPLE_LOG: &str = "gpu_power_continuous.csv";

/// Header row of the sample log.
pub const SAMPLE_LOG_HEADER: &str = "Timestamp,GPU Power (mW)";

const POWER_PREFIX: &str = "GPU Power:";
const POWER_SUFFIX: &str = "mW";

// ---------------------------------------------------------------------------
// Raw sample
// ---------------------------------------------------------------------------

/// One unprocessed power reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSample {
    /// Wall-clock time, `YYYY-MM-DD HH:MM:SS.mmm` (UTC).
    pub timestamp: String,
    pub power_mw: u64,
}

impl RawSample {
    /// Stamp a reading with the current wall-clock time.
    pub fn now(power_mw: u64) -> Self {
        Self {
            timestamp: format_timestamp(SystemTime::now()),
            power_mw,
        }
    }

    /// Parse one data row (`timestamp,power_mW`).
    ///
    /// Returns `None` for the header, blank lines, and anything malformed.
    pub fn parse_row(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Timestamp") {
            return None;
        }
        let (timestamp, power) = line.split_once(',')?;
        let timestamp = timestamp.trim();
        if timestamp.is_empty() {
            return None;
        }
        let power_mw = power.trim().parse::<u64>().ok()?;
        Some(Self {
            timestamp: timestamp.to_string(),
            power_mw,
        })
    }

    /// Power in watts.
    pub fn watts(&self) -> f64 {
        self.power_mw as f64 / 1000.0
    }
}

/// Extract the power value from one line of sampling-tool output.
///
/// Recognizes `GPU Power: <integer> mW` anywhere in the line; anything else
/// yields `None`.
pub fn parse_power_reading(line: &str) -> Option<u64> {
    let start = line.find(POWER_PREFIX)? + POWER_PREFIX.len();
    let rest = line[start..].trim_start();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let (digits, tail) = rest.split_at(digits_end);
    if !tail.trim_start().starts_with(POWER_SUFFIX) {
        return None;
    }
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only writer owned by the sampler.
pub struct SampleLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl SampleLogWriter {
    /// Truncate (or create) the log at `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{SAMPLE_LOG_HEADER}")?;
        writer.flush()?;
        Ok(Self {
            path,
            writer,
            rows: 0,
        })
    }

    /// Append one sample and flush it before returning.
    pub fn append(&mut self, sample: &RawSample) -> std::io::Result<()> {
        writeln!(self.writer, "{},{}", sample.timestamp, sample.power_mw)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows appended since the log was created.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Format a wall-clock instant as `YYYY-MM-DD HH:MM:SS.mmm` (UTC).
pub fn format_timestamp(at: SystemTime) -> String {
    format_since_epoch(at.duration_since(UNIX_EPOCH).unwrap_or_default())
}

fn format_since_epoch(since_epoch: Duration) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(since_epoch.as_secs());
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
        year,
        month,
        day,
        hour,
        min,
        sec,
        since_epoch.subsec_millis()
    )
}

/// Convert seconds since Unix epoch to (year, month, day, hour, minute, second) UTC.
/// No leap second handling.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;
    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let february = if is_leap(year) { 29 } else { 28 };
    let months_days: [u64; 12] = [31, february, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut month = 12u64;
    for (i, &md) in months_days.iter().enumerate() {
        if days < md {
            month = i as u64 + 1;
            break;
        }
        days -= md;
    }

    (year, month, days + 1, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Power line parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_power_reading_plain() {
        assert_eq!(parse_power_reading("GPU Power: 5123 mW"), Some(5123));
    }

    #[test]
    fn test_parse_power_reading_embedded() {
        let line = "**** GPU usage ****  GPU Power: 42 mW  (estimated)";
        assert_eq!(parse_power_reading(line), Some(42));
    }

    #[test]
    fn test_parse_power_reading_zero() {
        assert_eq!(parse_power_reading("GPU Power: 0 mW"), Some(0));
    }

    #[test]
    fn test_parse_power_reading_rejects_other_lines() {
        assert_eq!(parse_power_reading("CPU Power: 5123 mW"), None);
        assert_eq!(parse_power_reading("GPU Power: mW"), None);
        assert_eq!(parse_power_reading("GPU Power: 12 W"), None);
        assert_eq!(parse_power_reading("GPU Power: -3 mW"), None);
        assert_eq!(parse_power_reading(""), None);
    }

    // -----------------------------------------------------------------------
    // Row parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_row_valid() {
        let s = RawSample::parse_row("2026-02-15 01:30:00.125,5000\n").unwrap();
        assert_eq!(s.timestamp, "2026-02-15 01:30:00.125");
        assert_eq!(s.power_mw, 5000);
        assert!((s.watts() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_row_skips_header_and_blank() {
        assert_eq!(RawSample::parse_row(SAMPLE_LOG_HEADER), None);
        assert_eq!(RawSample::parse_row("   "), None);
    }

    #[test]
    fn test_parse_row_malformed() {
        assert_eq!(RawSample::parse_row("no comma here"), None);
        assert_eq!(RawSample::parse_row("2026-02-15 01:30:00.125,abc"), None);
        assert_eq!(RawSample::parse_row(",5000"), None);
        assert_eq!(RawSample::parse_row("2026-02-15,5000,extra"), None);
    }

    // -----------------------------------------------------------------------
    // Writer
    // -----------------------------------------------------------------------

    #[test]
    fn test_writer_truncates_and_writes_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("samples.csv");
        std::fs::write(&path, "stale,1\nstale,2\n").unwrap();

        let mut w = SampleLogWriter::create(&path).unwrap();
        w.append(&RawSample {
            timestamp: "2026-01-01 00:00:00.000".to_string(),
            power_mw: 7,
        })
        .unwrap();
        assert_eq!(w.rows(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![SAMPLE_LOG_HEADER, "2026-01-01 00:00:00.000,7"]);
    }

    #[test]
    fn test_writer_rows_visible_without_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("samples.csv");
        let mut w = SampleLogWriter::create(&path).unwrap();
        for mw in [1, 2, 3] {
            w.append(&RawSample::now(mw)).unwrap();
        }
        // Writer still alive: every row must already be on disk.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.ends_with(",3\n"));
    }

    // -----------------------------------------------------------------------
    // Timestamp formatting
    // -----------------------------------------------------------------------

    #[test]
    fn test_format_epoch() {
        assert_eq!(
            format_since_epoch(Duration::from_secs(0)),
            "1970-01-01 00:00:00.000"
        );
    }

    #[test]
    fn test_format_millis() {
        // 2000-01-01 00:00:00 UTC = 946684800
        let d = Duration::from_millis(946_684_800_000 + 1_234);
        assert_eq!(format_since_epoch(d), "2000-01-01 00:00:01.234");
    }

    #[test]
    fn test_format_end_of_leap_year() {
        // 2024-12-31 23:59:59 UTC = 1735689599
        let d = Duration::from_secs(1_735_689_599);
        assert_eq!(format_since_epoch(d), "2024-12-31 23:59:59.000");
    }

    #[test]
    fn test_timestamp_shape() {
        let s = format_timestamp(SystemTime::now());
        assert_eq!(s.len(), 23);
        assert_eq!(&s[10..11], " ");
        assert_eq!(&s[19..20], ".");
    }

    #[test]
    fn test_is_leap() {
        assert!(is_leap(2000));
        assert!(is_leap(2024));
        assert!(!is_leap(1900));
        assert!(!is_leap(2023));
    }
}
