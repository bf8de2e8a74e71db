//! Streaming correlator: tails the raw sample log, integrates power into
//! energy, and writes the enriched log.
//!
//! Each poll re-reads the sample log and handles only the complete lines past
//! the read offset. Every raw line is therefore folded into exactly one
//! enriched row, however the log grows between polls. A trailing line with
//! no newline yet is left for the next poll.

use std::fs::OpenOptions;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::SAMPLE_INTERVAL_MS;
use crate::error::Result;
use crate::samplelog::{RawSample, SAMPLE_LOG_HEADER};
use crate::session::Session;

/// Header row of the enriched log.
pub const ENRICHED_HEADER: &str =
    "Timestamp,GPU Power (mW),Cumulative Tokens,Cumulative Energy (J),Cumulative kWh";

/// Where to read from and write to, and how often.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub sample_log: PathBuf,
    pub enriched_log: PathBuf,
    /// Time each reading is assumed to cover.
    pub sample_interval: Duration,
    /// Sleep between polls that find nothing new.
    pub poll_interval: Duration,
}

impl CorrelatorConfig {
    pub fn new(sample_log: impl Into<PathBuf>, enriched_log: impl Into<PathBuf>) -> Self {
        Self {
            sample_log: sample_log.into(),
            enriched_log: enriched_log.into(),
            sample_interval: Duration::from_millis(SAMPLE_INTERVAL_MS),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Tails the sample log for one session.
pub struct Correlator {
    config: CorrelatorConfig,
    session: Arc<Session>,
    writer: BufWriter<Box<dyn Write + Send>>,
    read_offset: usize,
    rows_written: u64,
    skipped: u64,
}

impl Correlator {
    /// Open (or create) the enriched log, writing the header if the file is new.
    pub fn new(config: CorrelatorConfig, session: Arc<Session>) -> Result<Self> {
        let is_new = std::fs::metadata(&config.enriched_log)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.enriched_log)?;
        let mut correlator = Self::with_writer(config, session, Box::new(file));
        if is_new {
            writeln!(correlator.writer, "{ENRICHED_HEADER}")?;
            correlator.writer.flush()?;
        }
        Ok(correlator)
    }

    /// Write enriched rows to `sink` instead of `config.enriched_log`.
    /// No header is written.
    pub fn with_writer(
        config: CorrelatorConfig,
        session: Arc<Session>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            config,
            session,
            writer: BufWriter::new(sink),
            read_offset: 0,
            rows_written: 0,
            skipped: 0,
        }
    }

    /// Raw-log lines consumed so far, header included.
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// Enriched rows appended so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Raw data lines that failed to parse.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn enriched_log(&self) -> &Path {
        &self.config.enriched_log
    }

    /// Process whatever the sample log gained since the last poll.
    ///
    /// Returns the number of enriched rows written. A missing sample log is
    /// not an error; it just yields zero.
    ///
    /// A line counts as consumed once its reading is in the session totals,
    /// even if writing its row then fails. Rows still buffered after a failed
    /// flush go out with the next successful one.
    pub fn poll_once(&mut self) -> Result<usize> {
        let contents = match std::fs::read_to_string(&self.config.sample_log) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let complete = match contents.rfind('\n') {
            Some(last) => &contents[..=last],
            None => "",
        };
        let lines: Vec<&str> = complete.lines().collect();

        if lines.len() < self.read_offset {
            log::warn!(
                "{} shrank from {} to {} lines; waiting for it to catch up",
                self.config.sample_log.display(),
                self.read_offset,
                lines.len()
            );
            return Ok(0);
        }

        let mut written = 0;
        while let Some(line) = lines.get(self.read_offset) {
            self.read_offset += 1;
            let line = line.trim();
            if line.is_empty() || line == SAMPLE_LOG_HEADER {
                continue;
            }
            let Some(sample) = RawSample::parse_row(line) else {
                self.skipped += 1;
                log::warn!("skipping malformed sample row: {line:?}");
                continue;
            };
            self.write_enriched(&sample)?;
            written += 1;
        }
        self.writer.flush()?;
        Ok(written)
    }

    fn write_enriched(&mut self, sample: &RawSample) -> std::io::Result<()> {
        let (energy_j, energy_kwh) = self
            .session
            .record_sample(sample.power_mw, self.config.sample_interval);
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            sample.timestamp,
            sample.power_mw,
            self.session.tokens(),
            energy_j,
            energy_kwh
        )?;
        self.rows_written += 1;
        Ok(())
    }

    /// Poll until `active` is cleared, then drain once more and return.
    pub fn run(mut self, active: &AtomicBool) -> Self {
        while active.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(0) => std::thread::sleep(self.config.poll_interval),
                Ok(_) => {}
                Err(e) => {
                    log::error!("correlator poll failed: {e}");
                    std::thread::sleep(self.config.poll_interval);
                }
            }
        }
        if let Err(e) = self.poll_once() {
            log::error!("final correlator poll failed: {e}");
        }
        log::debug!(
            "correlator done: {} rows, {} skipped, offset {}",
            self.rows_written,
            self.skipped,
            self.read_offset
        );
        self
    }

    /// Run on a background thread.
    pub fn spawn(self) -> std::io::Result<CorrelatorHandle> {
        let active = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = mpsc::channel();
        let flag = Arc::clone(&active);
        let thread = std::thread::Builder::new()
            .name("correlator".to_string())
            .spawn(move || {
                let finished = self.run(&flag);
                let _ = done_tx.send(finished);
            })?;
        Ok(CorrelatorHandle {
            active,
            done: done_rx,
            thread: Some(thread),
        })
    }
}

/// Handle to a correlator running on its own thread.
pub struct CorrelatorHandle {
    active: Arc<AtomicBool>,
    done: mpsc::Receiver<Correlator>,
    thread: Option<JoinHandle<()>>,
}

impl CorrelatorHandle {
    /// Ask the correlator to finish and wait at most `timeout` for it.
    ///
    /// Returns the finished correlator, or `None` if it did not stop in time
    /// (the thread is then left to exit on its own).
    pub fn stop(mut self, timeout: Duration) -> Option<Correlator> {
        self.active.store(false, Ordering::SeqCst);
        match self.done.recv_timeout(timeout) {
            Ok(correlator) => {
                if let Some(t) = self.thread.take() {
                    let _ = t.join();
                }
                Some(correlator)
            }
            Err(_) => {
                log::warn!("correlator did not stop within {timeout:?}");
                None
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for CorrelatorHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
