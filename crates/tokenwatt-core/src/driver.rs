//! One measurement run from the driver's side: start the sampler, generate
//! until the token target is reached, stop, and report.
//!
//! Every run opens with `stop` then `start`, so a sampler left running by an
//! earlier driver is restarted and the sample log is truncated and
//! re-headered for this run.
//!
//! Shutdown order is fixed: stop the sampler, stop the correlator (bounded
//! wait), then write the report. An interrupted run still gets a report
//! covering whatever was measured.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::control::{Command, DEFAULT_CONTROL_PATH, send_command};
use crate::correlator::{Correlator, CorrelatorConfig};
use crate::error::Result;
use crate::generate::TextGenerator;
use crate::input::DEFAULT_COST_PER_KWH;
use crate::report::SessionReport;
use crate::samplelog::{DEFAULT_SAMPLE_LOG, format_timestamp};
use crate::session::Session;

/// Tokens requested from the engine per call.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Configuration for one measurement run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub control_path: PathBuf,
    pub sample_log: PathBuf,
    /// Enriched log; the JSON sidecar goes next to it.
    pub output: PathBuf,
    pub prompt: String,
    pub target_tokens: u64,
    pub chunk_size: usize,
    pub cost_per_kwh: f64,
    /// Pause between generation calls.
    pub pause: Duration,
    /// How long to wait for the daemon to accept a command.
    pub command_timeout: Duration,
    /// How long to wait for the correlator to finish.
    pub stop_timeout: Duration,
    /// Print generated text as it arrives.
    pub echo_text: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from(DEFAULT_CONTROL_PATH),
            sample_log: PathBuf::from(DEFAULT_SAMPLE_LOG),
            output: PathBuf::from("generation_metrics.csv"),
            prompt: String::new(),
            target_tokens: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cost_per_kwh: DEFAULT_COST_PER_KWH,
            pause: Duration::from_millis(100),
            command_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(1),
            echo_text: false,
        }
    }
}

/// Machine-readable record of a finished run, written as `<output>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub model: String,
    pub started_at: String,
    pub output: String,
    pub interrupted: bool,
    pub report: SessionReport,
    pub tokenwatt_version: String,
}

/// Result of [`MeasurementRun::execute`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub record: RunRecord,
    /// Enriched rows the correlator wrote.
    pub rows: u64,
}

impl RunSummary {
    pub fn report(&self) -> &SessionReport {
        &self.record.report
    }
}

/// Drives one measurement run.
pub struct MeasurementRun {
    config: RunConfig,
}

impl MeasurementRun {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run generation under measurement until the target is reached or
    /// `cancel` is set.
    ///
    /// Fails before measuring if the output cannot be opened or no sampler
    /// daemon is listening. A generation error ends the run early; the
    /// sampler and correlator are still stopped before it is returned.
    pub fn execute<G: TextGenerator>(
        &self,
        generator: &mut G,
        cancel: &AtomicBool,
    ) -> Result<RunSummary> {
        let cfg = &self.config;
        remove_stale_log(&cfg.sample_log);
        send_command(&cfg.control_path, Command::Stop, cfg.command_timeout)?;

        let session = Arc::new(Session::new());
        let correlator = Correlator::new(
            CorrelatorConfig::new(&cfg.sample_log, &cfg.output),
            Arc::clone(&session),
        )?;
        send_command(&cfg.control_path, Command::Start, cfg.command_timeout)?;
        let handle = match correlator.spawn() {
            Ok(h) => h,
            Err(e) => {
                let _ = send_command(&cfg.control_path, Command::Stop, cfg.command_timeout);
                return Err(e.into());
            }
        };

        log::info!(
            "generating {} tokens in chunks of {}",
            cfg.target_tokens,
            cfg.chunk_size
        );
        let generation = self.generate_until_target(generator, &session, cancel);
        let interrupted = cancel.load(Ordering::SeqCst);
        if interrupted {
            log::warn!("run interrupted after {} tokens", session.tokens());
        }

        if let Err(e) = send_command(&cfg.control_path, Command::Stop, cfg.command_timeout) {
            log::warn!("could not send stop: {e}");
        }
        let rows = handle
            .stop(cfg.stop_timeout)
            .map(|c| c.rows_written())
            .unwrap_or_default();
        generation?;

        let report = SessionReport::compute(&session.snapshot(), cfg.cost_per_kwh);
        report.append_to(&cfg.output)?;

        let record = RunRecord {
            id: Uuid::new_v4().to_string(),
            model: generator.model().to_string(),
            started_at: format_timestamp(session.started_at()),
            output: cfg.output.display().to_string(),
            interrupted,
            report,
            tokenwatt_version: crate::VERSION.to_string(),
        };
        write_sidecar(&cfg.output, &record)?;

        Ok(RunSummary { record, rows })
    }

    fn generate_until_target<G: TextGenerator>(
        &self,
        generator: &mut G,
        session: &Session,
        cancel: &AtomicBool,
    ) -> Result<()> {
        let cfg = &self.config;
        while session.tokens() < cfg.target_tokens && !cancel.load(Ordering::SeqCst) {
            let text = match generator.generate(&cfg.prompt, cfg.chunk_size, cancel) {
                Ok(t) => t,
                // An engine cut off by `cancel` is the interrupt, not a failure.
                Err(e) if cancel.load(Ordering::SeqCst) => {
                    log::debug!("generation cut short by interrupt: {e}");
                    break;
                }
                Err(e) => return Err(e),
            };
            // Counts the requested chunk, not what the engine returned.
            session.add_tokens(cfg.chunk_size as u64);
            if cfg.echo_text {
                println!("{text}");
            }
            log::debug!("{} / {} tokens", session.tokens(), cfg.target_tokens);
            sleep_unless_cancelled(cfg.pause, cancel);
        }
        Ok(())
    }
}

/// Path of the JSON sidecar for an enriched log.
pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

fn write_sidecar(output: &Path, record: &RunRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record).map_err(std::io::Error::other)?;
    std::fs::write(sidecar_path(output), json)?;
    Ok(())
}

fn remove_stale_log(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("cleaned up previous sample log {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("could not remove {}: {e}", path.display()),
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !cancel.load(Ordering::SeqCst) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        std::thread::sleep(left.min(Duration::from_millis(10)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Returns a fixed short string no matter how many tokens were asked for.
    struct ShortGenerator {
        calls: usize,
    }

    impl TextGenerator for ShortGenerator {
        fn generate(
            &mut self,
            _prompt: &str,
            _max_tokens: usize,
            _cancel: &AtomicBool,
        ) -> Result<String> {
            self.calls += 1;
            Ok("tiny".to_string())
        }

        fn model(&self) -> &str {
            "short"
        }
    }

    fn run_config(dir: &Path) -> RunConfig {
        RunConfig {
            control_path: dir.join("ctl"),
            sample_log: dir.join("samples.csv"),
            output: dir.join("metrics.csv"),
            prompt: "Write a story about Einstein".to_string(),
            target_tokens: 1000,
            pause: Duration::ZERO,
            command_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.chunk_size, 256);
        assert_eq!(cfg.cost_per_kwh, 0.35);
        assert_eq!(cfg.control_path, PathBuf::from("/tmp/power_monitor_fifo"));
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("out/run1.csv")),
            PathBuf::from("out/run1.json")
        );
    }

    #[test]
    fn test_no_daemon_aborts_before_generating() {
        let tmp = tempfile::tempdir().unwrap();
        let run = MeasurementRun::new(run_config(tmp.path()));
        let mut g = ShortGenerator { calls: 0 };
        let cancel = AtomicBool::new(false);
        let res = run.execute(&mut g, &cancel);
        assert!(matches!(res, Err(Error::SamplerUnavailable(_))));
        assert_eq!(g.calls, 0);
    }

    #[test]
    fn test_stale_sample_log_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = run_config(tmp.path());
        std::fs::write(&cfg.sample_log, "Timestamp,GPU Power (mW)\nold,1\n").unwrap();
        let run = MeasurementRun::new(cfg.clone());
        let _ = run.execute(&mut ShortGenerator { calls: 0 }, &AtomicBool::new(false));
        assert!(!cfg.sample_log.exists());
    }

    #[test]
    fn test_chunk_accounting_is_requested_size() {
        // Known approximation: each call counts as a full chunk even when the
        // engine returns far fewer tokens.
        let session = Session::new();
        let tmp = tempfile::tempdir().unwrap();
        let run = MeasurementRun::new(run_config(tmp.path()));
        let mut g = ShortGenerator { calls: 0 };
        run.generate_until_target(&mut g, &session, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(g.calls, 4);
        assert_eq!(session.tokens(), 1024);
    }

    #[test]
    fn test_generation_stops_on_cancel() {
        let session = Session::new();
        let tmp = tempfile::tempdir().unwrap();
        let run = MeasurementRun::new(run_config(tmp.path()));
        let mut g = ShortGenerator { calls: 0 };
        run.generate_until_target(&mut g, &session, &AtomicBool::new(true))
            .unwrap();
        assert_eq!(g.calls, 0);
        assert_eq!(session.tokens(), 0);
    }
}
