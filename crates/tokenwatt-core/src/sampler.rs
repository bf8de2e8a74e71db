//! Power sampler: owns the OS sampling tool and turns its text output into
//! rows of the sample log.
//!
//! ```text
//! Idle ──start──► Running ──stop / tool exited──► Idle
//! ```
//!
//! On `start` the sample log is truncated and re-headered, the tool is
//! spawned, and a reader thread appends one flushed row per recognized
//! `GPU Power: <n> mW` line. On `stop` the tool is terminated and the log is
//! left as is until the next `start`.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::SAMPLE_INTERVAL_MS;
use crate::control::DEFAULT_CONTROL_PATH;
use crate::error::{Error, Result};
use crate::samplelog::{DEFAULT_SAMPLE_LOG, RawSample, SampleLogWriter, parse_power_reading};

/// Grace period between SIGTERM and SIGKILL when stopping the tool.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// How long `stop` waits for the reader thread after the tool is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default OS power sampling tool.
pub const DEFAULT_PROGRAM: &str = "powermetrics";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the sampler daemon.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub control_path: PathBuf,
    pub sample_log: PathBuf,
    /// Sampling tool to spawn on `start`.
    pub program: String,
    /// Arguments for `program`. Empty means the powermetrics defaults for
    /// `interval`.
    pub args: Vec<String>,
    pub interval: Duration,
}

impl SamplerConfig {
    /// Arguments actually passed to the sampling tool.
    pub fn tool_args(&self) -> Vec<String> {
        if !self.args.is_empty() {
            return self.args.clone();
        }
        vec![
            "--samplers".to_string(),
            "gpu_power".to_string(),
            "-i".to_string(),
            self.interval.as_millis().to_string(),
            "--show-process-energy".to_string(),
        ]
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from(DEFAULT_CONTROL_PATH),
            sample_log: PathBuf::from(DEFAULT_SAMPLE_LOG),
            program: DEFAULT_PROGRAM.to_string(),
            args: Vec::new(),
            interval: Duration::from_millis(SAMPLE_INTERVAL_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Whether the sampling tool is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Running,
}

struct ActiveTool {
    child: Child,
    reader: JoinHandle<u64>,
}

/// Owns the sampling tool process and its reader thread.
pub struct PowerSampler {
    config: SamplerConfig,
    active: Option<ActiveTool>,
    runs: u64,
}

impl PowerSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            active: None,
            runs: 0,
        }
    }

    pub fn state(&self) -> SamplerState {
        if self.active.is_some() {
            SamplerState::Running
        } else {
            SamplerState::Idle
        }
    }

    /// Number of times the tool has been spawned.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// PID of the running tool, if any.
    pub fn pid(&self) -> Option<u32> {
        self.active.as_ref().map(|a| a.child.id())
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Enter `Running`. No-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            log::debug!("start ignored: already running");
            return Ok(());
        }

        let writer = SampleLogWriter::create(&self.config.sample_log)?;
        crate::platform::hand_over(writer.path(), 0o644);

        let mut child = Command::new(&self.config.program)
            .args(self.config.tool_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::other("sampling tool has no stdout").into());
        };

        let reader = std::thread::Builder::new()
            .name("sampler-reader".to_string())
            .spawn(move || pump(BufReader::new(stdout), writer))?;

        self.runs += 1;
        log::info!(
            "sampling started: {} (pid {}) -> {}",
            self.config.program,
            child.id(),
            self.config.sample_log.display()
        );
        self.active = Some(ActiveTool { child, reader });
        Ok(())
    }

    /// Enter `Idle`, terminating the tool. No-op if already idle.
    pub fn stop(&mut self) {
        let Some(ActiveTool { mut child, reader }) = self.active.take() else {
            log::debug!("stop ignored: not running");
            return;
        };
        terminate(&mut child);
        let rows = join_with_timeout(reader, READER_JOIN_TIMEOUT);
        match rows {
            Some(n) => log::info!("sampling stopped ({n} samples)"),
            None => log::info!("sampling stopped"),
        }
    }

    /// Check whether the tool exited on its own; if so, drop back to `Idle`.
    ///
    /// Returns `true` when such an exit was detected.
    pub fn reap(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        match active.child.try_wait() {
            Ok(Some(status)) => {
                log::warn!(
                    "{} exited unexpectedly ({status}); sampler is idle",
                    self.config.program
                );
                if let Some(ActiveTool { reader, .. }) = self.active.take() {
                    join_with_timeout(reader, READER_JOIN_TIMEOUT);
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("could not poll {}: {e}", self.config.program);
                false
            }
        }
    }
}

impl Drop for PowerSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reader thread body: parse tool output and append samples until EOF.
fn pump<R: BufRead>(input: R, mut writer: SampleLogWriter) -> u64 {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("sampling tool output unreadable: {e}");
                break;
            }
        };
        let Some(power_mw) = parse_power_reading(&line) else {
            continue;
        };
        let sample = RawSample::now(power_mw);
        if let Err(e) = writer.append(&sample) {
            log::error!("failed to append to {}: {e}", writer.path().display());
            continue;
        }
        log::debug!("{} - GPU Power: {} mW", sample.timestamp, sample.power_mw);
    }
    writer.rows()
}

/// SIGTERM, wait up to the grace period, then SIGKILL.
fn terminate(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    send_sigterm(child);
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(_) => break,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    // SAFETY: kill() with a PID we spawned and still own; worst case it fails with ESRCH.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.kill();
}

fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("reader thread still busy; detaching it");
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    handle.join().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samplelog::SAMPLE_LOG_HEADER;
    use std::path::Path;

    fn shell_config(dir: &Path, script: &str) -> SamplerConfig {
        SamplerConfig {
            control_path: dir.join("ctl"),
            sample_log: dir.join("samples.csv"),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            interval: Duration::from_millis(100),
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    const FOREVER: &str = "while true; do echo 'GPU Power: 5000 mW'; sleep 0.05; done";

    // -----------------------------------------------------------------------
    // Config
    // -----------------------------------------------------------------------

    #[test]
    fn test_default_tool_args() {
        let cfg = SamplerConfig::default();
        assert_eq!(cfg.program, "powermetrics");
        assert_eq!(
            cfg.tool_args(),
            vec!["--samplers", "gpu_power", "-i", "100", "--show-process-energy"]
        );
    }

    #[test]
    fn test_default_interval_matches_correlator() {
        let correlator = crate::correlator::CorrelatorConfig::new("raw.csv", "out.csv");
        assert_eq!(SamplerConfig::default().interval, correlator.sample_interval);
    }

    // -----------------------------------------------------------------------
    // Output pump
    // -----------------------------------------------------------------------

    #[test]
    fn test_pump_keeps_only_power_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("samples.csv");
        let writer = SampleLogWriter::create(&path).unwrap();
        let output = "*** Sampled system activity ***\n\
                      GPU Power: 1200 mW\n\
                      CPU Power: 999 mW\n\
                      GPU Power: 0 mW\n\
                      garbage\n";
        let n = pump(output.as_bytes(), writer);
        assert_eq!(n, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], SAMPLE_LOG_HEADER);
        assert!(lines[1].ends_with(",1200"));
        assert!(lines[2].ends_with(",0"));
    }

    // -----------------------------------------------------------------------
    // State machine (spawns /bin/sh as the sampling tool)
    // -----------------------------------------------------------------------

    #[test]
    #[cfg(unix)]
    fn test_start_stop_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = shell_config(tmp.path(), FOREVER);
        let log = cfg.sample_log.clone();
        let mut s = PowerSampler::new(cfg);
        assert_eq!(s.state(), SamplerState::Idle);

        s.start().unwrap();
        assert_eq!(s.state(), SamplerState::Running);
        assert!(wait_for(|| {
            std::fs::read_to_string(&log)
                .map(|c| c.lines().count() >= 3)
                .unwrap_or(false)
        }));

        s.stop();
        assert_eq!(s.state(), SamplerState::Idle);
        // Stopping keeps the session's samples on disk.
        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.starts_with(SAMPLE_LOG_HEADER));
        assert!(contents.lines().count() >= 3);
    }

    #[test]
    #[cfg(unix)]
    fn test_start_while_running_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = PowerSampler::new(shell_config(tmp.path(), FOREVER));
        s.start().unwrap();
        let pid = s.pid();
        s.start().unwrap();
        assert_eq!(s.pid(), pid);
        assert_eq!(s.runs(), 1);
        assert_eq!(s.state(), SamplerState::Running);
        s.stop();
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = PowerSampler::new(shell_config(tmp.path(), FOREVER));
        s.stop();
        s.stop();
        assert_eq!(s.state(), SamplerState::Idle);
        assert_eq!(s.runs(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_start_truncates_previous_run() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = shell_config(tmp.path(), "echo 'GPU Power: 1 mW'; sleep 30");
        let log = cfg.sample_log.clone();
        std::fs::write(&log, "Timestamp,GPU Power (mW)\nold,1\nold,2\nold,3\n").unwrap();

        let mut s = PowerSampler::new(cfg);
        s.start().unwrap();
        assert!(wait_for(|| {
            std::fs::read_to_string(&log)
                .map(|c| c.lines().count() == 2)
                .unwrap_or(false)
        }));
        s.stop();
        assert!(!std::fs::read_to_string(&log).unwrap().contains("old"));
    }

    #[test]
    #[cfg(unix)]
    fn test_tool_exit_reverts_to_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = PowerSampler::new(shell_config(tmp.path(), "echo 'GPU Power: 7 mW'"));
        s.start().unwrap();
        assert!(wait_for(|| s.reap()));
        assert_eq!(s.state(), SamplerState::Idle);

        // The daemon keeps accepting starts afterwards.
        s.start().unwrap();
        assert_eq!(s.runs(), 2);
        s.stop();
    }

    #[test]
    fn test_spawn_failure_leaves_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = shell_config(tmp.path(), "");
        cfg.program = "tokenwatt-no-such-sampling-tool".to_string();
        let mut s = PowerSampler::new(cfg);
        assert!(matches!(s.start(), Err(Error::Spawn { .. })));
        assert_eq!(s.state(), SamplerState::Idle);
    }
}
