//! The control endpoint: a named pipe carrying `start` / `stop` / `exit`
//! commands from a driver to the sampler daemon.
//!
//! Commands are newline-delimited text and fire-and-forget; nothing is sent
//! back. The daemon side reads until the writer closes, then reopens the pipe
//! so the next driver can connect. Every wait is bounded so the daemon can
//! check for shutdown between reads.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Well-known path of the control endpoint.
pub const DEFAULT_CONTROL_PATH: &str = "/tmp/power_monitor_fifo";

/// How long to sleep after an end-of-stream that carried no data, so a
/// platform that reports hang-up immediately does not make us spin.
const EOF_BACKOFF: Duration = Duration::from_millis(20);

/// How often `send_command` retries while no reader has the pipe open.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A command understood by the sampler daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "exit" => Ok(Self::Exit),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon side
// ---------------------------------------------------------------------------

/// Receiving end of the control endpoint, owned by the sampler daemon.
///
/// Dropping the endpoint removes the FIFO only if this endpoint created it.
/// [`ControlEndpoint::remove`] always removes it.
pub struct ControlEndpoint {
    path: PathBuf,
    reader: Option<File>,
    pending: Vec<u8>,
    created: bool,
    removed: bool,
}

impl ControlEndpoint {
    /// Create the FIFO at `path`, or reuse it if one already exists.
    ///
    /// Reusing fails with [`Error::EndpointInUse`] when another process has
    /// the FIFO open for reading.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let created = if path.exists() {
            if !is_fifo(&path) {
                return Err(Error::NotAFifo(path));
            }
            if has_reader(&path) {
                return Err(Error::EndpointInUse(path));
            }
            log::debug!("reusing control endpoint {}", path.display());
            false
        } else {
            make_fifo(&path)?;
            crate::platform::hand_over(&path, 0o600);
            log::info!("created control endpoint {}", path.display());
            true
        };
        Ok(Self {
            path,
            reader: None,
            pending: Vec::new(),
            created,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait up to `timeout` for the next recognized command.
    ///
    /// Returns `Ok(None)` when the timeout elapses. Unknown commands are
    /// logged and skipped. A writer closing its end is not an error: the pipe
    /// is reopened on the next call.
    pub fn recv_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<Command>> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.next_line() {
                if let Some(cmd) = parse_line(&line) {
                    return Ok(Some(cmd));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            if self.reader.is_none() {
                self.reader = Some(open_reader(&self.path)?);
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            if !wait_readable(reader, remaining)? {
                return Ok(None);
            }

            let mut buf = [0u8; 256];
            match reader.read(&mut buf) {
                Ok(0) => {
                    // Writer closed. Whatever is left without a newline is
                    // still a complete command.
                    self.reader = None;
                    if self.pending.is_empty() {
                        std::thread::sleep(EOF_BACKOFF.min(remaining));
                    } else {
                        self.pending.push(b'\n');
                    }
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => {
                    self.reader = None;
                    return Err(e);
                }
            }
        }
    }

    /// Remove the FIFO from the filesystem. Safe to call more than once.
    pub fn remove(&mut self) {
        self.reader = None;
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("removed control endpoint {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("could not remove {}: {e}", self.path.display()),
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        if self.created {
            self.remove();
        } else {
            self.reader = None;
        }
    }
}

fn parse_line(line: &str) -> Option<Command> {
    if line.trim().is_empty() {
        return None;
    }
    match line.parse::<Command>() {
        Ok(cmd) => Some(cmd),
        Err(e) => {
            log::warn!("ignoring control input: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Driver side
// ---------------------------------------------------------------------------

/// Send one command to the daemon listening on `path`.
///
/// Retries for up to `timeout` while no reader has the pipe open, then fails
/// with [`Error::SamplerUnavailable`].
pub fn send_command(path: impl AsRef<Path>, command: Command, timeout: Duration) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::SamplerUnavailable(path.to_path_buf()));
    }
    if !is_fifo(path) {
        return Err(Error::NotAFifo(path.to_path_buf()));
    }

    let deadline = Instant::now() + timeout;
    let mut fifo = loop {
        match open_writer(path) {
            Ok(f) => break f,
            Err(e) if is_no_reader(&e) && Instant::now() < deadline => {
                std::thread::sleep(CONNECT_RETRY);
            }
            Err(e) if is_no_reader(&e) => {
                return Err(Error::SamplerUnavailable(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        }
    };

    fifo.write_all(format!("{command}\n").as_bytes())?;
    fifo.flush()?;
    log::debug!("sent '{command}' to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Unix plumbing
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated CString.
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        // Lost a race with another creator: reuse theirs.
        if err.kind() == ErrorKind::AlreadyExists && is_fifo(path) {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[cfg(unix)]
fn open_reader(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(unix)]
fn open_writer(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(unix)]
fn is_no_reader(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENXIO)
}

/// Whether some process currently has the FIFO open for reading.
#[cfg(unix)]
fn has_reader(path: &Path) -> bool {
    open_writer(path).is_ok()
}

/// Block until `file` is readable or `timeout` elapses.
#[cfg(unix)]
fn wait_readable(file: &File, timeout: Duration) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
    // SAFETY: pfd points to exactly one valid pollfd for the duration of the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

#[cfg(not(unix))]
fn is_fifo(_path: &Path) -> bool {
    false
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> Result<()> {
    Err(std::io::Error::new(ErrorKind::Unsupported, "named pipes not supported on this platform").into())
}

#[cfg(not(unix))]
fn open_reader(path: &Path) -> std::io::Result<File> {
    File::open(path)
}

#[cfg(not(unix))]
fn open_writer(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

#[cfg(not(unix))]
fn is_no_reader(_e: &std::io::Error) -> bool {
    false
}

#[cfg(not(unix))]
fn has_reader(_path: &Path) -> bool {
    false
}

#[cfg(not(unix))]
fn wait_readable(_file: &File, _timeout: Duration) -> std::io::Result<bool> {
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
