//! Platform helpers: handing root-created files back to the invoking user and
//! probing for external programs.
//!
//! The sampler daemon usually runs under `sudo` because the OS power sampling
//! tool needs root, while the driver runs as a normal user. Files the daemon
//! creates are chowned back to `SUDO_UID`/`SUDO_GID` so the driver can use them.
//! None of this is required for correctness; failures are warnings only.

use std::path::Path;

const FALLBACK_ID: u32 = 1000;

/// The user the daemon should hand files to: `SUDO_UID`/`SUDO_GID`, or 1000.
pub fn sudo_owner() -> (u32, u32) {
    let read = |key: &str| {
        std::env::var(key)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(FALLBACK_ID)
    };
    (read("SUDO_UID"), read("SUDO_GID"))
}

/// Chown `path` to the sudo user and set `mode`. Logs a warning on failure.
///
/// Returns whether both steps succeeded.
pub fn hand_over(path: &Path, mode: u32) -> bool {
    match try_hand_over(path, mode) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("could not set permissions on {}: {e}", path.display());
            false
        }
    }
}

#[cfg(unix)]
fn try_hand_over(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    let (uid, gid) = sudo_owner();
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated CString that outlives the call.
    let ret = unsafe { libc::chown(c_path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn try_hand_over(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file ownership is not supported on this platform",
    ))
}

/// Check if a command exists by running `which`.
pub fn command_exists(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sudo_owner_is_stable() {
        // Whatever the environment says, two reads agree.
        assert_eq!(sudo_owner(), sudo_owner());
    }

    #[test]
    fn test_hand_over_missing_file_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!hand_over(&tmp.path().join("missing"), 0o644));
    }

    #[test]
    #[cfg(unix)]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("tokenwatt-definitely-not-a-real-program"));
    }
}
