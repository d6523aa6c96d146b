//! Pre-flight checks for depscope
//!
//! Validates system requirements before any shadow memory is mapped.
//! Provides clear, actionable error messages when requirements aren't met.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// First kernel honouring `MAP_FIXED_NOREPLACE`, which shadow mapping relies on
const MIN_KERNEL_VERSION: (u32, u32) = (4, 17);

/// Run all pre-flight checks for a live (shared memory) run
pub fn run_preflight_checks() -> Result<()> {
    check_kernel_version()?;
    check_shm_mounted()?;
    Ok(())
}

/// Parse the release out of /proc/version contents, e.g.
/// "Linux version 5.15.0-generic ..." gives `Some((5, 15))`
fn parse_kernel_version(version_str: &str) -> Option<(u32, u32)> {
    let release = version_str.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check if the kernel version is sufficient for non-clobbering fixed mappings
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let Some((major, minor)) = parse_kernel_version(&version_str) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             depscope requires Linux {}.{} or newer for MAP_FIXED_NOREPLACE.",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// POSIX shared memory objects live in /dev/shm on Linux
fn check_shm_mounted() -> Result<()> {
    if !Path::new("/dev/shm").is_dir() {
        bail!(
            "/dev/shm is not available.\n\n\
             The event ring needs POSIX shared memory; mount a tmpfs at /dev/shm\n\
             or use --replay with a recorded stream."
        );
    }
    Ok(())
}

/// Check that a recorded stream exists and is a regular file
pub fn check_replay_file(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Replay file not found: {}\n\n\
             Make sure the path is correct and the file exists.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --replay must point to a recorded event stream, not a directory.",
            path.display()
        );
    }
    Ok(())
}

/// Check that the report directory exists
pub fn check_output_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!(
            "Output directory not found: {}\n\n\
             Create it first, or pass an existing directory to --output-dir.",
            dir.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(
            parse_kernel_version("Linux version 5.15.0-91-generic (buildd@lcy02) #101"),
            Some((5, 15))
        );
        assert_eq!(parse_kernel_version("Linux version 6.1rc2 x"), Some((6, 1)));
        assert_eq!(parse_kernel_version("garbage"), None);
    }

    #[test]
    fn test_kernel_version_check() {
        // Don't assert success since test might run on old kernel
        // Just ensure it doesn't panic
        let _ = check_kernel_version();
    }

    #[test]
    fn test_replay_file_not_found() {
        let result = check_replay_file(Path::new("/nonexistent/path/to/stream.bin"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Replay file not found"));
    }

    #[test]
    fn test_replay_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_replay_file(dir.path()).unwrap_err().to_string();
        assert!(err.contains("Not a file"));
    }

    #[test]
    fn test_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_output_dir(dir.path()).is_ok());
        assert!(check_output_dir(&dir.path().join("missing")).is_err());
    }
}
