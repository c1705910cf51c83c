//! Crash recovery for the shared temp directory.
//!
//! Every file a worker creates starts with `pid{pid}-`. A supervisor that sees
//! a worker die calls [`sweep_worker`] with that pid; a freshly started process
//! calls [`sweep_all`] to clear anything left behind by a forced restart.

use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Common prefix for all files created by the process with this pid
pub fn temp_filename_prefix(pid: u32) -> String {
    format!("pid{pid}-")
}

/// Delete every file in `tmp_dir` created by the worker with `pid`
///
/// Files of other workers are never touched. Returns the number of files removed.
pub fn sweep_worker(tmp_dir: &Path, pid: u32) -> io::Result<usize> {
    let prefix = temp_filename_prefix(pid);
    let removed = sweep(tmp_dir, |name| name.starts_with(&prefix))?;
    debug!(pid, removed, "Swept worker temp files");
    Ok(removed)
}

/// Delete every file in `tmp_dir`
///
/// Only safe while no worker is running, i.e. when the process group starts.
pub fn sweep_all(tmp_dir: &Path) -> io::Result<usize> {
    sweep(tmp_dir, |name| {
        info!(file = %name, "Temp file was left behind during restart, cleaning it up");
        true
    })
}

fn sweep(tmp_dir: &Path, mut matches: impl FnMut(&str) -> bool) -> io::Result<usize> {
    let entries = match std::fs::read_dir(tmp_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !matches(name) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %name, error = %e, "Failed to remove temp file"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_prefix() {
        assert_eq!(temp_filename_prefix(42), "pid42-");
    }

    #[test]
    fn test_sweep_worker_only_touches_own_prefix() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "pid12-aaaa-frame.fits");
        touch(temp_dir.path(), "pid12-bbbb-1.abc.jpg");
        touch(temp_dir.path(), "pid123-cccc-frame.fits");
        touch(temp_dir.path(), "pid7-dddd-frame.fits");

        let removed = sweep_worker(temp_dir.path(), 12).unwrap();

        assert_eq!(removed, 2);
        assert!(temp_dir.path().join("pid123-cccc-frame.fits").exists());
        assert!(temp_dir.path().join("pid7-dddd-frame.fits").exists());
    }

    #[test]
    fn test_sweep_all() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "pid1-a");
        touch(temp_dir.path(), "stray");
        std::fs::create_dir(temp_dir.path().join("subdir")).unwrap();

        assert_eq!(sweep_all(temp_dir.path()).unwrap(), 2);
        assert!(temp_dir.path().join("subdir").exists());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(sweep_all(&temp_dir.path().join("nope")).unwrap(), 0);
    }
}
