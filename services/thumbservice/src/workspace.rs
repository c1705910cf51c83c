use crate::lifecycle::temp_filename_prefix;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Temp files owned by one thumbnail request
///
/// `tracked` holds every path ever handed out or registered, `current` is the
/// input of the next pipeline stage. Stages replace `current` but never shrink
/// `tracked`, so superseded intermediates are still removed by [`release`].
/// Release also runs on drop, which covers early returns, panics and cancelled
/// request futures.
///
/// [`release`]: Workspace::release
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    prefix: String,
    tracked: BTreeSet<PathBuf>,
    current: Vec<PathBuf>,
}

impl Workspace {
    /// Workspace for the current process in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::for_pid(dir, std::process::id())
    }

    /// Workspace whose files carry the prefix of `pid`
    pub fn for_pid(dir: impl Into<PathBuf>, pid: u32) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self {
            dir: dir.into(),
            prefix: format!("{}{}-", temp_filename_prefix(pid), &token[..8]),
            tracked: BTreeSet::new(),
            current: Vec::new(),
        }
    }

    /// Allocate and track a new path for `name`
    ///
    /// The file is not created; whoever writes it can fail without leaking it.
    pub fn allocate(&mut self, name: &str) -> PathBuf {
        let path = self
            .dir
            .join(format!("{}{}", self.prefix, sanitize_file_name(name)));
        self.track(path.clone());
        path
    }

    /// Track a path produced outside [`allocate`](Workspace::allocate)
    pub fn track(&mut self, path: PathBuf) {
        self.tracked.insert(path);
    }

    /// Replace the input list of the next stage; the paths stay tracked
    pub fn set_current(&mut self, paths: Vec<PathBuf>) {
        for path in &paths {
            self.tracked.insert(path.clone());
        }
        self.current = paths;
    }

    pub fn current(&self) -> &[PathBuf] {
        &self.current
    }

    pub fn tracked(&self) -> impl Iterator<Item = &Path> {
        self.tracked.iter().map(PathBuf::as_path)
    }

    /// Ensure the temp directory exists
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Delete every tracked path and forget it
    ///
    /// Paths that are already gone are skipped. Returns the number of files removed.
    pub fn release(&mut self) -> usize {
        let mut removed = 0;
        for path in std::mem::take(&mut self.tracked) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }
        self.current.clear();
        if removed > 0 {
            debug!(removed, "Workspace released");
        }
        removed
    }
}

impl Workspace {
    /// Async counterpart of [`release`](Workspace::release) for request paths
    pub async fn release_async(&mut self) -> usize {
        let mut removed = 0;
        for path in std::mem::take(&mut self.tracked) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }
        self.current.clear();
        if removed > 0 {
            debug!(removed, "Workspace released");
        }
        removed
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Sanitize a file name so it stays inside the temp directory
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    sanitized.trim_start_matches('.').to_string()
}
