//! Best-effort co-registration of colour channels.
//!
//! The red channel is the reference; visual and blue are registered onto it.
//! Alignment never fails a request: either both non-reference channels are
//! aligned, or every aligned artifact is deleted and the original three frames
//! are used unchanged.

use crate::workspace::Workspace;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Errors raised by an alignment backend
#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("Failed to run alignment program: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Alignment failed: {0}")]
    Failed(String),
}

/// One image to register onto the reference, and where to write the result
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentTarget {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Per-target result reported by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub ok: bool,
    /// Affine transform `[a, b, c, d, tx, ty]`, when the backend reports one
    pub transform: Option<[f64; 6]>,
    /// Path of the aligned image
    pub resolved_path: PathBuf,
}

/// Geometric registration backend
#[async_trait]
pub trait Aligner: Send + Sync {
    async fn align(
        &self,
        reference: &Path,
        targets: &[AlignmentTarget],
    ) -> Result<Vec<Registration>, AlignmentError>;
}

/// Result of the alignment step, consumed explicitly by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentOutcome {
    /// `[reference, aligned_visual, aligned_blue]`
    Aligned(Vec<PathBuf>),
    /// Use the original, unaligned channels
    Fallback,
}

/// Align the workspace's current `[red, visual, blue]` set
///
/// Output paths are allocated in the workspace before the backend runs, so
/// they are cleaned up with the request even if this future is dropped.
pub async fn align_channels(aligner: &dyn Aligner, workspace: &mut Workspace) -> AlignmentOutcome {
    let channels = workspace.current().to_vec();
    let [reference, others @ ..] = channels.as_slice() else {
        return AlignmentOutcome::Fallback;
    };
    if others.len() != 2 {
        warn!(channels = channels.len(), "Alignment needs exactly three channels");
        return AlignmentOutcome::Fallback;
    }

    let targets: Vec<AlignmentTarget> = others
        .iter()
        .map(|input| AlignmentTarget {
            input: input.clone(),
            output: workspace.allocate(&format!("aligned-{}", file_name(input))),
        })
        .collect();

    let registrations = match aligner.align(reference, &targets).await {
        Ok(registrations) => registrations,
        Err(e) => {
            warn!(error = %e, "Image alignment failed, using unaligned frames");
            discard(&targets, &[]);
            metrics::counter!("thumbnail_alignment_fallbacks_total").increment(1);
            return AlignmentOutcome::Fallback;
        }
    };

    for registration in &registrations {
        workspace.track(registration.resolved_path.clone());
    }

    let aligned: Vec<PathBuf> = registrations
        .iter()
        .filter(|r| r.ok && r.resolved_path.exists())
        .map(|r| r.resolved_path.clone())
        .collect();

    if registrations.len() != targets.len() || aligned.len() != targets.len() {
        warn!(
            aligned = aligned.len(),
            expected = targets.len(),
            "Not all channels aligned, using unaligned frames"
        );
        discard(&targets, &registrations);
        metrics::counter!("thumbnail_alignment_fallbacks_total").increment(1);
        return AlignmentOutcome::Fallback;
    }

    info!("Colour channels aligned");
    let mut paths = Vec::with_capacity(3);
    paths.push(reference.clone());
    paths.extend(aligned);
    AlignmentOutcome::Aligned(paths)
}

/// Delete partial alignment output
fn discard(targets: &[AlignmentTarget], registrations: &[Registration]) {
    let paths = targets
        .iter()
        .map(|t| &t.output)
        .chain(registrations.iter().map(|r| &r.resolved_path));
    for path in paths {
        if targets.iter().any(|t| &t.input == path) {
            continue;
        }
        if std::fs::remove_file(path).is_ok() {
            debug!(path = %path.display(), "Removed partial alignment output");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Aligner that runs an external registration program once per target
///
/// Invoked as `command <reference> <target> <output>`; a zero exit status and
/// an existing output file count as success.
pub struct CommandAligner {
    program: String,
}

impl CommandAligner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Aligner for CommandAligner {
    async fn align(
        &self,
        reference: &Path,
        targets: &[AlignmentTarget],
    ) -> Result<Vec<Registration>, AlignmentError> {
        let mut registrations = Vec::with_capacity(targets.len());
        for target in targets {
            let result = Command::new(&self.program)
                .arg(reference)
                .arg(&target.input)
                .arg(&target.output)
                .output()
                .await?;

            let ok = result.status.success() && target.output.exists();
            if !ok {
                debug!(
                    target = %target.input.display(),
                    stderr = %String::from_utf8_lossy(&result.stderr).trim(),
                    "Alignment program rejected target"
                );
            }
            registrations.push(Registration {
                ok,
                transform: None,
                resolved_path: target.output.clone(),
            });
        }
        Ok(registrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes outputs for the first `succeed` targets and reports the rest as failed
    struct PartialAligner {
        succeed: usize,
        error_after_writing: bool,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl PartialAligner {
        fn new(succeed: usize) -> Self {
            Self {
                succeed,
                error_after_writing: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Aligner for PartialAligner {
        async fn align(
            &self,
            reference: &Path,
            targets: &[AlignmentTarget],
        ) -> Result<Vec<Registration>, AlignmentError> {
            self.calls.lock().unwrap().push(reference.to_path_buf());
            let mut out = Vec::new();
            for (i, target) in targets.iter().enumerate() {
                let ok = i < self.succeed;
                if ok {
                    std::fs::write(&target.output, b"aligned")?;
                }
                out.push(Registration {
                    ok,
                    transform: ok.then_some([1.0, 0.0, 0.0, 1.0, 2.5, -1.0]),
                    resolved_path: target.output.clone(),
                });
            }
            if self.error_after_writing {
                return Err(AlignmentError::Failed("Something bad happened".into()));
            }
            Ok(out)
        }
    }

    fn workspace_with_channels(dir: &Path) -> (Workspace, Vec<PathBuf>) {
        let mut workspace = Workspace::new(dir);
        let channels: Vec<PathBuf> = ["rp.fits", "v.fits", "b.fits"]
            .iter()
            .map(|n| workspace.allocate(n))
            .collect();
        for path in &channels {
            std::fs::write(path, b"fits").unwrap();
        }
        workspace.set_current(channels.clone());
        (workspace, channels)
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_both_targets_aligned() {
        let temp_dir = TempDir::new().unwrap();
        let (mut workspace, channels) = workspace_with_channels(temp_dir.path());
        let aligner = PartialAligner::new(2);

        let outcome = align_channels(&aligner, &mut workspace).await;

        let AlignmentOutcome::Aligned(paths) = outcome else {
            panic!("Expected Aligned, got {:?}", outcome);
        };
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], channels[0]);
        assert_ne!(paths[1], channels[1]);
        assert_ne!(paths[2], channels[2]);
        assert_eq!(aligner.calls.lock().unwrap()[0], channels[0]);

        workspace.release();
        assert_eq!(files_in(temp_dir.path()), 0);
    }

    #[tokio::test]
    async fn test_one_failed_target_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let (mut workspace, channels) = workspace_with_channels(temp_dir.path());

        let outcome = align_channels(&PartialAligner::new(1), &mut workspace).await;

        assert_eq!(outcome, AlignmentOutcome::Fallback);
        assert_eq!(workspace.current(), channels.as_slice());
        // only the three originals remain on disk
        assert_eq!(files_in(temp_dir.path()), 3);
    }

    #[tokio::test]
    async fn test_backend_error_falls_back_and_cleans_partial_output() {
        let temp_dir = TempDir::new().unwrap();
        let (mut workspace, channels) = workspace_with_channels(temp_dir.path());
        let aligner = PartialAligner {
            error_after_writing: true,
            ..PartialAligner::new(1)
        };

        let outcome = align_channels(&aligner, &mut workspace).await;

        assert_eq!(outcome, AlignmentOutcome::Fallback);
        assert_eq!(workspace.current(), channels.as_slice());
        assert_eq!(files_in(temp_dir.path()), 3);
    }

    #[tokio::test]
    async fn test_wrong_channel_count_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut workspace = Workspace::new(temp_dir.path());
        let single = workspace.allocate("only.fits");
        workspace.set_current(vec![single]);

        let aligner = PartialAligner::new(2);
        let outcome = align_channels(&aligner, &mut workspace).await;

        assert_eq!(outcome, AlignmentOutcome::Fallback);
        assert!(aligner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let aligner = CommandAligner::new("/nonexistent/thumbservice-align");
        let target = AlignmentTarget {
            input: PathBuf::from("v.fits"),
            output: PathBuf::from("out.fits"),
        };

        let result = aligner.align(Path::new("r.fits"), &[target]).await;
        assert!(matches!(result, Err(AlignmentError::Spawn(_))));
    }
}
