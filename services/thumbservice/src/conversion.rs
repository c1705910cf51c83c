use crate::config::CodecConfig;
use crate::frame::ThumbnailParams;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Errors raised while rendering a JPEG
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Expected {expected} input frames, got {actual}")]
    InputCount { expected: usize, actual: usize },

    #[error("Failed to run codec: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Codec exited with {status}: {stderr}")]
    Codec { status: String, stderr: String },

    #[error("Codec did not produce {0}")]
    MissingOutput(PathBuf),
}

/// Renders FITS frames to a JPEG
///
/// `inputs` is one path for a monochrome thumbnail, or exactly three paths in
/// `[red, visual, blue]` order for a colour composite.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        params: &ThumbnailParams,
    ) -> Result<(), ConversionError>;
}

/// Check the input count against the requested mode before calling the codec
pub fn check_inputs(inputs: &[PathBuf], params: &ThumbnailParams) -> Result<(), ConversionError> {
    let expected = if params.color { 3 } else { 1 };
    if inputs.len() != expected {
        return Err(ConversionError::InputCount {
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// Converter that shells out to an external codec program
///
/// Invoked as `command --width W --height H --percentile P --quality Q
/// [--median] [--color] [--label TEXT] <output> <input>...`.
pub struct CommandConverter {
    program: String,
}

impl CommandConverter {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            program: config.command.clone(),
        }
    }

    fn args(inputs: &[PathBuf], output: &Path, params: &ThumbnailParams) -> Vec<String> {
        let mut args = vec![
            "--width".to_string(),
            params.width.to_string(),
            "--height".to_string(),
            params.height.to_string(),
            "--percentile".to_string(),
            params.percentile.to_string(),
            "--quality".to_string(),
            params.quality.to_string(),
        ];
        if params.median {
            args.push("--median".to_string());
        }
        if params.color {
            args.push("--color".to_string());
        }
        if let Some(label) = &params.label_text {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        args.push(output.display().to_string());
        args.extend(inputs.iter().map(|p| p.display().to_string()));
        args
    }
}

#[async_trait]
impl Converter for CommandConverter {
    #[instrument(skip(self, params), fields(program = %self.program))]
    async fn convert(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        params: &ThumbnailParams,
    ) -> Result<(), ConversionError> {
        check_inputs(inputs, params)?;

        let result = Command::new(&self.program)
            .args(Self::args(inputs, output, params))
            .output()
            .await?;

        if !result.status.success() {
            return Err(ConversionError::Codec {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ConversionError::MissingOutput(output.to_path_buf()));
        }

        debug!(output = %output.display(), "Codec finished");
        Ok(())
    }
}
