use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::PipelineState;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Generated image is invalid ({0})")]
    Validation(String),

    #[error("{message}{}", diagnostics(.stdout, .stderr))]
    ExternalProcess {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Audio at {} is {found}, expected {expected}", .path.display())]
    AudioFormat {
        path: PathBuf,
        found: String,
        expected: String,
    },

    #[error("{0}")]
    Collaborator(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Stage worker failed: {0}")]
    Worker(String),

    #[error("Illegal pipeline transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("Client disconnected")]
    Cancelled,
}

impl PipelineError {
    /// Build an `ExternalProcess` error from a finished process' captured output.
    pub fn process_failed(message: impl Into<String>, output: &std::process::Output) -> Self {
        Self::ExternalProcess {
            message: message.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

fn diagnostics(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for (label, stream) in [("stdout", stdout.trim()), ("stderr", stderr.trim())] {
        if !stream.is_empty() {
            out.push_str(&format!("\n{label}: {stream}"));
        }
    }
    out
}
