use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::info;

use fc_core::stages::{AudioSpec, AudioTranscoder};
use fc_core::{PipelineError, Result};

/// Audio conversion through the `ffmpeg` CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, input: &Path, output: &Path, spec: AudioSpec) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-ar")
            .arg(spec.sample_rate.to_string())
            .arg("-ac")
            .arg(spec.channels.to_string())
            .arg(output)
            .stdin(Stdio::null());
        cmd
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl AudioTranscoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path, spec: AudioSpec) -> Result<()> {
        info!("Converting {} to {} ({})", input.display(), output.display(), spec);

        let result = self.command(input, output, spec).output().map_err(|e| {
            PipelineError::Collaborator(format!("Failed to run {}: {e}", self.bin.display()))
        })?;

        if !result.status.success() {
            return Err(PipelineError::process_failed(
                format!("ffmpeg audio conversion failed ({})", result.status),
                &result,
            ));
        }
        Ok(())
    }
}
