use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use fc_core::stages::LipSyncProcess;

const INFERENCE_SCRIPT: &str = "inference.py";

/// SadTalker checkout driven through its `inference.py` script.
#[derive(Debug, Clone)]
pub struct SadTalker {
    python: PathBuf,
    dir: PathBuf,
}

impl SadTalker {
    pub fn new(python: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            dir: dir.into(),
        }
    }

    /// SadTalker resolves its checkpoints relative to its own directory, so
    /// the checkout must be importable and the working directory.
    fn python_path(&self) -> OsString {
        let mut paths = vec![self.dir.clone()];
        if let Some(existing) = std::env::var_os("PYTHONPATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths).unwrap_or_else(|_| self.dir.clone().into_os_string())
    }
}

impl LipSyncProcess for SadTalker {
    fn command(&self, audio: &Path, image: &Path, result_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg(self.dir.join(INFERENCE_SCRIPT))
            .arg("--driven_audio")
            .arg(audio)
            .arg("--source_image")
            .arg(image)
            .arg("--result_dir")
            .arg(result_dir)
            .args(["--still", "--preprocess", "full"])
            .current_dir(&self.dir)
            .env("PYTHONPATH", self.python_path());
        cmd
    }
}
