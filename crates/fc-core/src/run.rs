use std::path::{Component, Path, PathBuf};
use log::{info, warn};
use uuid::Uuid;

use crate::error::Result;

const RUNS: &str = "runs";
const VIDEOS: &str = "videos";

/// Root of everything the service writes to disk.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS)
    }

    /// Allocate a fresh run id and create its scratch directories.
    pub fn prepare_run(&self) -> Result<RunPaths> {
        let id = Uuid::new_v4();
        let dir = self.root.join(RUNS).join(id.to_string());
        let paths = RunPaths {
            id,
            image: dir.join("source_image.png"),
            speech_temp: dir.join("speech.tmp"),
            audio: dir.join("audio.wav"),
            result_dir: dir.join("results"),
            video: self.videos_dir().join(format!("{id}.mp4")),
            dir,
        };

        std::fs::create_dir_all(&paths.result_dir)?;
        std::fs::create_dir_all(self.videos_dir())?;
        info!("Prepared run {} at {}", id, paths.dir.display());

        Ok(paths)
    }

    /// Resolve a client-supplied video name. Anything that is not a plain
    /// file name inside the videos directory resolves to `None`.
    pub fn video_path(&self, name: &str) -> Option<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Some(self.videos_dir().join(file)),
            _ => None,
        }
    }
}

/// Run-scoped artifact locations. No two runs share any of these paths.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub id: Uuid,
    pub dir: PathBuf,
    pub image: PathBuf,
    pub speech_temp: PathBuf,
    pub audio: PathBuf,
    pub result_dir: PathBuf,
    pub video: PathBuf,
}

impl RunPaths {
    /// URL under which the final video is served.
    pub fn video_url(&self) -> String {
        let name = self
            .video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("/output/{VIDEOS}/{name}")
    }

    /// Remove the scratch directory. The final video lives outside it.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean up run directory {}: {}", self.dir.display(), e);
            }
        }
    }
}
