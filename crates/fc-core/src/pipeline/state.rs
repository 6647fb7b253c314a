use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{PipelineError, Result};
use crate::progress::Stage;
use crate::run::RunPaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Prompt,
    Image,
    Audio,
    Video,
    Done,
    Error,
}

impl PipelineState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Prompt | Self::Image | Self::Audio | Self::Video)
    }

    /// The state that follows this one on success.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Prompt),
            Self::Prompt => Some(Self::Image),
            Self::Image => Some(Self::Audio),
            Self::Audio => Some(Self::Video),
            Self::Video => Some(Self::Done),
            Self::Done | Self::Error => None,
        }
    }

    pub fn can_transition(&self, to: Self) -> bool {
        (to == Self::Error && self.is_active()) || self.next() == Some(to)
    }
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Prompt => Self::Prompt,
            Stage::Image => Self::Image,
            Stage::Audio => Self::Audio,
            Stage::Video => Self::Video,
            Stage::Error => Self::Error,
        }
    }
}

/// One request's trip through the pipeline.
#[derive(Debug)]
pub struct PipelineRun {
    pub paths: RunPaths,
    state: PipelineState,
    started: Instant,
    pub started_at: DateTime<Utc>,

    pub image_prompt: Option<String>,
    pub avatar_image: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

impl PipelineRun {
    pub fn new(paths: RunPaths) -> Self {
        Self {
            paths,
            state: PipelineState::Idle,
            started: Instant::now(),
            started_at: Utc::now(),
            image_prompt: None,
            avatar_image: None,
            audio: None,
            video: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn transition(&mut self, to: PipelineState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
