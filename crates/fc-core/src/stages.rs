//! The four generative stages and the collaborator contracts they call.
//!
//! Every collaborator is blocking. The orchestrator moves each stage onto a
//! blocking worker, so none of this code may assume an async context.

pub mod audio;
pub mod portrait;
pub mod prompt;
pub mod video;

use std::path::{Path, PathBuf};
use std::process::Command;
use image::DynamicImage;

use crate::error::Result;
use crate::progress::Cancellation;
use crate::run::RunPaths;

pub use self::audio::{AudioSpec, synthesize_audio};
pub use self::portrait::{ComputeDevice, DiffusionParams, generate_image};
pub use self::prompt::{IMAGE_INSTRUCTIONS, expand_prompt};
pub use self::video::animate;

/// Local language model used to expand a character description.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, character_description: &str, instructions: &str) -> Result<String>;
}

/// Text-to-image diffusion model.
pub trait ImageModel: Send + Sync {
    fn generate(&self, prompt: &str, device: ComputeDevice) -> Result<DynamicImage>;
}

/// Text-to-speech engine. Returns an encoded audio buffer in any container
/// the transcoder understands.
pub trait SpeechSynth: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Converts an audio file to a WAV with the requested layout.
pub trait AudioTranscoder: Send + Sync {
    fn transcode(&self, input: &Path, output: &Path, spec: AudioSpec) -> Result<()>;
}

/// External lip-sync program. Implementations only build the invocation;
/// running it and collecting the result is up to [`animate`].
pub trait LipSyncProcess: Send + Sync {
    fn command(&self, audio: &Path, image: &Path, result_dir: &Path) -> Command;
}

/// The pipeline's view of the stages. `Stages` is the real thing; tests
/// substitute their own.
pub trait StageRunner: Send + Sync {
    fn expand_prompt(&self, character_description: &str) -> Result<String>;
    fn generate_image(&self, prompt: &str, run: &RunPaths) -> Result<PathBuf>;
    fn synthesize_audio(&self, script: &str, run: &RunPaths) -> Result<PathBuf>;
    fn animate(
        &self,
        image: &Path,
        audio: &Path,
        run: &RunPaths,
        cancel: &Cancellation,
    ) -> Result<PathBuf>;
}

pub struct Stages {
    llm: Box<dyn LanguageModel>,
    image_model: Box<dyn ImageModel>,
    device: ComputeDevice,
    tts: Box<dyn SpeechSynth>,
    transcoder: Box<dyn AudioTranscoder>,
    lipsync: Box<dyn LipSyncProcess>,
}

impl Stages {
    pub fn new(
        llm: Box<dyn LanguageModel>,
        image_model: Box<dyn ImageModel>,
        device: ComputeDevice,
        tts: Box<dyn SpeechSynth>,
        transcoder: Box<dyn AudioTranscoder>,
        lipsync: Box<dyn LipSyncProcess>,
    ) -> Self {
        Self {
            llm,
            image_model,
            device,
            tts,
            transcoder,
            lipsync,
        }
    }
}

impl StageRunner for Stages {
    fn expand_prompt(&self, character_description: &str) -> Result<String> {
        prompt::expand_prompt(self.llm.as_ref(), character_description)
    }

    fn generate_image(&self, prompt: &str, run: &RunPaths) -> Result<PathBuf> {
        portrait::generate_image(self.image_model.as_ref(), self.device, prompt, &run.image)
    }

    fn synthesize_audio(&self, script: &str, run: &RunPaths) -> Result<PathBuf> {
        audio::synthesize_audio(
            self.tts.as_ref(),
            self.transcoder.as_ref(),
            script,
            &run.speech_temp,
            &run.audio,
        )
    }

    fn animate(
        &self,
        image: &Path,
        audio: &Path,
        run: &RunPaths,
        cancel: &Cancellation,
    ) -> Result<PathBuf> {
        video::animate(self.lipsync.as_ref(), image, audio, &run.result_dir, &run.video, cancel)
    }
}
