use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::error::{PipelineError, Result};
use crate::stages::{AudioTranscoder, SpeechSynth};

/// Sample layout of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    /// What the lip-sync model expects as driving audio.
    pub const ANIMATION: AudioSpec = AudioSpec {
        sample_rate: 16_000,
        channels: 1,
    };
}

impl fmt::Display for AudioSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// Speak `script` and leave a WAV conforming to [`AudioSpec::ANIMATION`] at `out`.
///
/// The raw TTS output goes to `temp` and is removed again whatever happens.
pub fn synthesize_audio(
    tts: &dyn SpeechSynth,
    transcoder: &dyn AudioTranscoder,
    script: &str,
    temp: &Path,
    out: &Path,
) -> Result<PathBuf> {
    let speech = tts.synthesize(script)?;
    if speech.is_empty() {
        return Err(PipelineError::Collaborator("Speech synthesis returned no audio".into()));
    }

    for dir in [temp.parent(), out.parent()].into_iter().flatten() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(temp, &speech)?;

    let converted = transcoder.transcode(temp, out, AudioSpec::ANIMATION);
    if let Err(e) = std::fs::remove_file(temp) {
        warn!("Failed to remove intermediate audio {}: {}", temp.display(), e);
    }
    converted?;

    let duration = ensure_spec(out, AudioSpec::ANIMATION)?;
    info!("Voiceover saved to {} ({:.2}s)", out.display(), duration.as_secs_f64());

    Ok(out.to_path_buf())
}

/// Check that `path` is a WAV with the expected layout and return its length.
pub fn ensure_spec(path: &Path, expected: AudioSpec) -> Result<Duration> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let found = AudioSpec {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    };

    if found != expected {
        return Err(PipelineError::AudioFormat {
            path: path.to_path_buf(),
            found: found.to_string(),
            expected: expected.to_string(),
        });
    }

    let frames = reader.duration();
    Ok(Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64))
}
