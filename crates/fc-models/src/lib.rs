pub mod diffusion;
pub mod ffmpeg;
pub mod ollama;
pub mod sadtalker;
pub mod tts;
pub mod wav;

pub use diffusion::DiffusionClient;
pub use ffmpeg::FfmpegTranscoder;
pub use ollama::OllamaClient;
pub use sadtalker::SadTalker;
pub use tts::HttpSpeechSynth;
pub use wav::NativeWavTranscoder;

use fc_core::PipelineError;

/// Blocking HTTP client without a request timeout. Generation calls can
/// legitimately take minutes.
pub(crate) fn http_client() -> Result<reqwest::blocking::Client, PipelineError> {
    reqwest::blocking::Client::builder()
        .timeout(None)
        .build()
        .map_err(|e| PipelineError::Collaborator(format!("Failed to build HTTP client: {e}")))
}

/// Turn a non-success response into a `Collaborator` error.
pub(crate) fn check_status(
    service: &str,
    response: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, PipelineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    Err(PipelineError::Collaborator(format!(
        "{service} returned HTTP {status}: {body}"
    )))
}

pub(crate) fn request_failed(service: &str, e: reqwest::Error) -> PipelineError {
    PipelineError::Collaborator(format!("Failed to reach {service}: {e}"))
}
