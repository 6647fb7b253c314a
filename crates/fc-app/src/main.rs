mod config;
mod error;
mod server;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use fc_core::stages::AudioTranscoder;
use fc_core::{OutputLayout, Pipeline, Stages};
use fc_models::{
    DiffusionClient, FfmpegTranscoder, HttpSpeechSynth, NativeWavTranscoder, OllamaClient,
    SadTalker,
};

use crate::config::{AppConfig, TranscoderKind};
use crate::server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let conf = AppConfig::load()?;
    let stages = build_stages(&conf)?;

    let layout = OutputLayout::new(&conf.output_dir);
    std::fs::create_dir_all(layout.videos_dir())
        .with_context(|| format!("Failed to create {}", layout.videos_dir().display()))?;

    info!(
        "Using {} on {} with {} concurrent run(s)",
        conf.image_model, conf.device, conf.max_concurrent_runs
    );

    let pipeline = Pipeline::new(Arc::new(stages), layout);
    let state = Arc::new(AppState::new(pipeline, conf.max_concurrent_runs));
    let app = server::build_app(state, &conf.static_dir);

    server::serve(app, &conf.host, conf.port).await
}

fn build_stages(conf: &AppConfig) -> anyhow::Result<Stages> {
    let mut llm = OllamaClient::new(&conf.ollama_url, &conf.llm_model);
    if let Some(template) = conf.read_prompt_template()? {
        llm = llm.with_template(template);
    }

    let transcoder: Box<dyn AudioTranscoder> = match conf.transcoder {
        TranscoderKind::Ffmpeg => Box::new(FfmpegTranscoder::new(&conf.ffmpeg_bin)),
        TranscoderKind::Native => Box::new(NativeWavTranscoder),
    };

    Ok(Stages::new(
        Box::new(llm),
        Box::new(DiffusionClient::new(&conf.diffusion_url, &conf.image_model)),
        conf.device,
        Box::new(HttpSpeechSynth::new(&conf.tts_url, &conf.tts_lang)),
        transcoder,
        Box::new(SadTalker::new(&conf.python_bin, &conf.sadtalker_dir)),
    ))
}
