use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use fc_core::stages::ComputeDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderKind {
    Ffmpeg,
    Native,
}

impl FromStr for TranscoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "native" => Ok(Self::Native),
            other => Err(format!("unknown audio transcoder '{other}' (expected ffmpeg or native)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub static_dir: PathBuf,

    pub ollama_url: String,
    pub llm_model: String,
    pub prompt_template: Option<PathBuf>,

    pub diffusion_url: String,
    pub image_model: String,
    pub device: ComputeDevice,

    pub tts_url: String,
    pub tts_lang: String,
    pub transcoder: TranscoderKind,
    pub ffmpeg_bin: PathBuf,

    pub sadtalker_dir: PathBuf,
    pub python_bin: PathBuf,

    pub max_concurrent_runs: usize,
}

impl AppConfig {
    /// Environment, optionally seeded from a `.env` file in the working directory.
    pub fn load() -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("Failed to read .env");
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_concurrent_runs: usize = parsed(&get, "MAX_CONCURRENT_RUNS", 1)?;
        if max_concurrent_runs == 0 {
            return Err(anyhow!("MAX_CONCURRENT_RUNS must be at least 1"));
        }

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parsed(&get, "PORT", 8000)?,
            output_dir: text("OUTPUT_DIR", "output").into(),
            static_dir: text("STATIC_DIR", "static").into(),
            ollama_url: text("OLLAMA_URL", "http://127.0.0.1:11434"),
            llm_model: text("LLM_MODEL", "gemma:2b"),
            prompt_template: get("PROMPT_TEMPLATE").map(PathBuf::from),
            diffusion_url: text("DIFFUSION_URL", "http://127.0.0.1:5000"),
            image_model: text("IMAGE_MODEL", "stabilityai/stable-diffusion-2-1-base"),
            device: parsed(&get, "COMPUTE_DEVICE", ComputeDevice::Cpu)?,
            tts_url: text("TTS_URL", "http://127.0.0.1:5002"),
            tts_lang: text("TTS_LANG", "en"),
            transcoder: parsed(&get, "AUDIO_TRANSCODER", TranscoderKind::Ffmpeg)?,
            ffmpeg_bin: text("FFMPEG_BIN", "ffmpeg").into(),
            sadtalker_dir: text("SADTALKER_DIR", "SadTalker").into(),
            python_bin: text("PYTHON_BIN", "python3").into(),
            max_concurrent_runs,
        })
    }

    /// Contents of the custom prompt template, if one is configured.
    pub fn read_prompt_template(&self) -> anyhow::Result<Option<String>> {
        self.prompt_template
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read prompt template {}", path.display()))
            })
            .transpose()
    }
}

fn parsed<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
