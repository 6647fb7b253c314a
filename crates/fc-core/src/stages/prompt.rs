use log::{info, warn};
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::stages::LanguageModel;

pub const IMAGE_INSTRUCTIONS: &str = "Create a detailed, realistic, photorealistic, 4k, passport-style photograph of the following character. \
The image MUST be a clear, front-facing headshot with a neutral expression and a simple, plain background. \
Ensure the full face is visible without any obstructions.";

const FENCE: &str = "```";

#[derive(Deserialize)]
struct PromptResponse {
    #[serde(default)]
    prompt: String,
}

/// Turn a short character description into a detailed image prompt.
///
/// The model is asked for `{"prompt": ...}`. When it answers with anything
/// else the raw text is used instead; only an empty answer is an error.
pub fn expand_prompt(llm: &dyn LanguageModel, character_description: &str) -> Result<String> {
    let raw = llm.generate(character_description, IMAGE_INSTRUCTIONS)?;

    if let Some(prompt) = structured_prompt(&raw) {
        info!("Image prompt: {}", prompt);
        return Ok(prompt);
    }

    let fallback = flatten(&raw);
    if fallback.is_empty() {
        return Err(PipelineError::Collaborator(
            "Language model returned an empty response".into(),
        ));
    }

    warn!("Language model did not return a JSON prompt, using raw output");
    Ok(fallback)
}

fn structured_prompt(raw: &str) -> Option<String> {
    let parse = |text: &str| {
        serde_json::from_str::<PromptResponse>(text.trim())
            .ok()
            .map(|r| r.prompt.trim().to_string())
            .filter(|p| !p.is_empty())
    };

    parse(raw).or_else(|| parse(strip_fences(raw)))
}

/// Inner text of a fenced block such as ```` ```json ... ``` ````.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };
    let body = body.strip_suffix(FENCE).unwrap_or(body);
    match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim().contains(' ') && !tag.trim().starts_with('{') => rest,
        _ => body,
    }
}

fn flatten(raw: &str) -> String {
    raw.replace(FENCE, "")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
