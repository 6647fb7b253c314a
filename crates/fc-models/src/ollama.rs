use log::info;
use serde::{Deserialize, Serialize};

use fc_core::Result;
use fc_core::stages::LanguageModel;

use crate::{check_status, http_client, request_failed};

pub const DEFAULT_TEMPLATE: &str = "{detailed_instructions}\n\n\
Character: {character_description}\n\n\
Respond only with a JSON object of the form {\"prompt\": \"<image generation prompt>\"}.";

const SERVICE: &str = "Ollama";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    format: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Language model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    template: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Replace the built-in prompt template. The template may use
    /// `{character_description}` and `{detailed_instructions}`.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    fn render(&self, character_description: &str, instructions: &str) -> String {
        self.template
            .replace("{detailed_instructions}", instructions)
            .replace("{character_description}", character_description)
    }
}

impl LanguageModel for OllamaClient {
    fn generate(&self, character_description: &str, instructions: &str) -> Result<String> {
        info!("Requesting image prompt from {} ({})", SERVICE, self.model);

        let request = GenerateRequest {
            model: &self.model,
            prompt: self.render(character_description, instructions),
            format: "json",
            stream: false,
        };

        let response = http_client()?
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .map_err(|e| request_failed(SERVICE, e))?;

        let body: GenerateResponse = check_status(SERVICE, response)?
            .json()
            .map_err(|e| request_failed(SERVICE, e))?;

        Ok(body.response)
    }
}
