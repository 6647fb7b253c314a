use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Missing 'characterstics' or 'script' query parameters.")]
    MissingParameters,
}

/// What the client asked for: who to draw and what they should say.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub character_description: String,
    pub script: String,
}

impl GenerationRequest {
    /// Both fields are required; blank values count as missing.
    pub fn new(
        character_description: Option<String>,
        script: Option<String>,
    ) -> Result<Self, RequestError> {
        match (non_blank(character_description), non_blank(script)) {
            (Some(character_description), Some(script)) => Ok(Self {
                character_description,
                script,
            }),
            _ => Err(RequestError::MissingParameters),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
