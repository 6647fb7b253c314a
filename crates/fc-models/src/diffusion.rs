use image::DynamicImage;
use log::info;
use serde::Serialize;

use fc_core::stages::{ComputeDevice, DiffusionParams, ImageModel};
use fc_core::{PipelineError, Result};

use crate::{check_status, http_client, request_failed};

const SERVICE: &str = "diffusion service";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    device: ComputeDevice,
    #[serde(flatten)]
    params: DiffusionParams,
}

/// Stable Diffusion behind an HTTP service that answers `POST /generate`
/// with an encoded image.
#[derive(Debug, Clone)]
pub struct DiffusionClient {
    base_url: String,
    model: String,
}

impl DiffusionClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

impl ImageModel for DiffusionClient {
    fn generate(&self, prompt: &str, device: ComputeDevice) -> Result<DynamicImage> {
        let params = DiffusionParams::for_device(device);
        info!(
            "Generating avatar with {} on {} ({} steps, guidance {})",
            self.model, device, params.num_inference_steps, params.guidance_scale
        );

        let request = GenerateRequest {
            prompt,
            model: &self.model,
            device,
            params,
        };

        let response = http_client()?
            .post(format!("{}/generate", self.base_url))
            .json(&request)
            .send()
            .map_err(|e| request_failed(SERVICE, e))?;

        let bytes = check_status(SERVICE, response)?
            .bytes()
            .map_err(|e| request_failed(SERVICE, e))?;

        if bytes.is_empty() {
            return Err(PipelineError::Collaborator(format!("{SERVICE} returned an empty image")));
        }

        Ok(image::load_from_memory(&bytes)?)
    }
}
