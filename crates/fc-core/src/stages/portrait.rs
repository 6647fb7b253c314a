use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{DynamicImage, ImageFormat};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::stages::ImageModel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Mps,
    Cpu,
}

impl ComputeDevice {
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Self::Cpu)
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            "cpu" => Ok(Self::Cpu),
            other => Err(format!("unknown compute device '{other}' (expected cuda, mps or cpu)")),
        }
    }
}

/// Sampler settings per device. MPS runs fewer steps at a lower guidance
/// scale to stay numerically stable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DiffusionParams {
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

impl DiffusionParams {
    pub fn for_device(device: ComputeDevice) -> Self {
        match device {
            ComputeDevice::Mps => Self {
                num_inference_steps: 15,
                guidance_scale: 7.0,
            },
            ComputeDevice::Cuda | ComputeDevice::Cpu => Self {
                num_inference_steps: 20,
                guidance_scale: 7.5,
            },
        }
    }
}

/// Generate the avatar portrait and save it to `out`.
///
/// A failure on an accelerated device, including a degenerate image, is
/// retried once on the CPU.
pub fn generate_image(
    model: &dyn ImageModel,
    device: ComputeDevice,
    prompt: &str,
    out: &Path,
) -> Result<PathBuf> {
    let image = match render(model, device, prompt) {
        Ok(image) => image,
        Err(e) if device.is_accelerated() => {
            warn!("Image generation on {} failed: {}. Falling back to cpu", device, e);
            render(model, ComputeDevice::Cpu, prompt)?
        }
        Err(e) => return Err(e),
    };

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(out, ImageFormat::Png)?;
    info!("Avatar image saved to {}", out.display());

    Ok(out.to_path_buf())
}

fn render(model: &dyn ImageModel, device: ComputeDevice, prompt: &str) -> Result<DynamicImage> {
    let image = model.generate(prompt, device)?;
    validate_image(&image)?;
    info!("Generated {}x{} image on {}", image.width(), image.height(), device);
    Ok(image)
}

/// Reject blank (all-zero) frames and float frames with NaN or infinite values.
pub fn validate_image(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Validation("empty image".into()));
    }

    let all_zero = match image {
        DynamicImage::ImageRgb32F(buf) => float_all_zero(buf.as_raw())?,
        DynamicImage::ImageRgba32F(buf) => float_all_zero(buf.as_raw())?,
        other => other.as_bytes().iter().all(|&v| v == 0),
    };

    if all_zero {
        return Err(PipelineError::Validation("all pixel values are zero".into()));
    }
    Ok(())
}

fn float_all_zero(samples: &[f32]) -> Result<bool> {
    if samples.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Validation("contains NaN or infinite values".into()));
    }
    Ok(samples.iter().all(|&v| v == 0.0))
}
