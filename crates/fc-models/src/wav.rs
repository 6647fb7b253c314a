use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::info;

use fc_core::Result;
use fc_core::stages::{AudioSpec, AudioTranscoder};

/// Pure-Rust transcoder for WAV input. Downmixes, linearly resamples and
/// writes 16-bit PCM. Use it when the TTS engine already emits WAV and
/// ffmpeg is not installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeWavTranscoder;

impl AudioTranscoder for NativeWavTranscoder {
    fn transcode(&self, input: &Path, output: &Path, spec: AudioSpec) -> Result<()> {
        let mut reader = WavReader::open(input)?;
        let source = reader.spec();
        let frames = deinterleave(&read_samples(&mut reader)?, source.channels);

        let mixed = remix(&frames, spec.channels);
        let resampled = resample(&mixed, source.sample_rate, spec.sample_rate);

        let mut writer = WavWriter::create(
            output,
            WavSpec {
                channels: spec.channels,
                sample_rate: spec.sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
        )?;
        for frame in &resampled {
            for &sample in frame {
                writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
            }
        }
        writer.finalize()?;

        info!(
            "Converted {} ({} Hz / {} ch) to {}",
            input.display(),
            source.sample_rate,
            source.channels,
            spec
        );
        Ok(())
    }
}

/// All samples normalized to [-1, 1].
fn read_samples<R: std::io::Read>(reader: &mut WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok(samples)
}

fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    samples
        .chunks_exact(channels.max(1) as usize)
        .map(<[f32]>::to_vec)
        .collect()
}

/// Mono target averages every channel; otherwise channels are repeated or
/// dropped to fit.
fn remix(frames: &[Vec<f32>], channels: u16) -> Vec<Vec<f32>> {
    let channels = channels.max(1) as usize;
    frames
        .iter()
        .map(|frame| {
            if channels == 1 {
                vec![frame.iter().sum::<f32>() / frame.len().max(1) as f32]
            } else {
                (0..channels)
                    .map(|c| frame.get(c).or(frame.last()).copied().unwrap_or(0.0))
                    .collect()
            }
        })
        .collect()
}

fn resample(frames: &[Vec<f32>], from: u32, to: u32) -> Vec<Vec<f32>> {
    if from == to || frames.is_empty() {
        return frames.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let out_len = ((frames.len() as f64) / ratio).round() as usize;
    let last = frames.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let left = (pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let t = (pos - left as f64) as f32;
            frames[left]
                .iter()
                .zip(&frames[right])
                .map(|(a, b)| a + (b - a) * t)
                .collect()
        })
        .collect()
}
