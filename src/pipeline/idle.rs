use super::{Device, PipelineError, SamplingParams, VideoPipeline};
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use tracing::debug;

/// Zoom amplitude of the default preset, as a fraction of the frame.
const BASE_ZOOM: f32 = 0.04;
/// Motion bucket the amplitudes are calibrated against.
const REFERENCE_BUCKET: f32 = 127.0;

/// CPU-only idle animation: a slow breathing zoom with a slight sway.
///
/// No model weights are involved; this keeps the service usable on machines
/// without a model worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdlePipeline;

impl VideoPipeline for IdlePipeline {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn generate(
        &self,
        image: &RgbImage,
        params: &SamplingParams,
    ) -> Result<Vec<RgbImage>, PipelineError> {
        if params.num_frames == 0 {
            return Err(PipelineError::EmptyOutput);
        }

        let (width, height) = image.dimensions();
        let seed = params.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let phase = rng.random_range(0.0..TAU);

        let intensity = params.motion_bucket_id as f32 / REFERENCE_BUCKET;
        let zoom = BASE_ZOOM * intensity;
        let sway = params.noise_aug_strength * width as f32;
        debug!(seed, zoom, sway, frames = params.num_frames, "Rendering idle animation");

        let frames = (0..params.num_frames)
            .map(|index| {
                let t = index as f32 / params.num_frames as f32;
                let breath = (1.0 - (TAU * t + phase).cos()) / 2.0;
                let scale = 1.0 + zoom * breath;

                let crop_w = ((width as f32 / scale).round() as u32).clamp(1, width);
                let crop_h = ((height as f32 / scale).round() as u32).clamp(1, height);
                let max_x = width - crop_w;
                let max_y = height - crop_h;

                let offset = sway * (TAU * t + phase).sin();
                let x = ((max_x as f32 / 2.0 + offset).round().max(0.0) as u32).min(max_x);
                let y = max_y / 2;

                let crop = imageops::crop_imm(image, x, y, crop_w, crop_h).to_image();
                imageops::resize(&crop, width, height, FilterType::Triangle)
            })
            .collect();

        Ok(frames)
    }
}
