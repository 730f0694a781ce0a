pub mod idle;
pub mod remote;

use crate::Config;
use crate::api::params::VideoRequest;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub use idle::IdlePipeline;
pub use remote::RemotePipeline;

/// Named parameter bundle controlling motion intensity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionPreset {
    Default,
    Subtle,
    Dynamic,
}

impl MotionPreset {
    /// Unknown names fall back to [`MotionPreset::Default`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "default" => MotionPreset::Default,
            "subtle" => MotionPreset::Subtle,
            "dynamic" => MotionPreset::Dynamic,
            other => {
                warn!(motion = other, "Unknown motion preset, using default");
                MotionPreset::Default
            }
        }
    }

    pub fn motion_bucket_id(&self) -> u32 {
        match self {
            MotionPreset::Default => 127,
            MotionPreset::Subtle => 100,
            MotionPreset::Dynamic => 150,
        }
    }

    pub fn noise_aug_strength(&self) -> f32 {
        match self {
            MotionPreset::Default => 0.02,
            MotionPreset::Subtle => 0.01,
            MotionPreset::Dynamic => 0.03,
        }
    }
}

/// Everything a pipeline needs to sample one clip.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SamplingParams {
    pub num_frames: u32,
    pub num_inference_steps: u32,
    pub motion_bucket_id: u32,
    pub noise_aug_strength: f32,
    pub seed: Option<u64>,
    pub fps: u32,
}

impl SamplingParams {
    pub fn new(request: &VideoRequest, num_inference_steps: u32) -> Self {
        let preset = MotionPreset::from_name(&request.motion);
        Self {
            num_frames: request.duration * request.fps,
            num_inference_steps,
            motion_bucket_id: preset.motion_bucket_id(),
            noise_aug_strength: preset.noise_aug_strength(),
            seed: request.seed,
            fps: request.fps,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    /// `auto` (or anything unrecognised) leaves the choice to the worker.
    pub fn from_preference(preference: &str) -> Option<Self> {
        match preference {
            "cuda" => Some(Device::Cuda),
            "cpu" => Some(Device::Cpu),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => f.write_str("cuda"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

/// Weight precision requested from the worker for a given device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Precision {
    pub dtype: &'static str,
    pub variant: Option<&'static str>,
}

impl Precision {
    pub fn for_device(device: Device) -> Self {
        match device {
            Device::Cuda => Precision {
                dtype: "float16",
                variant: Some("fp16"),
            },
            Device::Cpu => Precision {
                dtype: "float32",
                variant: None,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model worker returned {status}: {message}")]
    Worker { status: u16, message: String },

    #[error("invalid frame encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("pipeline produced no frames")]
    EmptyOutput,
}

/// A pretrained image-to-video pipeline.
///
/// `generate` is blocking and is always called from the blocking thread pool.
pub trait VideoPipeline: Send + Sync {
    fn device(&self) -> Device;

    fn generate(
        &self,
        image: &RgbImage,
        params: &SamplingParams,
    ) -> Result<Vec<RgbImage>, PipelineError>;
}

/// Build the configured pipeline. Load errors are logged and leave the model unset.
pub async fn load(config: &Config) -> Option<Arc<dyn VideoPipeline>> {
    if config.backend == "idle" {
        info!("Using idle animation pipeline");
        return Some(Arc::new(IdlePipeline));
    }

    let Some(endpoint) = config.model_endpoint.clone() else {
        error!("No model endpoint configured");
        return fallback(config);
    };
    let model_path = config.model_path.clone();
    let device = Device::from_preference(&config.device);
    let timeout = Duration::from_secs(config.model_timeout_secs);

    info!(%endpoint, %model_path, device = %config.device, "Loading model");
    let loaded = tokio::task::spawn_blocking(move || {
        RemotePipeline::from_pretrained(&endpoint, &model_path, device, timeout)
    })
    .await;

    match loaded {
        Ok(Ok(pipeline)) => {
            info!(device = %pipeline.device(), "Model loaded");
            Some(Arc::new(pipeline))
        }
        Ok(Err(error)) => {
            error!(%error, "Failed to load model");
            fallback(config)
        }
        Err(error) => {
            error!(%error, "Model loading task failed");
            fallback(config)
        }
    }
}

fn fallback(config: &Config) -> Option<Arc<dyn VideoPipeline>> {
    if config.fallback_to_idle {
        warn!("Falling back to idle animation pipeline");
        Some(Arc::new(IdlePipeline))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(motion: &str, duration: u32, fps: u32) -> VideoRequest {
        VideoRequest {
            image_url: "data:image/png;base64,AAAA".to_string(),
            motion: motion.to_string(),
            duration,
            fps,
            seed: Some(42),
        }
    }

    #[test]
    fn test_motion_presets() {
        assert_eq!(MotionPreset::from_name("default").motion_bucket_id(), 127);
        assert_eq!(MotionPreset::from_name("subtle").motion_bucket_id(), 100);
        assert_eq!(MotionPreset::from_name("dynamic").motion_bucket_id(), 150);
        assert_eq!(MotionPreset::from_name("subtle").noise_aug_strength(), 0.01);
        assert_eq!(MotionPreset::from_name("dynamic").noise_aug_strength(), 0.03);
    }

    #[test]
    fn test_unknown_motion_falls_back_to_default() {
        assert_eq!(MotionPreset::from_name("waving"), MotionPreset::Default);
        assert_eq!(MotionPreset::from_name(""), MotionPreset::Default);
    }

    #[test]
    fn test_sampling_params_from_request() {
        let params = SamplingParams::new(&request("dynamic", 4, 8), 25);
        assert_eq!(params.num_frames, 32);
        assert_eq!(params.num_inference_steps, 25);
        assert_eq!(params.motion_bucket_id, 150);
        assert_eq!(params.noise_aug_strength, 0.03);
        assert_eq!(params.seed, Some(42));
        assert_eq!(params.fps, 8);
    }

    #[test]
    fn test_precision_per_device() {
        let cuda = Precision::for_device(Device::Cuda);
        assert_eq!(cuda.dtype, "float16");
        assert_eq!(cuda.variant, Some("fp16"));

        let cpu = Precision::for_device(Device::Cpu);
        assert_eq!(cpu.dtype, "float32");
        assert_eq!(cpu.variant, None);
    }

    #[test]
    fn test_device_preference() {
        assert_eq!(Device::from_preference("cuda"), Some(Device::Cuda));
        assert_eq!(Device::from_preference("cpu"), Some(Device::Cpu));
        assert_eq!(Device::from_preference("auto"), None);
        assert_eq!(Device::Cuda.to_string(), "cuda");
    }

    #[tokio::test]
    async fn test_load_idle_backend() {
        let config = Config {
            backend: "idle".to_string(),
            ..Default::default()
        };
        let pipeline = load(&config).await.expect("idle pipeline");
        assert_eq!(pipeline.device(), Device::Cpu);
    }

    #[tokio::test]
    async fn test_load_without_endpoint_leaves_model_unset() {
        let config = Config::default();
        assert!(config.model_endpoint.is_none());
        assert!(load(&config).await.is_none());
    }

    #[tokio::test]
    async fn test_load_unreachable_worker_leaves_model_unset() {
        let port = portpicker::pick_unused_port().expect("No available port");
        let config = Config {
            model_endpoint: Some(format!("http://127.0.0.1:{port}")),
            model_timeout_secs: 2,
            ..Default::default()
        };
        assert!(load(&config).await.is_none());

        let config = Config {
            fallback_to_idle: true,
            ..config
        };
        assert!(load(&config).await.is_some());
    }
}
