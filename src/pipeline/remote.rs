use super::{Device, PipelineError, Precision, SamplingParams, VideoPipeline};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, RgbImage};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Serialize)]
struct LoadRequest<'a> {
    model_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dtype: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    variant: Option<&'static str>,
}

#[derive(Deserialize)]
struct LoadResponse {
    device: Device,
}

#[derive(Serialize)]
struct InferRequest<'a> {
    /// Base64 encoded PNG
    image: String,
    width: u32,
    height: u32,
    #[serde(flatten)]
    params: &'a SamplingParams,
}

#[derive(Deserialize)]
struct InferResponse {
    /// Base64 encoded PNG frames, in order
    frames: Vec<String>,
}

/// Pipeline served by a model worker process that holds the pretrained weights.
pub struct RemotePipeline {
    client: Client,
    endpoint: String,
    device: Device,
}

impl RemotePipeline {
    /// Ask the worker to load `model_path` and keep a handle to it.
    pub fn from_pretrained(
        endpoint: &str,
        model_path: &str,
        device: Option<Device>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(timeout).build()?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let precision = device.map(Precision::for_device);

        let request = LoadRequest {
            model_path,
            device,
            dtype: precision.map(|p| p.dtype),
            variant: precision.and_then(|p| p.variant),
        };

        let response = client
            .post(format!("{endpoint}/load"))
            .json(&request)
            .send()?;
        let loaded: LoadResponse = check_status(response)?.json()?;
        info!(%endpoint, model_path, device = %loaded.device, "Model worker ready");

        Ok(Self {
            client,
            endpoint,
            device: loaded.device,
        })
    }
}

impl VideoPipeline for RemotePipeline {
    fn device(&self) -> Device {
        self.device
    }

    fn generate(
        &self,
        image: &RgbImage,
        params: &SamplingParams,
    ) -> Result<Vec<RgbImage>, PipelineError> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let request = InferRequest {
            image: STANDARD.encode(&png),
            width: image.width(),
            height: image.height(),
            params,
        };
        debug!(
            endpoint = %self.endpoint,
            num_frames = params.num_frames,
            steps = params.num_inference_steps,
            "Sending inference request"
        );

        let response = self
            .client
            .post(format!("{}/infer", self.endpoint))
            .json(&request)
            .send()?;
        let output: InferResponse = check_status(response)?.json()?;

        if output.frames.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }

        output
            .frames
            .iter()
            .map(|frame| {
                let bytes = STANDARD.decode(frame)?;
                Ok(image::load_from_memory(&bytes)?.to_rgb8())
            })
            .collect()
    }
}

fn check_status(response: Response) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    Err(PipelineError::Worker {
        status: status.as_u16(),
        message,
    })
}
