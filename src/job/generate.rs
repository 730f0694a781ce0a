use super::{Action, EncodeJob, FailureJob, GENERATE_KIND, Job, JobKind, VideoJob};
use crate::app_state::AppState;
use crate::pipeline::SamplingParams;
use crate::source::{self, ImageSource};
use anyhow::{Context as _, anyhow};
use std::sync::Arc;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, info};

/// Fetches the source image and runs the diffusion pipeline on it.
///
/// Holds one worker permit for the whole run; the frames are handed to an
/// [`EncodeJob`].
#[derive(Clone, Debug)]
pub struct GenerateJob {
    pub id: String,
    pub source: Arc<ImageSource>,
    pub params: SamplingParams,
}

impl GenerateJob {
    pub fn new(id: String, source: ImageSource, params: SamplingParams) -> Self {
        Self {
            id,
            source: Arc::new(source),
            params,
        }
    }
}

impl Job for GenerateJob {
    fn kind(&self) -> JobKind {
        GENERATE_KIND
    }

    fn need_permit(&self) -> u32 {
        1
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<Option<VideoJob>>> {
        let job = self.clone();
        tokio::spawn(async move {
            let pipeline = state
                .pipeline
                .clone()
                .ok_or_else(|| anyhow!("Model not loaded"))?;

            let image = job
                .source
                .fetch(&state.http_client, state.max_image_bytes)
                .await
                .context("Failed to load source image")?;
            debug!(job_id = %job.id, width = image.width(), height = image.height(), "Source image loaded");

            let image_size = state.image_size;
            let params = job.params.clone();
            let frames = tokio::task::spawn_blocking(move || {
                let image = source::prepare(image, image_size);
                pipeline.generate(&image, &params)
            })
            .await?
            .context("Video generation failed")?;

            info!(job_id = %job.id, frames = frames.len(), "Frames generated");
            Ok(Some(VideoJob::from(EncodeJob::new(
                job.id.clone(),
                job.params.fps,
                frames,
            ))))
        })
    }

    fn on_final_failure(&self) -> FailureJob {
        FailureJob::new(
            self.id.clone(),
            GENERATE_KIND,
            vec![Action::Webhook {
                message: "Video generation failed".to_string(),
            }],
        )
    }
}
