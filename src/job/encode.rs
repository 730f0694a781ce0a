use super::{Action, ENCODE_KIND, FailureJob, Job, JobKind, VideoJob};
use crate::app_state::AppState;
use crate::encoder;
use anyhow::anyhow;
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::info;

/// Writes generated frames out as `{id}.mp4` plus a JPEG thumbnail of the first frame.
#[derive(Clone)]
pub struct EncodeJob {
    pub id: String,
    pub fps: u32,
    pub frames: Arc<Vec<RgbImage>>,
}

impl fmt::Debug for EncodeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeJob")
            .field("id", &self.id)
            .field("fps", &self.fps)
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl EncodeJob {
    pub fn new(id: String, fps: u32, frames: Vec<RgbImage>) -> Self {
        Self {
            id,
            fps,
            frames: Arc::new(frames),
        }
    }
}

impl Job for EncodeJob {
    fn kind(&self) -> JobKind {
        ENCODE_KIND
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<Option<VideoJob>>> {
        let job = self.clone();
        let video_path = state.video_path(&self.id);
        let thumbnail_path = state.thumbnail_path(&self.id);

        tokio::task::spawn_blocking(move || {
            let first = job
                .frames
                .first()
                .ok_or_else(|| anyhow!("No frames to encode"))?;

            encoder::save_frames_as_video(&job.id, &job.frames, &video_path, job.fps)?;
            encoder::save_thumbnail(&job.id, first, &thumbnail_path)?;

            info!(job_id = %job.id, ?video_path, "Video saved");
            Ok(None)
        })
    }

    fn on_final_failure(&self) -> FailureJob {
        FailureJob::new(
            self.id.clone(),
            ENCODE_KIND,
            vec![
                Action::Cleanup,
                Action::Webhook {
                    message: "Video encoding failed".to_string(),
                },
            ],
        )
    }
}
