use crate::job::{JobRecord, JobStatus};
use serde::{Deserialize, Serialize};

/// Body of `POST /generate`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoRequest {
    /// `data:<mime>;base64,<payload>` or an `http(s)://` URL
    pub image_url: String,
    #[serde(default = "default_motion")]
    pub motion: String,
    /// Seconds
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_motion() -> String {
    "default".to_string()
}

fn default_duration() -> u32 {
    4
}

fn default_fps() -> u32 {
    8
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoResponse {
    pub video_id: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration: u32,
    pub status: String,
}

impl VideoResponse {
    pub fn processing(video_id: String, duration: u32) -> Self {
        Self {
            video_url: video_url(&video_id),
            thumbnail_url: thumbnail_url(&video_id),
            video_id,
            duration,
            status: "processing".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub device: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub video_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub video_url: String,
    pub thumbnail_url: String,
    pub submitted_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl JobStatusResponse {
    pub fn new(video_id: String, record: JobRecord) -> Self {
        Self {
            video_url: video_url(&video_id),
            thumbnail_url: thumbnail_url(&video_id),
            video_id,
            status: record.status,
            error: record.error,
            submitted_at: record.submitted_at.to_rfc3339(),
            finished_at: record.finished_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WaitlistResponse {
    pub processing_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

pub fn video_url(video_id: &str) -> String {
    format!("/videos/{video_id}.mp4")
}

pub fn thumbnail_url(video_id: &str) -> String {
    format!("/videos/{video_id}_thumb.jpg")
}
