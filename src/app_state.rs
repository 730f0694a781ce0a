use crate::StreamMap;
use crate::config::Config;
use crate::job::{ENCODE_KIND, Job, JobRegistry, JobResult, VideoJob};
use crate::pipeline::VideoPipeline;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub job_tx: UnboundedSender<VideoJob>,
    pub jobs: JobRegistry,
    /// `None` when the model failed to load; generation is refused with 503.
    pub pipeline: Option<Arc<dyn VideoPipeline>>,
    pub http_client: reqwest::Client,

    pub output_dir: PathBuf,
    pub inference_steps: u32,
    pub image_size: u32,
    pub max_frames: u32,
    pub max_image_bytes: usize,
    pub webhook_url: Option<String>,
}

impl AppState {
    pub async fn new(
        config: &Config,
        pipeline: Option<Arc<dyn VideoPipeline>>,
    ) -> anyhow::Result<Self> {
        let output_dir = PathBuf::from(&config.output_dir);
        tokio::fs::create_dir_all(&output_dir).await?;
        let (tx, rx) = unbounded();

        // Bounds source image downloads, which run while holding a worker permit
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()?;

        let this = Self {
            job_tx: tx,
            jobs: JobRegistry::new(config.job_history),
            pipeline,
            http_client,

            output_dir,
            inference_steps: config.inference_steps,
            image_size: config.image_size,
            max_frames: config.max_frames,
            max_image_bytes: config.max_image_bytes,
            webhook_url: config.webhook_url.clone(),
        };

        this.handle_jobs(rx, config.workers);
        Ok(this)
    }

    pub fn model_loaded(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Device the model runs on, or `"none"` when no model is loaded.
    pub fn device(&self) -> String {
        self.pipeline
            .as_ref()
            .map(|pipeline| pipeline.device().to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_path()
    }

    pub fn video_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{job_id}.mp4"))
    }

    pub fn thumbnail_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(format!("{job_id}_thumb.jpg"))
    }

    pub async fn call_webhook(
        &self,
        job_id: &str,
        job_type: &str,
        status: &str,
        error: Option<&str>,
    ) {
        if let Some(webhook_url) = &self.webhook_url {
            let mut payload = json!({
                "job_id": job_id,
                "job_type": job_type,
                "status": status,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            });
            if status == "completed" {
                payload["video_url"] = json!(format!("/videos/{job_id}.mp4"));
                payload["thumbnail_url"] = json!(format!("/videos/{job_id}_thumb.jpg"));
            }
            if let Some(error) = error {
                payload["error"] = json!(error);
            }

            match self
                .http_client
                .post(webhook_url)
                .json(&payload)
                .timeout(std::time::Duration::from_secs(10))
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        info!(job_id, webhook_url, "Webhook called successfully");
                    } else {
                        warn!(
                            job_id,
                            webhook_url,
                            status = %response.status(),
                            "Webhook returned non-success status"
                        );
                    }
                }
                Err(err) => {
                    error!(job_id, webhook_url, ?err, "Failed to call webhook");
                }
            }
        }
    }

    fn handle_jobs(&self, rx: UnboundedReceiver<VideoJob>, permits: usize) {
        info!(permits, "Job handler started");
        let this = self.clone();
        let semaphore = Arc::new(Semaphore::new(permits));

        tokio::spawn(async move {
            let rx = std::pin::pin!(rx);
            let mut rx = rx.fuse();

            let mut jobs: StreamMap<'_, String, JobResult> = StreamMap::default();

            loop {
                debug!(in_flight = jobs.len(), "Waiting for job");
                futures::select! {
                    maybe_job = rx.next() => {
                        let Some(job) = maybe_job else {
                            debug!("Job channel closed");
                            break;
                        };

                        let kind = job.kind();
                        let job_id = job.id().to_string();

                        let this_c = this.clone();
                        let semaphore_c = semaphore.clone();
                        let task = async move { job.gen_task(this_c, semaphore_c).await };
                        if !jobs.add_if_not_in_progress(job_id.clone(), Box::pin(task)) {
                            warn!("Job {job_id} already in-progress, skipping");
                            continue;
                        }

                        info!(job_id, kind, "Job added to processing queue");
                    }
                    (id, result) = jobs.select_next_some() => {
                        match result {
                            JobResult::Done => {
                                info!(id, "Job completed successfully");
                                this.jobs.complete(&id).await;
                                let this_c = this.clone();
                                tokio::spawn(async move {
                                    this_c.call_webhook(&id, ENCODE_KIND, "completed", None).await;
                                });
                            },
                            JobResult::Next(next_job) => {
                                let kind = next_job.kind();
                                info!(id, kind, "NextJob added to processing queue");
                                _ = this.job_tx.unbounded_send(next_job);
                            },
                            JobResult::Err(failure_job) => {
                                info!(id, "Job failed with failure handling");
                                failure_job.mark_failed(&this).await;
                                let this_c = this.clone();
                                tokio::spawn(async move {
                                    failure_job.execute_actions(&this_c).await;
                                });
                            },
                        }
                    }
                }
            }

            debug!("Job handler finished");
        });
    }
}
