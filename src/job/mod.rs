pub mod encode;
pub mod generate;
pub mod registry;

use crate::app_state::AppState;
use std::{future::Future, sync::Arc};
use tokio::sync::Semaphore as TokioSemaphore;
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, error, info};

// Re-exports for convenience
pub use encode::EncodeJob;
pub use generate::GenerateJob;
pub use registry::{JobCounts, JobRecord, JobRegistry, JobStatus};

pub type JobKind = &'static str;
pub const GENERATE_KIND: JobKind = "generate";
pub const ENCODE_KIND: JobKind = "encode";

pub enum JobResult {
    Done,
    Next(VideoJob),
    Err(FailureJob),
}

impl From<Option<VideoJob>> for JobResult {
    fn from(job: Option<VideoJob>) -> Self {
        match job {
            Some(job) => JobResult::Next(job),
            None => JobResult::Done,
        }
    }
}

pub trait Job: Clone + Sized + Send + Sync + 'static {
    fn kind(&self) -> JobKind;

    /// Number of inference worker permits held while the job runs.
    fn need_permit(&self) -> u32 {
        0
    }

    fn id(&self) -> &str;

    /// Runs the job; a returned job is queued as the next stage.
    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<Option<VideoJob>>>;

    fn on_final_failure(&self) -> FailureJob;

    fn gen_task(
        &self,
        state: AppState,
        semaphore: Arc<TokioSemaphore>,
    ) -> impl Future<Output = JobResult> + Send {
        async move {
            let job_id = self.id().to_string();
            let kind = self.kind();
            debug!(job_id, kind, "job wait for permit");

            let needed_permits = self.need_permit();
            let _permit = if needed_permits > 0 {
                match semaphore.acquire_many(needed_permits).await {
                    Ok(permit) => Some(permit),
                    Err(error) => {
                        error!(?error, job_id, kind, "Worker pool closed");
                        return JobResult::Err(
                            self.on_final_failure().with_error(error.to_string()),
                        );
                    }
                }
            } else {
                None
            };

            info!(job_id, kind, "job started");

            let result = match self.gen_job(state).await {
                Ok(result) => result,
                Err(join_error) => Err(anyhow::Error::from(join_error)),
            };

            match result {
                Ok(next) => JobResult::from(next),
                Err(error) => {
                    error!(?error, job_id, kind, "Job final failure");
                    JobResult::Err(self.on_final_failure().with_error(format!("{error:#}")))
                }
            }
        }
    }
}

/// Every job the handler can run.
#[derive(Clone, Debug)]
pub enum VideoJob {
    Generate(GenerateJob),
    Encode(EncodeJob),
}

impl From<GenerateJob> for VideoJob {
    fn from(job: GenerateJob) -> Self {
        VideoJob::Generate(job)
    }
}

impl From<EncodeJob> for VideoJob {
    fn from(job: EncodeJob) -> Self {
        VideoJob::Encode(job)
    }
}

impl Job for VideoJob {
    fn kind(&self) -> JobKind {
        match self {
            VideoJob::Generate(job) => job.kind(),
            VideoJob::Encode(job) => job.kind(),
        }
    }

    fn need_permit(&self) -> u32 {
        match self {
            VideoJob::Generate(job) => job.need_permit(),
            VideoJob::Encode(job) => job.need_permit(),
        }
    }

    fn id(&self) -> &str {
        match self {
            VideoJob::Generate(job) => job.id(),
            VideoJob::Encode(job) => job.id(),
        }
    }

    fn gen_job(&self, state: AppState) -> TokioJoinHandle<anyhow::Result<Option<VideoJob>>> {
        match self {
            VideoJob::Generate(job) => job.gen_job(state),
            VideoJob::Encode(job) => job.gen_job(state),
        }
    }

    fn on_final_failure(&self) -> FailureJob {
        match self {
            VideoJob::Generate(job) => job.on_final_failure(),
            VideoJob::Encode(job) => job.on_final_failure(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Action {
    /// Remove partially written artifacts.
    Cleanup,
    Webhook { message: String },
}

impl Action {
    async fn execute_action(
        action: Action,
        state: &AppState,
        job_id: &str,
        kind: JobKind,
        error: &str,
    ) {
        match action {
            Action::Cleanup => {
                info!(job_id, kind, "Performing cleanup");
                let _ = tokio::fs::remove_file(state.video_path(job_id)).await;
                let _ = tokio::fs::remove_file(state.thumbnail_path(job_id)).await;
            }
            Action::Webhook { message } => {
                info!(job_id, kind, message, "Calling webhook");
                state
                    .call_webhook(job_id, kind, "failed", Some(error))
                    .await;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct FailureJob {
    pub job_id: String,
    pub kind: JobKind,
    pub error: String,
    pub actions: Vec<Action>,
}

impl FailureJob {
    pub fn new(job_id: String, kind: JobKind, actions: Vec<Action>) -> Self {
        Self {
            job_id,
            kind,
            error: String::new(),
            actions,
        }
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = error;
        self
    }

    pub async fn mark_failed(&self, state: &AppState) {
        state.jobs.fail(&self.job_id, self.error.clone()).await;
    }

    pub async fn execute_actions(self, state: &AppState) {
        for action in self.actions {
            Action::execute_action(action, state, &self.job_id, self.kind, &self.error).await;
        }
    }
}
