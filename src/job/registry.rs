use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRecord {
    pub status: JobStatus,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory record of submitted jobs and their outcome.
///
/// Processing jobs are always kept; once more than `history` jobs have
/// finished, the oldest finished records are dropped.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    history: usize,
    jobs: Arc<TokioMutex<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            history,
            jobs: Arc::new(TokioMutex::new(HashMap::new())),
        }
    }

    /// Registers a freshly submitted job. Returns `false` if the id is already known.
    pub async fn add(&self, id: &str) -> bool {
        debug!(id, "Adding job");
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(id) {
            warn!(id, "Job already registered");
            return false;
        }

        jobs.insert(
            id.to_string(),
            JobRecord {
                status: JobStatus::Processing,
                error: None,
                submitted_at: Utc::now(),
                finished_at: None,
            },
        );
        true
    }

    pub async fn complete(&self, id: &str) {
        self.finish(id, JobStatus::Completed, None).await;
    }

    pub async fn fail(&self, id: &str, error: String) {
        self.finish(id, JobStatus::Failed, Some(error)).await;
    }

    pub async fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.lock().await.get(id).cloned()
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.lock().await;
        jobs.values()
            .fold(JobCounts::default(), |mut counts, record| {
                match record.status {
                    JobStatus::Processing => counts.processing += 1,
                    JobStatus::Completed => counts.completed += 1,
                    JobStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }

    async fn finish(&self, id: &str, status: JobStatus, error: Option<String>) {
        debug!(id, ?status, "Finishing job");
        let mut jobs = self.jobs.lock().await;
        let Some(record) = jobs.get_mut(id) else {
            warn!(id, ?status, "Finished job was never registered");
            return;
        };

        record.status = status;
        record.error = error;
        record.finished_at = Some(Utc::now());

        Self::evict_finished(&mut jobs, self.history);
    }

    fn evict_finished(jobs: &mut HashMap<String, JobRecord>, history: usize) {
        let mut finished = jobs
            .iter()
            .filter_map(|(id, record)| record.finished_at.map(|at| (at, id.clone())))
            .collect::<Vec<_>>();
        if finished.len() <= history {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - history;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(id, "Evicting finished job record");
            jobs.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_transitions() {
        let registry = JobRegistry::new(10);
        assert!(registry.add("a").await);
        assert!(!registry.add("a").await);
        assert_eq!(
            registry.get("a").await.unwrap().status,
            JobStatus::Processing
        );

        registry.complete("a").await;
        let record = registry.get("a").await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.finished_at.is_some());
        assert!(record.error.is_none());

        registry.add("b").await;
        registry.fail("b", "model exploded".to_string()).await;
        let record = registry.get("b").await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model exploded"));

        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_counts() {
        let registry = JobRegistry::new(10);
        registry.add("a").await;
        registry.add("b").await;
        registry.add("c").await;
        registry.complete("a").await;
        registry.fail("b", "error".to_string()).await;

        assert_eq!(
            registry.counts().await,
            JobCounts {
                processing: 1,
                completed: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_evicts_oldest_finished_only() {
        let registry = JobRegistry::new(2);
        registry.add("running").await;
        for id in ["first", "second", "third"] {
            registry.add(id).await;
            registry.complete(id).await;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        assert!(registry.get("first").await.is_none());
        assert!(registry.get("second").await.is_some());
        assert!(registry.get("third").await.is_some());
        assert!(registry.get("running").await.is_some());
    }
}
