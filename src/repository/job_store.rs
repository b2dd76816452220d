//! Job store contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AnalysisJob, JobStatus, StageResult};

/// Errors returned by job stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {id} is {status} and no longer accepts writes")]
    JobClosed { id: String, status: JobStatus },

    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("stage {stage_index} of job {job_id} is already recorded")]
    DuplicateStage { job_id: String, stage_index: usize },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Durable job and stage-result storage.
///
/// Closed jobs (completed or failed) reject every further write with
/// [`StoreError::JobClosed`]. Each (job, stage) pair may be recorded once.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a pending job and return its id.
    async fn create_job(&self, identity: &str, total_stages: usize) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_job_with_id(&id, identity, total_stages).await?;
        Ok(id)
    }

    /// Create a pending job under `id`. Fails with
    /// [`StoreError::AlreadyExists`] if the id is taken.
    async fn create_job_with_id(
        &self,
        id: &str,
        identity: &str,
        total_stages: usize,
    ) -> Result<(), StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError>;

    async fn save_stage_result(&self, id: &str, result: &StageResult) -> Result<(), StoreError>;

    /// Increment the processed-stage count. Returns the new count.
    async fn increment_processed_stages(&self, id: &str) -> Result<usize, StoreError>;

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Persisted stage results ordered by stage index.
    async fn stage_results(&self, id: &str) -> Result<Vec<StageResult>, StoreError>;

    /// Most recently updated jobs first.
    async fn list_jobs(
        &self,
        identity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError>;
}

/// Reject writes to closed jobs.
pub(crate) fn ensure_open(job: &AnalysisJob) -> Result<(), StoreError> {
    if job.status.is_closed() {
        return Err(StoreError::JobClosed {
            id: job.id.clone(),
            status: job.status,
        });
    }
    Ok(())
}
