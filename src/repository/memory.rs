//! In-memory job store for tests and `--no-persist` style runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::job_store::{ensure_open, JobStore, StoreError};
use crate::models::{AnalysisJob, JobStatus, StageResult};

#[derive(Debug)]
struct Entry {
    job: AnalysisJob,
    results: Vec<StageResult>,
}

/// Job store backed by a shared map. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job as-is. Used to seed partially processed jobs.
    pub async fn insert_job(&self, job: AnalysisJob) {
        self.jobs.write().await.insert(
            job.id.clone(),
            Entry {
                job,
                results: Vec::new(),
            },
        );
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job_with_id(
        &self,
        id: &str,
        identity: &str,
        total_stages: usize,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        jobs.insert(
            id.to_string(),
            Entry {
                job: AnalysisJob::with_id(id, identity, total_stages),
                results: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.jobs.read().await.get(id).map(|e| e.job.clone()))
    }

    async fn save_stage_result(&self, id: &str, result: &StageResult) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        ensure_open(&entry.job)?;
        if entry
            .results
            .iter()
            .any(|r| r.stage_index == result.stage_index)
        {
            return Err(StoreError::DuplicateStage {
                job_id: id.to_string(),
                stage_index: result.stage_index,
            });
        }
        entry.results.push(result.clone());
        entry.results.sort_by_key(|r| r.stage_index);
        Ok(())
    }

    async fn increment_processed_stages(&self, id: &str) -> Result<usize, StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        ensure_open(&entry.job)?;
        entry.job.processed_stages += 1;
        entry.job.updated_at = Utc::now();
        Ok(entry.job.processed_stages)
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        ensure_open(&entry.job)?;
        entry.job.status = status;
        entry.job.error_message = error.map(str::to_string);
        entry.job.updated_at = Utc::now();
        Ok(())
    }

    async fn stage_results(&self, id: &str) -> Result<Vec<StageResult>, StoreError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(entry.results.clone())
    }

    async fn list_jobs(
        &self,
        identity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<AnalysisJob> = jobs
            .values()
            .map(|e| e.job.clone())
            .filter(|j| identity.map_or(true, |i| j.identity == i))
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        list.truncate(limit);
        Ok(list)
    }
}
