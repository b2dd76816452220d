//! Diesel-based job store for SQLite.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async interface
//! while keeping Diesel's compile-time query checking.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::job_store::{ensure_open, JobStore, StoreError};
use super::migrations::run_migrations;
use super::models::{JobRecord, NewJob, NewStageResult, StageResultRecord};
use super::pool::SqlitePool;
use super::util::{is_unique_violation, parse_datetime};
use crate::models::{AnalysisJob, JobStatus, StagePayload, StageResult, StageStatus};
use crate::schema::{analysis_jobs, analysis_stage_results};

impl From<JobRecord> for AnalysisJob {
    fn from(record: JobRecord) -> Self {
        AnalysisJob {
            id: record.id,
            identity: record.identity,
            total_stages: record.total_stages.max(0) as usize,
            processed_stages: record.processed_stages.max(0) as usize,
            status: JobStatus::from_str(&record.status).unwrap_or(JobStatus::Failed),
            error_message: record.error_message,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

impl TryFrom<StageResultRecord> for StageResult {
    type Error = StoreError;

    fn try_from(record: StageResultRecord) -> Result<Self, Self::Error> {
        let payload = record
            .payload
            .as_deref()
            .map(serde_json::from_str::<StagePayload>)
            .transpose()?;
        Ok(StageResult {
            stage_index: record.stage_index.max(0) as usize,
            item_count: record.item_count.max(0) as usize,
            status: StageStatus::from_str(&record.status).unwrap_or(StageStatus::Failed),
            payload,
            error: record.error,
            created_at: parse_datetime(&record.created_at),
        })
    }
}

/// SQLite-backed [`JobStore`].
#[derive(Clone)]
pub struct DieselJobStore {
    pool: SqlitePool,
}

impl DieselJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database, applying pending migrations first.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        run_migrations(database_url).await?;
        Ok(Self::new(SqlitePool::new(database_url)))
    }

    async fn require_open_job(&self, id: &str) -> Result<AnalysisJob, StoreError> {
        let job = self
            .get_job(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        ensure_open(&job)?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for DieselJobStore {
    async fn create_job_with_id(
        &self,
        id: &str,
        identity: &str,
        total_stages: usize,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let job = AnalysisJob::with_id(id, identity, total_stages);
        let created_at = job.created_at.to_rfc3339();

        diesel::insert_into(analysis_jobs::table)
            .values(&NewJob {
                id: &job.id,
                identity: &job.identity,
                total_stages: total_stages as i32,
                processed_stages: 0,
                status: job.status.as_str(),
                error_message: None,
                created_at: &created_at,
                updated_at: &created_at,
            })
            .execute(&mut conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists(id.to_string())
                } else {
                    StoreError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>, StoreError> {
        let mut conn = self.pool.get().await?;

        let record = analysis_jobs::table
            .find(id)
            .select(JobRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(record.map(AnalysisJob::from))
    }

    async fn save_stage_result(&self, id: &str, result: &StageResult) -> Result<(), StoreError> {
        self.require_open_job(id).await?;
        let duplicate = || StoreError::DuplicateStage {
            job_id: id.to_string(),
            stage_index: result.stage_index,
        };

        let mut conn = self.pool.get().await?;
        let stage_index = result.stage_index as i32;

        use diesel::dsl::count_star;
        let existing: i64 = analysis_stage_results::table
            .filter(analysis_stage_results::job_id.eq(id))
            .filter(analysis_stage_results::stage_index.eq(stage_index))
            .select(count_star())
            .first(&mut conn)
            .await?;
        if existing > 0 {
            return Err(duplicate());
        }

        let payload = result
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let created_at = result.created_at.to_rfc3339();

        diesel::insert_into(analysis_stage_results::table)
            .values(&NewStageResult {
                job_id: id,
                stage_index,
                item_count: result.item_count as i32,
                status: result.status.as_str(),
                payload: payload.as_deref(),
                error: result.error.as_deref(),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    duplicate()
                } else {
                    StoreError::Database(e)
                }
            })?;

        Ok(())
    }

    async fn increment_processed_stages(&self, id: &str) -> Result<usize, StoreError> {
        self.require_open_job(id).await?;
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(analysis_jobs::table.find(id))
            .set((
                analysis_jobs::processed_stages.eq(analysis_jobs::processed_stages + 1),
                analysis_jobs::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        let processed: i32 = analysis_jobs::table
            .find(id)
            .select(analysis_jobs::processed_stages)
            .first(&mut conn)
            .await?;
        Ok(processed.max(0) as usize)
    }

    async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.require_open_job(id).await?;
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(analysis_jobs::table.find(id))
            .set((
                analysis_jobs::status.eq(status.as_str()),
                analysis_jobs::error_message.eq(error),
                analysis_jobs::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn stage_results(&self, id: &str) -> Result<Vec<StageResult>, StoreError> {
        let mut conn = self.pool.get().await?;

        let records = analysis_stage_results::table
            .filter(analysis_stage_results::job_id.eq(id))
            .order(analysis_stage_results::stage_index.asc())
            .select(StageResultRecord::as_select())
            .load(&mut conn)
            .await?;

        records.into_iter().map(StageResult::try_from).collect()
    }

    async fn list_jobs(
        &self,
        identity: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let mut conn = self.pool.get().await?;

        let mut query = analysis_jobs::table
            .select(JobRecord::as_select())
            .order(analysis_jobs::updated_at.desc())
            .limit(limit as i64)
            .into_boxed::<diesel::sqlite::Sqlite>();
        if let Some(identity) = identity {
            query = query.filter(analysis_jobs::identity.eq(identity));
        }

        let records = query.load(&mut conn).await?;
        Ok(records.into_iter().map(AnalysisJob::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStage, FieldName, PersonalityRecord};
    use tempfile::tempdir;

    async fn setup_store() -> (DieselJobStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        let store = DieselJobStore::open(&db_path.display().to_string())
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (store, _dir) = setup_store().await;
        let id = store.create_job("ada", 6).await.unwrap();

        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.identity, "ada");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_stages, 6);

        store
            .update_status(&id, JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(store.increment_processed_stages(&id).await.unwrap(), 1);
        assert_eq!(store.increment_processed_stages(&id).await.unwrap(), 2);

        store
            .update_status(&id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let job = store.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(matches!(
            store.increment_processed_stages(&id).await,
            Err(StoreError::JobClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_stage_results_round_trip_in_order() {
        let (store, _dir) = setup_store().await;
        let id = store.create_job("ada", 6).await.unwrap();

        let mut record = PersonalityRecord::safe_default();
        record.interests = vec!["Chess".to_string()];
        let completed = StageResult::completed(
            AnalysisStage::Interests,
            12,
            StagePayload {
                record,
                fields: vec![FieldName::Interests],
            },
        );
        let failed = StageResult::failed(AnalysisStage::BasicInfo, 12, "missing summary");

        store.save_stage_result(&id, &completed).await.unwrap();
        store.save_stage_result(&id, &failed).await.unwrap();
        assert!(matches!(
            store.save_stage_result(&id, &failed).await,
            Err(StoreError::DuplicateStage { stage_index: 1, .. })
        ));

        let results = store.stage_results(&id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].stage(), Some(AnalysisStage::BasicInfo));
        assert_eq!(results[0].status, StageStatus::Failed);
        let payload = results[1].payload.as_ref().unwrap();
        assert_eq!(payload.record.interests, vec!["Chess"]);
    }

    #[tokio::test]
    async fn test_create_job_with_taken_id() {
        let (store, _dir) = setup_store().await;
        store.create_job_with_id("item-1", "ada", 6).await.unwrap();
        assert!(matches!(
            store.create_job_with_id("item-1", "grace", 6).await,
            Err(StoreError::AlreadyExists(_))
        ));
        let job = store.get_job("item-1").await.unwrap().unwrap();
        assert_eq!(job.identity, "ada");
    }

    #[tokio::test]
    async fn test_list_jobs_filters_identity() {
        let (store, _dir) = setup_store().await;
        store.create_job("ada", 6).await.unwrap();
        store.create_job("grace", 6).await.unwrap();
        store.create_job("ada", 6).await.unwrap();

        assert_eq!(store.list_jobs(None, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_jobs(Some("ada"), 10).await.unwrap().len(), 2);
        assert_eq!(store.list_jobs(None, 1).await.unwrap().len(), 1);
    }
}
