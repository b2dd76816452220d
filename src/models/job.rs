//! Persisted analysis jobs and their per-stage checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::personality::PersonalityRecord;
use super::stage::{AnalysisStage, FieldName};

/// Lifecycle status of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Closed jobs accept no further writes.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One profile's analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub identity: String,
    pub total_stages: usize,
    pub processed_stages: usize,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(identity: &str, total_stages: usize) -> Self {
        Self::with_id(&uuid::Uuid::new_v4().to_string(), identity, total_stages)
    }

    /// Pending job under a caller-chosen id.
    pub fn with_id(id: &str, identity: &str, total_stages: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            identity: identity.to_string(),
            total_stages,
            processed_stages: 0,
            status: JobStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// First stage not yet processed, if any.
    pub fn next_stage(&self) -> Option<AnalysisStage> {
        if self.processed_stages >= self.total_stages {
            return None;
        }
        AnalysisStage::from_index(self.processed_stages + 1)
    }

    pub fn percent_complete(&self) -> f32 {
        if self.total_stages == 0 {
            return 100.0;
        }
        (self.processed_stages as f32 / self.total_stages as f32 * 100.0).min(100.0)
    }
}

/// Final disposition of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Structured output of a stage: the partial record and the fields it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub record: PersonalityRecord,
    pub fields: Vec<FieldName>,
}

/// Persisted outcome of one stage of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_index: usize,
    pub item_count: usize,
    pub status: StageStatus,
    pub payload: Option<StagePayload>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StageResult {
    pub fn completed(stage: AnalysisStage, item_count: usize, payload: StagePayload) -> Self {
        Self {
            stage_index: stage.index(),
            item_count,
            status: StageStatus::Completed,
            payload: Some(payload),
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(stage: AnalysisStage, item_count: usize, error: &str) -> Self {
        Self {
            stage_index: stage.index(),
            item_count,
            status: StageStatus::Failed,
            payload: None,
            error: Some(error.to_string()),
            created_at: Utc::now(),
        }
    }

    pub fn stage(&self) -> Option<AnalysisStage> {
        AnalysisStage::from_index(self.stage_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stage_follows_processed_count() {
        let mut job = AnalysisJob::new("ada", AnalysisStage::COUNT);
        assert_eq!(job.next_stage(), Some(AnalysisStage::BasicInfo));
        job.processed_stages = 3;
        assert_eq!(job.next_stage(), Some(AnalysisStage::Communication));
        job.processed_stages = 6;
        assert_eq!(job.next_stage(), None);
        assert_eq!(job.percent_complete(), 100.0);
    }

    #[test]
    fn test_status_round_trip_and_closed() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert!(JobStatus::Completed.is_closed());
        assert!(JobStatus::Failed.is_closed());
        assert!(!JobStatus::Processing.is_closed());
    }
}
