//! Progress events emitted by the orchestrator.

use crate::models::AnalysisStage;

/// Events emitted while a profile analysis runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    /// Run started (or resumed) at `first_stage`.
    Started {
        job_id: Option<String>,
        first_stage: AnalysisStage,
    },
    /// Stage attempt started.
    StageStarted { stage: AnalysisStage },
    /// Stage boundary crossed; emitted after every completed or tolerated stage.
    Progress {
        stage: AnalysisStage,
        percent_complete: f32,
    },
    /// Stage gave up on its fields and the run continued without them.
    StageTolerated { stage: AnalysisStage, error: String },
    /// Stage hit its internal deadline and is being resumed.
    StageResumed { stage: AnalysisStage, resumes: u32 },
    /// Run finished; `defaulted` lists fields filled with placeholders.
    Finished {
        job_id: Option<String>,
        defaulted: Vec<String>,
    },
}
