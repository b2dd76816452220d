//! Multi-stage pipeline driver.
//!
//! Stages run strictly in order through an explicit cursor loop. Each
//! completed stage is merged into the accumulator and checkpointed before the
//! cursor advances, so a restarted job resumes at `processed_stages + 1`
//! without re-running or double-counting anything.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::PipelineConfig;
use super::device::DeviceClass;
use super::error::{AnalysisError, ErrorKind};
use super::events::AnalysisEvent;
use super::executor::{sleep_or_cancel, ChunkExecutor};
use super::postprocess::post_process;
use super::prompt::AnalysisInput;
use super::quality::QualityConfig;
use super::validator::validate;
use crate::llm::{SamplingParams, TextGenerator};
use crate::models::{
    AnalysisJob, AnalysisStage, FieldName, JobStatus, PersonalityRecord, StagePayload,
    StageResult, StageStatus,
};
use crate::rate_limit::backoff_delay;
use crate::repository::{JobStore, StoreError};

/// Per-request switches.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub device: DeviceClass,
    /// Checkpoint through the job store when one is configured.
    pub persist: bool,
    /// Fail instead of filling defaults when the final record is incomplete.
    pub strict: bool,
    /// Resume this job instead of creating a new one.
    pub job_id: Option<String>,
    /// Create `job_id` when the store does not know it yet.
    pub create_if_missing: bool,
    /// Answer this question instead of running the stage pipeline.
    pub prompt: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            device: DeviceClass::default(),
            persist: true,
            strict: false,
            job_id: None,
            create_if_missing: false,
            prompt: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Caller identity; used for job ownership and rate limiting.
    pub identity: String,
    pub input: AnalysisInput,
    pub options: AnalysisOptions,
}

impl AnalysisRequest {
    pub fn new(identity: &str, input: AnalysisInput) -> Self {
        Self {
            identity: identity.to_string(),
            input,
            options: AnalysisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of a profile analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAnalysis {
    pub record: PersonalityRecord,
    pub job_id: Option<String>,
    /// Fields that ended up holding safe defaults.
    pub defaulted: Vec<FieldName>,
    /// Stages that were given up on and skipped.
    pub tolerated: Vec<AnalysisStage>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutput {
    Profile(ProfileAnalysis),
    FreeForm { response: String },
}

/// Optional progress channel.
struct EventSink(Option<mpsc::Sender<AnalysisEvent>>);

impl EventSink {
    async fn send(&self, event: AnalysisEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event).await;
        }
    }
}

/// Run-local state of the cursor loop.
struct RunState {
    record: PersonalityRecord,
    /// Stages with a persisted final disposition.
    done: BTreeSet<AnalysisStage>,
    tolerated: Vec<AnalysisStage>,
    processed: usize,
}

impl RunState {
    fn new() -> Self {
        Self {
            record: PersonalityRecord::safe_default(),
            done: BTreeSet::new(),
            tolerated: Vec::new(),
            processed: 0,
        }
    }

    /// Rebuild the accumulator from persisted stage results.
    fn from_results(results: &[StageResult], processed: usize) -> Self {
        let mut state = Self::new();
        state.processed = processed;
        for result in results {
            let Some(stage) = result.stage() else {
                continue;
            };
            match (&result.status, &result.payload) {
                (StageStatus::Completed, Some(payload)) => {
                    state
                        .record
                        .merge(&payload.record, payload.fields.iter().copied());
                }
                _ => state.tolerated.push(stage),
            }
            state.done.insert(stage);
        }
        state
    }

    fn percent_complete(&self) -> f32 {
        (self.processed as f32 / AnalysisStage::COUNT as f32 * 100.0).min(100.0)
    }
}

/// Drives the six analysis stages for a request.
pub struct PipelineOrchestrator {
    generator: Arc<dyn TextGenerator>,
    store: Option<Arc<dyn JobStore>>,
    config: PipelineConfig,
    quality: QualityConfig,
    sampling: SamplingParams,
}

impl PipelineOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            store: None,
            config: PipelineConfig::default(),
            quality: QualityConfig::default(),
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run a request to completion.
    ///
    /// Caller cancellation returns [`AnalysisError::Aborted`] and leaves a
    /// persisted job resumable.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        cancel: &CancellationToken,
        progress: Option<mpsc::Sender<AnalysisEvent>>,
    ) -> Result<AnalysisOutput, AnalysisError> {
        let AnalysisRequest {
            identity,
            input,
            options,
        } = request;
        let input = input.limited(self.config.max_posts);
        let mut executor = ChunkExecutor::new(
            self.generator.clone(),
            self.config.clone(),
            self.quality.clone(),
            options.device,
            self.sampling,
            &identity,
        );

        if let Some(question) = options.prompt.as_deref() {
            let response = executor.execute_free_form(question, &input, cancel).await?;
            return Ok(AnalysisOutput::FreeForm { response });
        }

        let events = EventSink(progress);
        let store = if options.persist {
            self.store.clone()
        } else {
            None
        };

        let analysis = match store {
            Some(store) => {
                self.run_persisted(
                    store.as_ref(),
                    &identity,
                    &input,
                    &options,
                    &mut executor,
                    cancel,
                    &events,
                )
                .await?
            }
            None => {
                let mut state = RunState::new();
                events
                    .send(AnalysisEvent::Started {
                        job_id: None,
                        first_stage: AnalysisStage::BasicInfo,
                    })
                    .await;
                self.drive(
                    &mut state,
                    Some(AnalysisStage::BasicInfo),
                    None,
                    &input,
                    &mut executor,
                    cancel,
                    &events,
                )
                .await?;
                self.finish(state, None, None, options.strict, &events).await?
            }
        };

        Ok(AnalysisOutput::Profile(analysis))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_persisted(
        &self,
        store: &dyn JobStore,
        identity: &str,
        input: &AnalysisInput,
        options: &AnalysisOptions,
        executor: &mut ChunkExecutor,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<ProfileAnalysis, AnalysisError> {
        let existing = match options.job_id.as_deref() {
            Some(id) => match store.get_job(id).await? {
                Some(job) => Some(job),
                None if options.create_if_missing => {
                    store
                        .create_job_with_id(id, identity, AnalysisStage::COUNT)
                        .await?;
                    info!("Created job {} for {}", id, identity);
                    None
                }
                None => return Err(StoreError::NotFound(id.to_string()).into()),
            },
            None => None,
        };

        let (job, mut state) = match existing {
            Some(job) => {
                match job.status {
                    JobStatus::Completed => return self.stored_analysis(store, &job).await,
                    JobStatus::Failed => return Err(AnalysisError::JobClosed(job.id)),
                    JobStatus::Pending | JobStatus::Processing => {}
                }
                let results = store.stage_results(&job.id).await?;
                let state = RunState::from_results(&results, job.processed_stages);
                info!(
                    "Resuming job {} at stage {} of {}",
                    job.id,
                    job.processed_stages + 1,
                    job.total_stages
                );
                (job, state)
            }
            None => {
                let id = match options.job_id.clone() {
                    Some(id) => id,
                    None => {
                        let id = store.create_job(identity, AnalysisStage::COUNT).await?;
                        info!("Created job {} for {}", id, identity);
                        id
                    }
                };
                let job = store
                    .get_job(&id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                (job, RunState::new())
            }
        };

        if job.status == JobStatus::Pending {
            store
                .update_status(&job.id, JobStatus::Processing, None)
                .await?;
        }

        let first = job.next_stage();
        if let Some(stage) = first {
            events
                .send(AnalysisEvent::Started {
                    job_id: Some(job.id.clone()),
                    first_stage: stage,
                })
                .await;
        }

        let driven = self
            .drive(
                &mut state,
                first,
                Some((store, job.id.as_str())),
                input,
                executor,
                cancel,
                events,
            )
            .await;
        if let Err(err) = driven {
            if err.kind() == ErrorKind::Critical {
                mark_failed(store, &job.id, &err).await;
            }
            return Err(err);
        }

        self.finish(
            state,
            Some(store),
            Some(job.id.as_str()),
            options.strict,
            events,
        )
        .await
    }

    /// Cursor loop over the remaining stages.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        state: &mut RunState,
        first: Option<AnalysisStage>,
        checkpoint: Option<(&dyn JobStore, &str)>,
        input: &AnalysisInput,
        executor: &mut ChunkExecutor,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<(), AnalysisError> {
        let mut cursor = first;
        let mut resumes = 0u32;
        let mut field_retries = 0u32;

        while let Some(stage) = cursor {
            if state.done.contains(&stage) {
                // Disposition was persisted but the count never caught up.
                if stage.index() > state.processed {
                    if let Some((store, id)) = checkpoint {
                        state.processed = store.increment_processed_stages(id).await?;
                    }
                }
                cursor = stage.next();
                continue;
            }
            if cancel.is_cancelled() {
                return Err(AnalysisError::Aborted);
            }

            events.send(AnalysisEvent::StageStarted { stage }).await;
            let outcome = self.run_stage(stage, input, executor, cancel).await;

            let err = match outcome {
                Ok(parsed) => {
                    state
                        .record
                        .merge(&parsed.record, parsed.present.iter().copied());
                    let result = StageResult::completed(
                        stage,
                        input.item_count(),
                        StagePayload {
                            record: parsed.record,
                            fields: parsed.present.into_iter().collect(),
                        },
                    );
                    self.record_disposition(state, stage, &result, checkpoint)
                        .await?;
                    executor.finish_stage(stage);
                    events
                        .send(AnalysisEvent::Progress {
                            stage,
                            percent_complete: state.percent_complete(),
                        })
                        .await;
                    resumes = 0;
                    field_retries = 0;
                    cursor = stage.next();
                    if cursor.is_some() {
                        sleep_or_cancel(self.config.inter_stage_delay(), cancel).await?;
                    }
                    continue;
                }
                Err(err) => err,
            };

            let err = match err.kind() {
                ErrorKind::Critical => return Err(err),
                ErrorKind::Aborted if cancel.is_cancelled() => {
                    info!("{} aborted by caller", stage);
                    return Err(err);
                }
                ErrorKind::Aborted => {
                    resumes += 1;
                    if resumes <= self.config.max_resumes {
                        warn!(
                            "{} hit its deadline, resuming ({}/{})",
                            stage, resumes, self.config.max_resumes
                        );
                        events
                            .send(AnalysisEvent::StageResumed { stage, resumes })
                            .await;
                        continue;
                    }
                    warn!("{} exceeded {} resumes", stage, self.config.max_resumes);
                    all_fields_missing(stage)
                }
                ErrorKind::Transient | ErrorKind::QualityInsufficient => all_fields_missing(stage),
                ErrorKind::FieldIncomplete => err,
            };

            field_retries += 1;
            if field_retries <= self.config.stage_retry_limit {
                warn!(
                    "{} incomplete, retrying stage ({}/{}): {}",
                    stage, field_retries, self.config.stage_retry_limit, err
                );
                let delay = backoff_delay(field_retries - 1, self.config.backoff_base_ms);
                sleep_or_cancel(delay, cancel).await?;
                continue;
            }

            warn!("Tolerating incomplete {}: {}", stage, err);
            let result = StageResult::failed(stage, input.item_count(), &err.to_string());
            self.record_disposition(state, stage, &result, checkpoint)
                .await?;
            executor.finish_stage(stage);
            state.tolerated.push(stage);
            events
                .send(AnalysisEvent::StageTolerated {
                    stage,
                    error: err.to_string(),
                })
                .await;
            events
                .send(AnalysisEvent::Progress {
                    stage,
                    percent_complete: state.percent_complete(),
                })
                .await;
            resumes = 0;
            field_retries = 0;
            cursor = stage.next();
            if cursor.is_some() {
                sleep_or_cancel(self.config.inter_stage_delay(), cancel).await?;
            }
        }

        Ok(())
    }

    /// Execute one stage under its internal deadline.
    async fn run_stage(
        &self,
        stage: AnalysisStage,
        input: &AnalysisInput,
        executor: &mut ChunkExecutor,
        cancel: &CancellationToken,
    ) -> Result<super::parser::ParsedStage, AnalysisError> {
        let stage_token = cancel.child_token();
        let watchdog = {
            let token = stage_token.clone();
            let deadline = self.config.stage_deadline();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };
        let outcome = executor.execute_stage(stage, input, &stage_token).await;
        watchdog.abort();
        outcome
    }

    /// Persist a stage's final disposition and advance the processed count.
    async fn record_disposition(
        &self,
        state: &mut RunState,
        stage: AnalysisStage,
        result: &StageResult,
        checkpoint: Option<(&dyn JobStore, &str)>,
    ) -> Result<(), AnalysisError> {
        match checkpoint {
            Some((store, id)) => {
                store.save_stage_result(id, result).await?;
                state.processed = store.increment_processed_stages(id).await?;
            }
            None => state.processed += 1,
        }
        state.done.insert(stage);
        Ok(())
    }

    /// Post-process, validate and close out the run.
    async fn finish(
        &self,
        mut state: RunState,
        store: Option<&dyn JobStore>,
        job_id: Option<&str>,
        strict: bool,
        events: &EventSink,
    ) -> Result<ProfileAnalysis, AnalysisError> {
        post_process(&mut state.record);
        let report = validate(&state.record);
        let mut defaulted = Vec::new();

        if !report.is_valid {
            let err = AnalysisError::from_report(&report);
            if strict {
                if let (Some(store), Some(id)) = (store, job_id) {
                    mark_failed(store, id, &err).await;
                }
                return Err(err);
            }
            warn!("Filling defaults: {}", err);
            defaulted = report.missing_list();
            state.record.fill_defaults();
        }

        if let (Some(store), Some(id)) = (store, job_id) {
            let note = (!defaulted.is_empty()).then(|| defaulted_note(&defaulted));
            store
                .update_status(id, JobStatus::Completed, note.as_deref())
                .await?;
            info!("Job {} completed", id);
        }

        events
            .send(AnalysisEvent::Finished {
                job_id: job_id.map(str::to_string),
                defaulted: defaulted.iter().map(|f| f.as_str().to_string()).collect(),
            })
            .await;

        Ok(ProfileAnalysis {
            record: state.record,
            job_id: job_id.map(str::to_string),
            defaulted,
            tolerated: state.tolerated,
        })
    }

    /// Rebuild the result of an already completed job.
    async fn stored_analysis(
        &self,
        store: &dyn JobStore,
        job: &AnalysisJob,
    ) -> Result<ProfileAnalysis, AnalysisError> {
        let results = store.stage_results(&job.id).await?;
        let mut state = RunState::from_results(&results, job.processed_stages);
        post_process(&mut state.record);
        let defaulted = validate(&state.record).missing_list();
        state.record.fill_defaults();
        Ok(ProfileAnalysis {
            record: state.record,
            job_id: Some(job.id.clone()),
            defaulted,
            tolerated: state.tolerated,
        })
    }
}

fn all_fields_missing(stage: AnalysisStage) -> AnalysisError {
    AnalysisError::from_missing(&stage.relevant_fields().iter().copied().collect())
}

fn defaulted_note(fields: &[FieldName]) -> String {
    let names: Vec<&str> = fields.iter().map(FieldName::as_str).collect();
    format!("defaulted fields: {}", names.join(", "))
}

async fn mark_failed(store: &dyn JobStore, id: &str, err: &AnalysisError) {
    if let Err(e) = store
        .update_status(id, JobStatus::Failed, Some(&err.to_string()))
        .await
    {
        warn!("Could not mark job {} failed: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedGenerator, ScriptedReply};
    use crate::models::{Post, Profile};
    use crate::repository::InMemoryJobStore;

    fn input() -> AnalysisInput {
        AnalysisInput::new(Profile::new("ada"), vec![Post::new("Writing a parser today.")])
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            backoff_base_ms: 10,
            inter_stage_delay_ms: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_rebuild_skips_unknown_stages() {
        let mut result = StageResult::failed(AnalysisStage::Interests, 1, "x");
        result.stage_index = 42;
        let state = RunState::from_results(&[result], 0);
        assert!(state.done.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_form_prompt_skips_stages() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push("chat", ScriptedReply::text("They love parsers."));
        let orchestrator = PipelineOrchestrator::new(generator.clone()).with_config(fast_config());

        let request = AnalysisRequest::new("ada", input()).with_options(AnalysisOptions {
            prompt: Some("What do they like?".to_string()),
            ..Default::default()
        });
        let output = orchestrator
            .run(request, &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(
            output,
            AnalysisOutput::FreeForm {
                response: "They love parsers.".to_string()
            }
        );
        assert_eq!(generator.call_labels(), vec!["chat"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_cannot_resume() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = store.create_job("ada", 6).await.unwrap();
        store
            .update_status(&id, JobStatus::Failed, Some("boom"))
            .await
            .unwrap();

        let orchestrator = PipelineOrchestrator::new(Arc::new(ScriptedGenerator::new()))
            .with_store(store)
            .with_config(fast_config());
        let request = AnalysisRequest::new("ada", input()).with_options(AnalysisOptions {
            job_id: Some(id),
            ..Default::default()
        });
        let err = orchestrator
            .run(request, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::JobClosed(_)));
    }
}
