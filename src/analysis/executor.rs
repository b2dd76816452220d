//! Single-stage execution with retries.
//!
//! One [`ChunkExecutor`] lives for one analysis run. It owns the run's
//! quality sessions and timeout policy, so a timeout escalation on one stage
//! carries over to every later stage of the same run.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::PipelineConfig;
use super::device::{DeviceClass, TimeoutPolicy};
use super::error::{AnalysisError, ErrorKind, TransientKind};
use super::parser::{parse, ParsedStage};
use super::prompt::{free_form_prompt, stage_prompt, AnalysisInput, PromptLimits, SYSTEM_PROMPT};
use super::quality::{QualityConfig, QualityGate};
use super::validator::validate_stage;
use crate::llm::{generate_with_deadline, GenerationRequest, LlmError, SamplingParams, TextGenerator};
use crate::models::AnalysisStage;
use crate::rate_limit::backoff_delay;

/// Label used for free-form requests.
pub const FREE_FORM_LABEL: &str = "chat";

/// Highest temperature a retry may push sampling to.
const MAX_TEMPERATURE: f32 = 2.0;

/// Runs individual stages against a text generator.
pub struct ChunkExecutor {
    generator: Arc<dyn TextGenerator>,
    config: PipelineConfig,
    quality: QualityGate,
    timeouts: TimeoutPolicy,
    sampling: SamplingParams,
    identity: String,
}

impl ChunkExecutor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        config: PipelineConfig,
        quality: QualityConfig,
        device: DeviceClass,
        sampling: SamplingParams,
        identity: &str,
    ) -> Self {
        let timeouts = TimeoutPolicy::new(device, &config);
        Self {
            generator,
            config,
            quality: QualityGate::new(quality),
            timeouts,
            sampling,
            identity: identity.to_string(),
        }
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    fn limits(&self) -> PromptLimits {
        PromptLimits {
            max_chars: self.config.max_prompt_chars,
            example_posts: self.config.example_posts,
        }
    }

    /// Sampling for the next attempt; temperature rises with style variation.
    fn sampling_for(&self, variation: f32) -> SamplingParams {
        let boost = variation * self.quality.config().temperature_boost;
        SamplingParams {
            temperature: (self.sampling.temperature + boost).min(MAX_TEMPERATURE),
            ..self.sampling
        }
    }

    /// Run one stage until its fields validate or attempts run out.
    ///
    /// Response history and style variation carry over to later calls for
    /// the same stage until [`ChunkExecutor::finish_stage`].
    pub async fn execute_stage(
        &mut self,
        stage: AnalysisStage,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<ParsedStage, AnalysisError> {
        let key = self.session_key(stage);
        self.attempt_stage(stage, input, cancel, &key).await
    }

    /// Forget a stage's quality session once its disposition is final.
    pub fn finish_stage(&mut self, stage: AnalysisStage) {
        let key = self.session_key(stage);
        self.quality.drop_session(&key);
    }

    fn session_key(&self, stage: AnalysisStage) -> String {
        format!("{}:{}", self.identity, stage.as_str())
    }

    async fn attempt_stage(
        &mut self,
        stage: AnalysisStage,
        input: &AnalysisInput,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<ParsedStage, AnalysisError> {
        let max_attempts = self.config.max_attempts(stage);
        let mut last_field_error: Option<AnalysisError> = None;

        for attempt in 0..max_attempts {
            let variation = self.quality.style_variation(key);
            let prompt = stage_prompt(stage, input, self.limits(), variation);
            let request = GenerationRequest::new(stage.as_str(), SYSTEM_PROMPT, &prompt)
                .with_sampling(self.sampling_for(variation));
            let timeout = self.timeouts.current();

            debug!(
                "{} attempt {}/{} via {} (timeout {:?})",
                stage,
                attempt + 1,
                max_attempts,
                self.generator.name(),
                timeout
            );

            let mut retry_after = None;
            let outcome =
                generate_with_deadline(self.generator.as_ref(), &request, timeout, cancel).await;
            let result = match outcome {
                Ok(response) => self.evaluate(stage, key, &response.text),
                Err(err) => {
                    if let LlmError::RateLimited {
                        retry_after: Some(wait),
                    } = &err
                    {
                        retry_after = Some(*wait);
                    }
                    Err(err.into())
                }
            };

            let err = match result {
                Ok(parsed) => {
                    info!("{} succeeded on attempt {}", stage, attempt + 1);
                    return Ok(parsed);
                }
                Err(err) => err,
            };

            match err.kind() {
                ErrorKind::Aborted | ErrorKind::Critical => return Err(err),
                ErrorKind::FieldIncomplete => {
                    warn!("{} attempt {} incomplete: {}", stage, attempt + 1, err);
                    last_field_error = Some(err);
                }
                ErrorKind::Transient | ErrorKind::QualityInsufficient => {
                    if let AnalysisError::Transient {
                        kind: TransientKind::Timeout,
                        ..
                    } = err
                    {
                        if self.timeouts.escalate() {
                            info!(
                                "Raised {} timeout to {:?}",
                                self.timeouts.device().as_str(),
                                self.timeouts.current()
                            );
                        }
                    }
                    warn!("{} attempt {} failed: {}", stage, attempt + 1, err);
                }
            }

            if attempt + 1 < max_attempts {
                self.quality.note_retry(key);
                let delay =
                    retry_after.unwrap_or_else(|| backoff_delay(attempt, self.config.backoff_base_ms));
                sleep_or_cancel(delay, cancel).await?;
            }
        }

        Err(last_field_error.unwrap_or_else(|| {
            AnalysisError::from_missing(&stage.relevant_fields().iter().copied().collect())
        }))
    }

    /// Score, parse and validate one response.
    fn evaluate(
        &mut self,
        stage: AnalysisStage,
        key: &str,
        text: &str,
    ) -> Result<ParsedStage, AnalysisError> {
        let score = self.quality.assess(key, text)?;
        debug!("{} response quality {:.2}", stage, score);

        let parsed = parse(stage, text);
        let report = validate_stage(stage, &parsed.record);
        if !report.is_valid {
            return Err(AnalysisError::from_report(&report));
        }
        Ok(parsed)
    }

    /// Answer a free-form question with a single prompt call.
    ///
    /// Transient failures are retried with backoff; nothing is parsed.
    pub async fn execute_free_form(
        &mut self,
        question: &str,
        input: &AnalysisInput,
        cancel: &CancellationToken,
    ) -> Result<String, AnalysisError> {
        let prompt = free_form_prompt(question, input, self.limits());
        let request = GenerationRequest::new(FREE_FORM_LABEL, SYSTEM_PROMPT, &prompt)
            .with_sampling(self.sampling);
        let max_attempts = self.config.profile_max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let timeout = self.timeouts.current();
            match generate_with_deadline(self.generator.as_ref(), &request, timeout, cancel).await
            {
                Ok(response) => return Ok(response.text.trim().to_string()),
                Err(err) => {
                    let err = AnalysisError::from(err);
                    if err.kind() != ErrorKind::Transient {
                        return Err(err);
                    }
                    warn!("Free-form attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                }
            }
            if attempt + 1 < max_attempts {
                sleep_or_cancel(backoff_delay(attempt, self.config.backoff_base_ms), cancel)
                    .await?;
            }
        }

        Err(last_error
            .unwrap_or_else(|| AnalysisError::Critical("free-form request never ran".to_string())))
    }
}

/// Sleep unless the token fires first.
pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), AnalysisError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AnalysisError::Aborted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedGenerator, ScriptedReply};
    use crate::models::{FieldName, Post, Profile};

    const INTERESTS_OK: &str = "Interests:\n- Rust programming\n- Trail running\n- Film photography\n\n\
                                Topics and Themes:\n- Open source\n- Tooling";

    fn input() -> AnalysisInput {
        AnalysisInput::new(
            Profile::new("ada"),
            vec![Post::new("Benchmarking async runtimes again.")],
        )
    }

    fn executor(generator: Arc<ScriptedGenerator>, device: DeviceClass) -> ChunkExecutor {
        let config = PipelineConfig {
            backoff_base_ms: 10,
            ..Default::default()
        };
        ChunkExecutor::new(
            generator,
            config,
            QualityConfig::default(),
            device,
            SamplingParams::default(),
            "ada",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(
            "interests",
            ScriptedReply::Fail(LlmError::ServiceUnavailable("busy".into())),
        );
        generator.push("interests", ScriptedReply::text(""));
        generator.push("interests", ScriptedReply::text(INTERESTS_OK));

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        let parsed = exec
            .execute_stage(AnalysisStage::Interests, &input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(parsed.record.interests.len(), 3);
        assert_eq!(generator.call_count("interests"), 3);

        // Retries raise the temperature.
        let calls = generator.calls();
        assert!(calls[2].sampling.temperature > calls[0].sampling.temperature);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_interests_exhausts_domain_attempts() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.repeat(
            "interests",
            ScriptedReply::text("Interests:\nMostly posts about work and weekends."),
        );

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        let err = exec
            .execute_stage(AnalysisStage::Interests, &input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingInterests { .. }));
        assert!(err.missing_fields().contains(&FieldName::Interests));
        assert_eq!(generator.call_count("interests"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quality_session_spans_stage_retries() {
        let generator = Arc::new(ScriptedGenerator::new());
        let vague = "Interests:\nMostly posts about work and weekends.";
        generator.push("interests", ScriptedReply::text(vague));
        generator.push("interests", ScriptedReply::text(vague));

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        exec.config.domain_max_attempts = 1;
        let cancel = CancellationToken::new();
        let first = exec
            .execute_stage(AnalysisStage::Interests, &input(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(first, AnalysisError::MissingInterests { .. }));

        // The repeat is judged against the earlier reply.
        let second = exec
            .execute_stage(AnalysisStage::Interests, &input(), &cancel)
            .await
            .unwrap_err();
        assert!(second.missing_fields().contains(&FieldName::Interests));
        assert_eq!(exec.quality.session_count(), 1);
        assert_eq!(exec.quality.context("ada:interests").history.len(), 2);

        exec.finish_stage(AnalysisStage::Interests);
        assert_eq!(exec.quality.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_names_all_stage_fields() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.repeat(
            "basic_info",
            ScriptedReply::Fail(LlmError::Connection("refused".into())),
        );

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        let err = exec
            .execute_stage(AnalysisStage::BasicInfo, &input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::IncompleteAnalysis { .. }));
        assert_eq!(err.missing_fields().len(), 3);
        assert_eq!(generator.call_count("basic_info"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mobile_timeout_escalates_for_rest_of_run() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push("interests", ScriptedReply::Hang);
        generator.push("interests", ScriptedReply::text(INTERESTS_OK));

        let mut exec = executor(generator, DeviceClass::Mobile);
        exec.execute_stage(AnalysisStage::Interests, &input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exec.timeouts().current(), Duration::from_secs(180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_retried() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.repeat("interests", ScriptedReply::Hang);
        let cancel = CancellationToken::new();

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });
        let err = exec
            .execute_stage(AnalysisStage::Interests, &input(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Aborted));
        assert_eq!(generator.call_count("interests"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_form_retries_transient() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push(
            FREE_FORM_LABEL,
            ScriptedReply::Fail(LlmError::Timeout(Duration::from_secs(1))),
        );
        generator.push(FREE_FORM_LABEL, ScriptedReply::text("  Mostly compilers.  "));

        let mut exec = executor(generator.clone(), DeviceClass::Desktop);
        let answer = exec
            .execute_free_form("What do they write about?", &input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "Mostly compilers.");
        assert_eq!(generator.call_count(FREE_FORM_LABEL), 2);
    }
}
