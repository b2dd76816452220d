//! Pipeline tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{AnalysisStage, StageFamily};

/// Retry, timeout, and pacing settings for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per stage for the profile family (summary, traits).
    #[serde(default = "default_profile_max_attempts")]
    pub profile_max_attempts: u32,
    /// Attempts per stage for domain-specific stages.
    #[serde(default = "default_domain_max_attempts")]
    pub domain_max_attempts: u32,
    /// Base for exponential backoff between attempts.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_desktop_timeout_ms")]
    pub desktop_timeout_ms: u64,
    #[serde(default = "default_tablet_timeout_ms")]
    pub tablet_timeout_ms: u64,
    #[serde(default = "default_mobile_timeout_ms")]
    pub mobile_timeout_ms: u64,
    /// Multiplier applied to mobile/tablet timeouts after a timeout.
    #[serde(default = "default_timeout_escalation")]
    pub timeout_escalation: f32,
    /// Ceiling for escalated timeouts.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Internal deadline for one stage including its retries.
    #[serde(default = "default_stage_deadline_ms")]
    pub stage_deadline_ms: u64,
    /// Times a stage may be resumed after hitting its internal deadline.
    #[serde(default = "default_max_resumes")]
    pub max_resumes: u32,
    /// Orchestrator-level retries of a stage that failed with a field error.
    #[serde(default = "default_stage_retry_limit")]
    pub stage_retry_limit: u32,
    /// Pause between stages.
    #[serde(default = "default_inter_stage_delay_ms")]
    pub inter_stage_delay_ms: u64,
    /// Posts quoted verbatim as the example excerpt.
    #[serde(default = "default_example_posts")]
    pub example_posts: usize,
    /// Most recent posts considered per run.
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
    /// Maximum characters of post text per prompt.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

fn default_profile_max_attempts() -> u32 {
    3
}

fn default_domain_max_attempts() -> u32 {
    10
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_desktop_timeout_ms() -> u64 {
    60_000
}

fn default_tablet_timeout_ms() -> u64 {
    90_000
}

fn default_mobile_timeout_ms() -> u64 {
    120_000
}

fn default_timeout_escalation() -> f32 {
    1.5
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_stage_deadline_ms() -> u64 {
    600_000
}

fn default_max_resumes() -> u32 {
    3
}

fn default_stage_retry_limit() -> u32 {
    2
}

fn default_inter_stage_delay_ms() -> u64 {
    500
}

fn default_example_posts() -> usize {
    5
}

fn default_max_posts() -> usize {
    200
}

fn default_max_prompt_chars() -> usize {
    12_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            profile_max_attempts: default_profile_max_attempts(),
            domain_max_attempts: default_domain_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            desktop_timeout_ms: default_desktop_timeout_ms(),
            tablet_timeout_ms: default_tablet_timeout_ms(),
            mobile_timeout_ms: default_mobile_timeout_ms(),
            timeout_escalation: default_timeout_escalation(),
            max_timeout_ms: default_max_timeout_ms(),
            stage_deadline_ms: default_stage_deadline_ms(),
            max_resumes: default_max_resumes(),
            stage_retry_limit: default_stage_retry_limit(),
            inter_stage_delay_ms: default_inter_stage_delay_ms(),
            example_posts: default_example_posts(),
            max_posts: default_max_posts(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn max_attempts(&self, stage: AnalysisStage) -> u32 {
        let attempts = match stage.family() {
            StageFamily::Profile => self.profile_max_attempts,
            StageFamily::Domain => self.domain_max_attempts,
        };
        attempts.max(1)
    }

    pub fn stage_deadline(&self) -> Duration {
        Duration::from_millis(self.stage_deadline_ms)
    }

    pub fn inter_stage_delay(&self) -> Duration {
        Duration::from_millis(self.inter_stage_delay_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}
