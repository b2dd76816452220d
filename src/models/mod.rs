//! Data models for persona analysis.

mod job;
mod personality;
mod post;
mod stage;

pub use job::{AnalysisJob, JobStatus, StagePayload, StageResult, StageStatus};
pub use personality::{
    CommunicationStyle, EmotionalIntelligence, PersonalityRecord, SocialBehaviorMetrics, Trait,
    Vocabulary, DEFAULT_METRIC, PLACEHOLDER_INTEREST, PLACEHOLDER_PATTERN, PLACEHOLDER_TERM,
    PLACEHOLDER_TONE, PLACEHOLDER_TOPIC, PLACEHOLDER_TRAIT,
};
pub(crate) use personality::join_explanations;
pub use post::{Post, Profile, ProfileDump};
pub use stage::{AnalysisStage, FieldName, StageFamily};
