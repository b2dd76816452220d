//! Chunked personality analysis.
//!
//! A profile is analyzed in six ordered stages. Each stage prompts the
//! generator, scores the reply, parses it into the fields the stage owns and
//! validates them. [`PipelineOrchestrator`] drives the stages, checkpoints
//! them through a [`JobStore`](crate::repository::JobStore) and merges the
//! partial records into one [`PersonalityRecord`](crate::models::PersonalityRecord).

mod config;
mod device;
mod error;
mod events;
mod executor;
mod orchestrator;
pub mod parser;
mod postprocess;
pub mod prompt;
mod quality;
pub mod validator;

pub use config::PipelineConfig;
pub use device::{DeviceClass, TimeoutPolicy};
pub use error::{AnalysisError, ErrorKind, TransientKind};
pub use events::AnalysisEvent;
pub use executor::{ChunkExecutor, FREE_FORM_LABEL};
pub use orchestrator::{
    AnalysisOptions, AnalysisOutput, AnalysisRequest, PipelineOrchestrator, ProfileAnalysis,
};
pub use parser::{parse, ParsedStage};
pub use postprocess::{consolidate_interests, dedupe_traits, post_process};
pub use prompt::{AnalysisInput, PromptLimits};
pub use quality::{score_response, QualityConfig, QualityGate};
pub use validator::{validate, validate_stage, ValidationReport};
