//! Text generation against an external LLM service.
//!
//! [`TextGenerator`] is the seam the analysis pipeline calls through.
//! [`LlmClient`] talks to Ollama or any OpenAI-compatible API;
//! [`ScriptedGenerator`] replays canned replies.

mod client;
mod generator;
mod scripted;

pub use client::{LlmClient, LlmConfig, LlmProvider};
pub use generator::{
    generate_with_deadline, FinishReason, GenerationRequest, GenerationResponse, LlmError,
    SamplingParams, TextGenerator,
};
pub use scripted::{ScriptedGenerator, ScriptedReply};
