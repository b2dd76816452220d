//! Generation request/response types and the generator trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 0.9,
        }
    }
}

/// A single prompt/response call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Short tag identifying the call (stage name, "chat", ...).
    pub label: String,
    pub system: String,
    pub prompt: String,
    pub sampling: SamplingParams,
}

impl GenerationRequest {
    pub fn new(label: &str, system: &str, prompt: &str) -> Self {
        Self {
            label: label.to_string(),
            system: system.to_string(),
            prompt: prompt.to_string(),
            sampling: SamplingParams::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Other,
}

impl FinishReason {
    pub fn from_str(s: &str) -> Self {
        match s {
            "stop" | "eos" | "end_turn" => Self::Stop,
            "length" | "max_tokens" => Self::Length,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub finish_reason: FinishReason,
}

impl GenerationResponse {
    pub fn stop(text: &str) -> Self {
        Self {
            text: text.to_string(),
            finish_reason: FinishReason::Stop,
        }
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request aborted")]
    Aborted,

    #[error("empty response")]
    EmptyResponse,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("LLM is disabled")]
    Disabled,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_)
            | Self::ServiceUnavailable(_)
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::EmptyResponse => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Parse(_) | Self::Aborted | Self::ModelNotFound(_) | Self::Disabled => false,
        }
    }
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Run one generation bounded by a timeout and a cancellation token.
///
/// Whichever fires first aborts the call. Blank output is reported as
/// [`LlmError::EmptyResponse`].
pub async fn generate_with_deadline(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<GenerationResponse, LlmError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LlmError::Aborted),
        result = tokio::time::timeout(timeout, generator.generate(request)) => match result {
            Ok(response) => response?,
            Err(_) => return Err(LlmError::Timeout(timeout)),
        },
    };

    if response.text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedGenerator, ScriptedReply};

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out() {
        let generator = ScriptedGenerator::new();
        generator.push("stage", ScriptedReply::Hang);
        let request = GenerationRequest::new("stage", "", "hi");
        let result = generate_with_deadline(
            &generator,
            &request,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let generator = ScriptedGenerator::new();
        generator.push("stage", ScriptedReply::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = GenerationRequest::new("stage", "", "hi");
        let result =
            generate_with_deadline(&generator, &request, Duration::from_secs(5), &cancel).await;
        assert!(matches!(result, Err(LlmError::Aborted)));
    }

    #[tokio::test]
    async fn test_blank_text_is_empty_response() {
        let generator = ScriptedGenerator::new();
        generator.push("stage", ScriptedReply::text("  \n "));
        let request = GenerationRequest::new("stage", "", "hi");
        let result = generate_with_deadline(
            &generator,
            &request,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_str("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_str("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_str("weird"), FinishReason::Other);
    }
}
