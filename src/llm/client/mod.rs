//! HTTP client for Ollama and OpenAI-compatible chat APIs.

mod config;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use config::{LlmConfig, LlmProvider};

use super::generator::{
    FinishReason, GenerationRequest, GenerationResponse, LlmError, TextGenerator,
};
use crate::rate_limit::parse_retry_after;

/// LLM client for profile analysis.
pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

/// Ollama API request format.
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
}

/// Ollama API response format.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Check if the LLM service is reachable.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.authorized(self.client.get(self.models_url())).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// List models the service offers.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let resp = self
            .authorized(self.client.get(self.models_url()))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let resp = check_status(resp).await?;

        match self.config.provider {
            LlmProvider::Ollama => {
                #[derive(Deserialize)]
                struct TagsResponse {
                    models: Vec<ModelInfo>,
                }

                #[derive(Deserialize)]
                struct ModelInfo {
                    name: String,
                }

                let tags: TagsResponse = resp
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;
                Ok(tags.models.into_iter().map(|m| m.name).collect())
            }
            LlmProvider::OpenAI => {
                #[derive(Deserialize)]
                struct ModelsResponse {
                    data: Vec<ModelEntry>,
                }

                #[derive(Deserialize)]
                struct ModelEntry {
                    id: String,
                }

                let models: ModelsResponse = resp
                    .json()
                    .await
                    .map_err(|e| LlmError::Parse(e.to_string()))?;
                Ok(models.data.into_iter().map(|m| m.id).collect())
            }
        }
    }

    fn models_url(&self) -> String {
        match self.config.provider {
            LlmProvider::Ollama => format!("{}/api/tags", self.config.endpoint),
            LlmProvider::OpenAI => format!("{}/models", self.openai_base()),
        }
    }

    fn openai_base(&self) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        if endpoint.ends_with("/v1") {
            endpoint.to_string()
        } else {
            format!("{}/v1", endpoint)
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) if self.config.provider == LlmProvider::OpenAI => builder.bearer_auth(key),
            _ => builder,
        }
    }

    fn send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(Duration::from_secs(self.config.request_timeout_secs))
        } else {
            LlmError::Connection(e.to_string())
        }
    }

    /// Call Ollama's generate endpoint.
    async fn call_ollama(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let body = OllamaRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            system: &request.system,
            stream: false,
            options: OllamaOptions {
                temperature: request.sampling.temperature,
                num_predict: request.sampling.max_tokens,
                top_p: request.sampling.top_p,
            },
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let resp = check_status(resp).await?;

        let ollama_resp: OllamaResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(GenerationResponse {
            text: ollama_resp.response,
            finish_reason: ollama_resp
                .done_reason
                .as_deref()
                .map(FinishReason::from_str)
                .unwrap_or(FinishReason::Stop),
        })
    }

    /// Call an OpenAI-compatible chat completions endpoint.
    async fn call_openai(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: request.sampling.temperature,
            max_tokens: request.sampling.max_tokens,
            top_p: request.sampling.top_p,
        };

        let url = format!("{}/chat/completions", self.openai_base());
        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let resp = check_status(resp).await?;

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let choice = chat.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;

        Ok(GenerationResponse {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: choice
                .finish_reason
                .as_deref()
                .map(FinishReason::from_str)
                .unwrap_or(FinishReason::Other),
        })
    }
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(resp: Response) -> Result<Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = parse_retry_after(
        resp.headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok()),
    );
    let body = resp.text().await.unwrap_or_default();

    Err(match status.as_u16() {
        429 => LlmError::RateLimited { retry_after },
        503 => LlmError::ServiceUnavailable(body),
        404 => LlmError::ModelNotFound(body),
        code => LlmError::Api {
            status: code,
            message: body,
        },
    })
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        debug!(
            "Generating '{}' with {} ({} prompt chars)",
            request.label,
            self.config.model,
            request.prompt.len()
        );

        match self.config.provider {
            LlmProvider::Ollama => self.call_ollama(request).await,
            LlmProvider::OpenAI => self.call_openai(request).await,
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
