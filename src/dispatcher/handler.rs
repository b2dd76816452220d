//! Work handlers run by the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::item::{WorkKind, WorkRequest};
use crate::analysis::{
    AnalysisError, AnalysisInput, AnalysisOptions, AnalysisOutput, AnalysisRequest, DeviceClass,
    PipelineOrchestrator,
};
use crate::models::{AnalysisStage, FieldName};

/// Executes one dispatched item.
///
/// Implementations should return promptly with [`AnalysisError::Aborted`]
/// once `cancel` fires.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(
        &self,
        request: &WorkRequest,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, AnalysisError>;
}

/// Payload carried by analysis and chat items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub input: AnalysisInput,
    #[serde(default)]
    pub device: DeviceClass,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_persist")]
    pub persist: bool,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Question for chat items.
    #[serde(default)]
    pub prompt: Option<String>,
}

fn default_persist() -> bool {
    true
}

impl AnalysisPayload {
    pub fn new(input: AnalysisInput) -> Self {
        Self {
            input,
            device: DeviceClass::default(),
            strict: false,
            persist: true,
            job_id: None,
            prompt: None,
        }
    }
}

/// Runs items through a [`PipelineOrchestrator`].
pub struct PipelineHandler {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl PipelineHandler {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl WorkHandler for PipelineHandler {
    async fn handle(
        &self,
        request: &WorkRequest,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, AnalysisError> {
        let payload: AnalysisPayload = serde_json::from_value(request.payload.clone())
            .map_err(|e| AnalysisError::Critical(format!("invalid payload: {}", e)))?;

        let prompt = match request.kind {
            WorkKind::Analysis => None,
            WorkKind::Chat => Some(payload.prompt.ok_or_else(|| {
                AnalysisError::Critical("chat item carries no prompt".to_string())
            })?),
        };

        // New analysis items run under their item id, so a retried or
        // restored item finds the job its earlier attempt checkpointed.
        let create_if_missing = payload.job_id.is_none() && prompt.is_none();
        let job_id = match payload.job_id {
            Some(id) => Some(id),
            None if create_if_missing => Some(request.id.clone()),
            None => None,
        };
        let analysis = AnalysisRequest::new(&request.identity, payload.input).with_options(
            AnalysisOptions {
                device: payload.device,
                persist: payload.persist,
                strict: payload.strict,
                job_id,
                create_if_missing,
                prompt,
            },
        );

        match self.orchestrator.run(analysis, &cancel, None).await? {
            AnalysisOutput::FreeForm { response } => Ok(json!({ "response": response })),
            AnalysisOutput::Profile(profile) => {
                let record = serde_json::to_value(&profile.record)
                    .map_err(|e| AnalysisError::Critical(e.to_string()))?;
                let defaulted: Vec<&str> = profile.defaulted.iter().map(FieldName::as_str).collect();
                let tolerated: Vec<&str> =
                    profile.tolerated.iter().map(AnalysisStage::as_str).collect();
                Ok(json!({
                    "job_id": profile.job_id,
                    "record": record,
                    "defaulted": defaulted,
                    "tolerated": tolerated,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedGenerator, ScriptedReply};
    use crate::models::{Post, Profile};

    fn request(kind: WorkKind, payload: serde_json::Value) -> WorkRequest {
        WorkRequest {
            id: "item-1".to_string(),
            kind,
            identity: "ada".to_string(),
            payload,
            attempt: 1,
        }
    }

    fn input() -> AnalysisInput {
        AnalysisInput::new(Profile::new("ada"), vec![Post::new("Parsers all day.")])
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_item_returns_response() {
        let generator = Arc::new(ScriptedGenerator::new());
        generator.push("chat", ScriptedReply::text("Mostly parsers."));
        let handler = PipelineHandler::new(Arc::new(PipelineOrchestrator::new(generator)));

        let mut payload = AnalysisPayload::new(input());
        payload.prompt = Some("What do they post about?".to_string());
        let value = handler
            .handle(
                &request(WorkKind::Chat, serde_json::to_value(&payload).unwrap()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(value["response"], "Mostly parsers.");
    }

    #[tokio::test]
    async fn test_chat_item_without_prompt_is_critical() {
        let handler = PipelineHandler::new(Arc::new(PipelineOrchestrator::new(Arc::new(
            ScriptedGenerator::new(),
        ))));
        let payload = serde_json::to_value(AnalysisPayload::new(input())).unwrap();
        let err = handler
            .handle(&request(WorkKind::Chat, payload), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Critical(_)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_critical() {
        let handler = PipelineHandler::new(Arc::new(PipelineOrchestrator::new(Arc::new(
            ScriptedGenerator::new(),
        ))));
        let err = handler
            .handle(
                &request(WorkKind::Analysis, json!({ "posts": 3 })),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Critical(_)));
    }
}
