//! Generator that replays canned replies keyed by request label.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::generator::{GenerationRequest, GenerationResponse, LlmError, TextGenerator};

/// One canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(LlmError),
    /// Never resolves; used to exercise timeouts and cancellation.
    Hang,
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Replays queued replies per label, then falls back to a repeating reply.
///
/// Labels with nothing queued and no fallback fail with
/// [`LlmError::ServiceUnavailable`].
#[derive(Default)]
pub struct ScriptedGenerator {
    queued: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    repeating: Mutex<HashMap<String, ScriptedReply>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next call with this label.
    pub fn push(&self, label: &str, reply: ScriptedReply) {
        lock(&self.queued)
            .entry(label.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Reply used for this label once its queue is drained.
    pub fn repeat(&self, label: &str, reply: ScriptedReply) {
        lock(&self.repeating).insert(label.to_string(), reply);
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<GenerationRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, label: &str) -> usize {
        lock(&self.calls).iter().filter(|r| r.label == label).count()
    }

    /// Labels in call order.
    pub fn call_labels(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|r| r.label.clone()).collect()
    }

    fn next_reply(&self, label: &str) -> Option<ScriptedReply> {
        let queued = lock(&self.queued)
            .get_mut(label)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| lock(&self.repeating).get(label).cloned())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, LlmError> {
        lock(&self.calls).push(request.clone());
        match self.next_reply(&request.label) {
            Some(ScriptedReply::Text(text)) => Ok(GenerationResponse::stop(&text)),
            Some(ScriptedReply::Fail(err)) => Err(err),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(LlmError::ServiceUnavailable(format!(
                "no scripted reply for '{}'",
                request.label
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_repeat() {
        let generator = ScriptedGenerator::new();
        generator.push("a", ScriptedReply::text("first"));
        generator.repeat("a", ScriptedReply::text("again"));

        let request = GenerationRequest::new("a", "", "");
        assert_eq!(generator.generate(&request).await.unwrap().text, "first");
        assert_eq!(generator.generate(&request).await.unwrap().text, "again");
        assert_eq!(generator.generate(&request).await.unwrap().text, "again");
        assert_eq!(generator.call_count("a"), 3);

        let other = GenerationRequest::new("b", "", "");
        assert!(matches!(
            generator.generate(&other).await,
            Err(LlmError::ServiceUnavailable(_))
        ));
    }
}
