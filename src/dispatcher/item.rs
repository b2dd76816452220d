//! Queued work items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::DispatchError;

/// Kind of work an item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkKind {
    /// Full six-stage profile analysis.
    Analysis,
    /// Single free-form question.
    Chat,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Chat => "chat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called with the handler's output when an item succeeds.
pub type OnComplete = Box<dyn FnOnce(serde_json::Value) + Send>;

/// Called once when an item fails for good, is cancelled or is cut off by
/// shutdown.
pub type OnError = Box<dyn FnOnce(DispatchError) + Send>;

/// What a handler sees of a dispatched item.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub id: String,
    pub kind: WorkKind,
    pub identity: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// An item owned by the dispatcher loop.
pub(crate) struct WorkItem {
    pub id: String,
    /// Enqueue order; re-queued items keep theirs.
    pub seq: u64,
    pub kind: WorkKind,
    pub identity: String,
    pub payload: serde_json::Value,
    /// Attempts started so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Backoff gate for retries.
    pub not_before: Option<Instant>,
    /// Set when the caller cancelled the item while it was in flight.
    pub cancelled: bool,
    pub on_complete: OnComplete,
    pub on_error: OnError,
}

impl WorkItem {
    pub fn request(&self) -> WorkRequest {
        WorkRequest {
            id: self.id.clone(),
            kind: self.kind,
            identity: self.identity.clone(),
            payload: self.payload.clone(),
            attempt: self.attempts,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }

    pub fn fail(self, err: DispatchError) {
        (self.on_error)(err);
    }
}
