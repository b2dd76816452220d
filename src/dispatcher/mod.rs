//! Rate-limited request dispatcher.
//!
//! A single background task owns the FIFO queue, the [`RateLimiter`] and the
//! set of in-flight items. [`Dispatcher`] handles talk to it over a command
//! channel; finished work comes back through a `JoinSet`.
//!
//! [`RateLimiter`]: crate::rate_limit::RateLimiter

mod config;
mod handler;
mod item;
mod runner;
mod snapshot;

pub use config::DispatcherConfig;
pub use handler::{AnalysisPayload, PipelineHandler, WorkHandler};
pub use item::{OnComplete, OnError, WorkKind, WorkRequest};
pub use runner::{Dispatcher, QueueStatus};
pub use snapshot::{QueueSnapshot, SnapshotItem};

use thiserror::Error;

use crate::analysis::AnalysisError;
use crate::repository::DbError;

/// Errors surfaced to dispatcher callers and `on_error` callbacks.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("work item failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: AnalysisError,
    },

    #[error("work item was cancelled")]
    Cancelled,

    #[error("dispatcher shut down before the item finished")]
    Shutdown,

    #[error("dispatcher is not running")]
    Closed,

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] rusqlite::Error),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
