//! Analysis error taxonomy.
//!
//! Retry-vs-fail decisions are made by matching on [`ErrorKind`], never on
//! error messages.

use std::collections::BTreeSet;

use thiserror::Error;

use super::validator::{Category, ValidationReport};
use crate::llm::LlmError;
use crate::models::FieldName;
use crate::repository::StoreError;

/// Class of a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    ServiceUnavailable,
    Network,
    RateLimited,
    EmptyResponse,
    Upstream,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service unavailable",
            Self::Network => "network",
            Self::RateLimited => "rate limited",
            Self::EmptyResponse => "empty response",
            Self::Upstream => "upstream error",
        }
    }
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried with backoff.
    Transient,
    /// Well-formed but low-confidence output; retried like a transient error.
    QualityInsufficient,
    /// Named fields could not be produced. Retried per stage, tolerated per job.
    FieldIncomplete,
    /// Cancellation, not failure.
    Aborted,
    /// Fails the job immediately.
    Critical,
}

/// Errors that can occur while analyzing a profile.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("missing interests (missing fields: {})", field_list(.missing))]
    MissingInterests { missing: Vec<FieldName> },

    #[error("missing social metrics (missing fields: {})", field_list(.missing))]
    MissingSocialMetrics { missing: Vec<FieldName> },

    #[error("missing emotional tone (missing fields: {})", field_list(.missing))]
    MissingEmotionalTone { missing: Vec<FieldName> },

    #[error("missing vocabulary patterns (missing fields: {})", field_list(.missing))]
    MissingVocabularyPatterns { missing: Vec<FieldName> },

    #[error("missing communication patterns (missing fields: {})", field_list(.missing))]
    MissingCommunicationPatterns { missing: Vec<FieldName> },

    #[error("incomplete analysis (missing fields: {})", field_list(.missing))]
    IncompleteAnalysis { missing: Vec<FieldName> },

    #[error("transient failure ({kind}): {message}")]
    Transient {
        kind: TransientKind,
        message: String,
    },

    #[error("response quality {score:.2} below threshold {threshold:.2}")]
    QualityInsufficient { score: f32, threshold: f32 },

    #[error("analysis aborted")]
    Aborted,

    #[error("job {0} is closed")]
    JobClosed(String),

    #[error("job store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Critical(String),
}

fn field_list(fields: &[FieldName]) -> String {
    fields
        .iter()
        .map(FieldName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl AnalysisError {
    /// Build the most specific field error for a set of missing fields.
    ///
    /// Precedence: interests, social metrics, emotional tone, vocabulary,
    /// communication patterns, then the generic incomplete-analysis error.
    pub fn from_missing(missing: &BTreeSet<FieldName>) -> Self {
        let list: Vec<FieldName> = missing.iter().copied().collect();
        let category = Category::PRECEDENCE
            .into_iter()
            .find(|c| missing.contains(&c.field()));
        match category {
            Some(Category::Interests) => Self::MissingInterests { missing: list },
            Some(Category::SocialMetrics) => Self::MissingSocialMetrics { missing: list },
            Some(Category::EmotionalTone) => Self::MissingEmotionalTone { missing: list },
            Some(Category::Vocabulary) => Self::MissingVocabularyPatterns { missing: list },
            Some(Category::CommunicationPatterns) => {
                Self::MissingCommunicationPatterns { missing: list }
            }
            None => Self::IncompleteAnalysis { missing: list },
        }
    }

    pub fn from_report(report: &ValidationReport) -> Self {
        Self::from_missing(&report.missing)
    }

    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInterests { .. }
            | Self::MissingSocialMetrics { .. }
            | Self::MissingEmotionalTone { .. }
            | Self::MissingVocabularyPatterns { .. }
            | Self::MissingCommunicationPatterns { .. }
            | Self::IncompleteAnalysis { .. } => ErrorKind::FieldIncomplete,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::QualityInsufficient { .. } => ErrorKind::QualityInsufficient,
            Self::Aborted => ErrorKind::Aborted,
            Self::JobClosed(_) | Self::Store(_) | Self::Critical(_) => ErrorKind::Critical,
        }
    }

    /// Fields that could not be produced, for field-specific errors.
    pub fn missing_fields(&self) -> &[FieldName] {
        match self {
            Self::MissingInterests { missing }
            | Self::MissingSocialMetrics { missing }
            | Self::MissingEmotionalTone { missing }
            | Self::MissingVocabularyPatterns { missing }
            | Self::MissingCommunicationPatterns { missing }
            | Self::IncompleteAnalysis { missing } => missing,
            _ => &[],
        }
    }

    /// Whether the dispatcher should re-queue the work item.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transient { kind, .. } => matches!(
                kind,
                TransientKind::Timeout
                    | TransientKind::ServiceUnavailable
                    | TransientKind::Network
                    | TransientKind::RateLimited
            ),
            _ => false,
        }
    }
}

impl From<LlmError> for AnalysisError {
    fn from(err: LlmError) -> Self {
        let message = err.to_string();
        match err {
            LlmError::Timeout(_) => Self::transient(TransientKind::Timeout, message),
            LlmError::ServiceUnavailable(_) => {
                Self::transient(TransientKind::ServiceUnavailable, message)
            }
            LlmError::RateLimited { .. } => Self::transient(TransientKind::RateLimited, message),
            LlmError::Connection(_) => Self::transient(TransientKind::Network, message),
            LlmError::EmptyResponse => Self::transient(TransientKind::EmptyResponse, message),
            LlmError::Api { .. } | LlmError::Parse(_) | LlmError::ModelNotFound(_) => {
                Self::transient(TransientKind::Upstream, message)
            }
            LlmError::Aborted => Self::Aborted,
            LlmError::Disabled => Self::Critical(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_missing_precedence() {
        let missing: BTreeSet<_> = [FieldName::EmotionalTone, FieldName::Interests].into();
        let err = AnalysisError::from_missing(&missing);
        assert!(matches!(err, AnalysisError::MissingInterests { .. }));
        assert_eq!(err.missing_fields().len(), 2);

        let missing: BTreeSet<_> = [FieldName::Vocabulary, FieldName::CommunicationStyle].into();
        assert!(matches!(
            AnalysisError::from_missing(&missing),
            AnalysisError::MissingVocabularyPatterns { .. }
        ));

        let missing: BTreeSet<_> = [FieldName::Summary].into();
        let err = AnalysisError::from_missing(&missing);
        assert!(matches!(err, AnalysisError::IncompleteAnalysis { .. }));
        assert_eq!(err.kind(), ErrorKind::FieldIncomplete);
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn test_llm_errors_classify() {
        let err: AnalysisError = LlmError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());

        let err: AnalysisError = LlmError::EmptyResponse.into();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_retryable());

        let err: AnalysisError = LlmError::Aborted.into();
        assert_eq!(err.kind(), ErrorKind::Aborted);

        let err: AnalysisError = LlmError::Disabled.into();
        assert_eq!(err.kind(), ErrorKind::Critical);
    }
}
