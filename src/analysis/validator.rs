//! Completeness checks over personality records.

use std::collections::BTreeSet;

use crate::models::{AnalysisStage, FieldName, PersonalityRecord};

/// Domain category that can be reported as specifically incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Interests,
    SocialMetrics,
    EmotionalTone,
    Vocabulary,
    CommunicationPatterns,
}

impl Category {
    /// Categories in the order their errors take precedence.
    pub const PRECEDENCE: [Category; 5] = [
        Self::Interests,
        Self::SocialMetrics,
        Self::EmotionalTone,
        Self::Vocabulary,
        Self::CommunicationPatterns,
    ];

    pub fn field(&self) -> FieldName {
        match self {
            Self::Interests => FieldName::Interests,
            Self::SocialMetrics => FieldName::SocialBehaviorMetrics,
            Self::EmotionalTone => FieldName::EmotionalTone,
            Self::Vocabulary => FieldName::Vocabulary,
            Self::CommunicationPatterns => FieldName::CommunicationStyle,
        }
    }
}

/// Result of validating a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub missing: BTreeSet<FieldName>,
}

impl ValidationReport {
    fn from_missing(missing: BTreeSet<FieldName>) -> Self {
        Self {
            is_valid: missing.is_empty(),
            missing,
        }
    }

    /// Whether a specific category is incomplete.
    pub fn is_incomplete(&self, category: Category) -> bool {
        self.missing.contains(&category.field())
    }

    /// Incomplete categories, in precedence order.
    pub fn incomplete_categories(&self) -> Vec<Category> {
        Category::PRECEDENCE
            .into_iter()
            .filter(|c| self.is_incomplete(*c))
            .collect()
    }

    pub fn missing_list(&self) -> Vec<FieldName> {
        self.missing.iter().copied().collect()
    }
}

/// Validate every field of a record.
pub fn validate(record: &PersonalityRecord) -> ValidationReport {
    ValidationReport::from_missing(record.placeholder_fields())
}

/// Validate only the fields a stage is responsible for.
pub fn validate_stage(stage: AnalysisStage, record: &PersonalityRecord) -> ValidationReport {
    let missing = stage
        .relevant_fields()
        .iter()
        .filter(|f| record.is_placeholder(**f))
        .copied()
        .collect();
    ValidationReport::from_missing(missing)
}
