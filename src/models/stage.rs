//! Analysis stages and the fields each one owns.

use serde::{Deserialize, Serialize};

/// One step of the chunked personality analysis.
///
/// Stages are totally ordered and always executed in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    BasicInfo,
    Interests,
    SocialMetrics,
    Communication,
    Vocabulary,
    Emotional,
}

/// Retry family a stage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFamily {
    /// Summary and traits.
    Profile,
    /// Domain-specific categories.
    Domain,
}

impl AnalysisStage {
    pub const ALL: [AnalysisStage; 6] = [
        Self::BasicInfo,
        Self::Interests,
        Self::SocialMetrics,
        Self::Communication,
        Self::Vocabulary,
        Self::Emotional,
    ];

    /// Total number of stages in a full run.
    pub const COUNT: usize = Self::ALL.len();

    /// 1-based position of the stage.
    pub fn index(&self) -> usize {
        match self {
            Self::BasicInfo => 1,
            Self::Interests => 2,
            Self::SocialMetrics => 3,
            Self::Communication => 4,
            Self::Vocabulary => 5,
            Self::Emotional => 6,
        }
    }

    /// Stage at a 1-based position.
    pub fn from_index(index: usize) -> Option<Self> {
        index
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i))
            .copied()
    }

    pub fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Emotional)
    }

    pub fn family(&self) -> StageFamily {
        match self {
            Self::BasicInfo => StageFamily::Profile,
            _ => StageFamily::Domain,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BasicInfo => "basic_info",
            Self::Interests => "interests",
            Self::SocialMetrics => "social_metrics",
            Self::Communication => "communication",
            Self::Vocabulary => "vocabulary",
            Self::Emotional => "emotional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|stage| stage.as_str() == s).copied()
    }

    /// Fields this stage is responsible for producing.
    pub fn relevant_fields(&self) -> &'static [FieldName] {
        match self {
            Self::BasicInfo => &[
                FieldName::Summary,
                FieldName::Traits,
                FieldName::ThoughtProcess,
            ],
            Self::Interests => &[FieldName::Interests, FieldName::TopicsAndThemes],
            Self::SocialMetrics => &[FieldName::SocialBehaviorMetrics],
            Self::Communication => &[FieldName::CommunicationStyle],
            Self::Vocabulary => &[FieldName::Vocabulary],
            Self::Emotional => &[
                FieldName::EmotionalIntelligence,
                FieldName::EmotionalTone,
            ],
        }
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic field of a personality record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    Summary,
    Traits,
    Interests,
    SocialBehaviorMetrics,
    CommunicationStyle,
    Vocabulary,
    EmotionalIntelligence,
    TopicsAndThemes,
    EmotionalTone,
    ThoughtProcess,
}

impl FieldName {
    pub const ALL: [FieldName; 10] = [
        Self::Summary,
        Self::Traits,
        Self::Interests,
        Self::SocialBehaviorMetrics,
        Self::CommunicationStyle,
        Self::Vocabulary,
        Self::EmotionalIntelligence,
        Self::TopicsAndThemes,
        Self::EmotionalTone,
        Self::ThoughtProcess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Traits => "traits",
            Self::Interests => "interests",
            Self::SocialBehaviorMetrics => "socialBehaviorMetrics",
            Self::CommunicationStyle => "communicationStyle",
            Self::Vocabulary => "vocabulary",
            Self::EmotionalIntelligence => "emotionalIntelligence",
            Self::TopicsAndThemes => "topicsAndThemes",
            Self::EmotionalTone => "emotionalTone",
            Self::ThoughtProcess => "thoughtProcess",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|f| f.as_str() == s).copied()
    }

    /// Stage that owns this field.
    pub fn stage(&self) -> AnalysisStage {
        AnalysisStage::ALL
            .iter()
            .find(|stage| stage.relevant_fields().contains(self))
            .copied()
            .unwrap_or(AnalysisStage::BasicInfo)
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
