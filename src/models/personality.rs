//! Structured personality record accumulated across analysis stages.
//!
//! A fresh record holds neutral placeholder values for every field. Stage
//! output is merged in field by field: collections are unioned, scalars are
//! only written while they still hold their placeholder.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::stage::FieldName;

/// Mid-scale value used for every 0-100 metric that was not produced.
pub const DEFAULT_METRIC: u8 = 50;

pub const PLACEHOLDER_SUMMARY: &str = "Not enough content to summarize this profile.";
pub const PLACEHOLDER_TRAIT: &str = "Balanced";
pub const PLACEHOLDER_TRAIT_EXPLANATION: &str = "Shows a balanced mix of characteristics.";
pub const PLACEHOLDER_INTEREST: &str = "General topics";
pub const PLACEHOLDER_TOPIC: &str = "Everyday life";
pub const PLACEHOLDER_PATTERN: &str = "Conversational";
pub const PLACEHOLDER_DESCRIPTION: &str = "Balanced communication style.";
pub const PLACEHOLDER_TERM: &str = "general";
pub const PLACEHOLDER_COMPLEXITY: &str = "Moderate";
pub const PLACEHOLDER_TONE: &str = "Neutral";
pub const PLACEHOLDER_THOUGHT: &str = "Not enough content to characterize reasoning.";

/// A named personality trait scored 0-10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trait {
    pub name: String,
    pub score: f32,
    pub explanation: String,
}

impl Trait {
    pub fn new(name: &str, score: f32, explanation: &str) -> Self {
        Self {
            name: name.to_string(),
            score: score.clamp(0.0, 10.0),
            explanation: explanation.to_string(),
        }
    }

    fn placeholder() -> Self {
        Self::new(PLACEHOLDER_TRAIT, 5.0, PLACEHOLDER_TRAIT_EXPLANATION)
    }

    pub fn is_placeholder(&self) -> bool {
        self.name.eq_ignore_ascii_case(PLACEHOLDER_TRAIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialBehaviorMetrics {
    pub engagement: u8,
    pub responsiveness: u8,
    pub originality: u8,
    pub influence: u8,
}

impl Default for SocialBehaviorMetrics {
    fn default() -> Self {
        Self {
            engagement: DEFAULT_METRIC,
            responsiveness: DEFAULT_METRIC,
            originality: DEFAULT_METRIC,
            influence: DEFAULT_METRIC,
        }
    }
}

impl SocialBehaviorMetrics {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationStyle {
    pub formality: u8,
    pub enthusiasm: u8,
    pub technical_level: u8,
    pub emoji_usage: u8,
    pub description: String,
    pub patterns: Vec<String>,
}

impl Default for CommunicationStyle {
    fn default() -> Self {
        Self {
            formality: DEFAULT_METRIC,
            enthusiasm: DEFAULT_METRIC,
            technical_level: DEFAULT_METRIC,
            emoji_usage: DEFAULT_METRIC,
            description: PLACEHOLDER_DESCRIPTION.to_string(),
            patterns: vec![PLACEHOLDER_PATTERN.to_string()],
        }
    }
}

impl CommunicationStyle {
    pub fn metrics_are_default(&self) -> bool {
        [
            self.formality,
            self.enthusiasm,
            self.technical_level,
            self.emoji_usage,
        ]
        .iter()
        .all(|m| *m == DEFAULT_METRIC)
    }

    pub fn patterns_are_placeholder(&self) -> bool {
        is_placeholder_list(&self.patterns, PLACEHOLDER_PATTERN)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    pub common_terms: Vec<String>,
    pub common_phrases: Vec<String>,
    /// Average words per sentence; zero when unknown.
    pub average_sentence_length: f32,
    pub complexity: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            common_terms: vec![PLACEHOLDER_TERM.to_string()],
            common_phrases: Vec::new(),
            average_sentence_length: 0.0,
            complexity: PLACEHOLDER_COMPLEXITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionalIntelligence {
    pub empathy: u8,
    pub self_awareness: u8,
    pub social_skills: u8,
    pub emotional_regulation: u8,
}

impl Default for EmotionalIntelligence {
    fn default() -> Self {
        Self {
            empathy: DEFAULT_METRIC,
            self_awareness: DEFAULT_METRIC,
            social_skills: DEFAULT_METRIC,
            emotional_regulation: DEFAULT_METRIC,
        }
    }
}

impl EmotionalIntelligence {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Accumulated personality analysis for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalityRecord {
    pub summary: String,
    pub traits: Vec<Trait>,
    pub interests: Vec<String>,
    pub social_behavior_metrics: SocialBehaviorMetrics,
    pub communication_style: CommunicationStyle,
    pub vocabulary: Vocabulary,
    pub emotional_intelligence: EmotionalIntelligence,
    pub topics_and_themes: Vec<String>,
    pub emotional_tone: String,
    pub thought_process: String,
}

impl Default for PersonalityRecord {
    fn default() -> Self {
        Self::safe_default()
    }
}

impl PersonalityRecord {
    /// Fully populated record made only of neutral placeholders.
    pub fn safe_default() -> Self {
        Self {
            summary: PLACEHOLDER_SUMMARY.to_string(),
            traits: vec![Trait::placeholder()],
            interests: vec![PLACEHOLDER_INTEREST.to_string()],
            social_behavior_metrics: SocialBehaviorMetrics::default(),
            communication_style: CommunicationStyle::default(),
            vocabulary: Vocabulary::default(),
            emotional_intelligence: EmotionalIntelligence::default(),
            topics_and_themes: vec![PLACEHOLDER_TOPIC.to_string()],
            emotional_tone: PLACEHOLDER_TONE.to_string(),
            thought_process: PLACEHOLDER_THOUGHT.to_string(),
        }
    }

    /// Whether a field is empty or still holds a placeholder value.
    pub fn is_placeholder(&self, field: FieldName) -> bool {
        match field {
            FieldName::Summary => is_placeholder_text(&self.summary, PLACEHOLDER_SUMMARY),
            FieldName::Traits => self.traits.iter().all(Trait::is_placeholder),
            FieldName::Interests => is_placeholder_list(&self.interests, PLACEHOLDER_INTEREST),
            FieldName::SocialBehaviorMetrics => self.social_behavior_metrics.is_default(),
            FieldName::CommunicationStyle => {
                self.communication_style.metrics_are_default()
                    || self.communication_style.patterns_are_placeholder()
            }
            FieldName::Vocabulary => {
                is_placeholder_list(&self.vocabulary.common_terms, PLACEHOLDER_TERM)
            }
            FieldName::EmotionalIntelligence => self.emotional_intelligence.is_default(),
            FieldName::TopicsAndThemes => {
                is_placeholder_list(&self.topics_and_themes, PLACEHOLDER_TOPIC)
            }
            FieldName::EmotionalTone => is_placeholder_text(&self.emotional_tone, PLACEHOLDER_TONE),
            FieldName::ThoughtProcess => {
                is_placeholder_text(&self.thought_process, PLACEHOLDER_THOUGHT)
            }
        }
    }

    /// Every field still holding a placeholder.
    pub fn placeholder_fields(&self) -> BTreeSet<FieldName> {
        FieldName::ALL
            .into_iter()
            .filter(|f| self.is_placeholder(*f))
            .collect()
    }

    /// Merge the given fields of `other` into this record.
    ///
    /// Collection fields are unioned case-insensitively and drop their
    /// placeholder once real values arrive. Scalar fields are only taken
    /// from `other` while this record still holds a placeholder, so a
    /// populated value is never replaced by a later default.
    pub fn merge<I>(&mut self, other: &PersonalityRecord, fields: I)
    where
        I: IntoIterator<Item = FieldName>,
    {
        for field in fields {
            match field {
                FieldName::Summary => {
                    merge_text(&mut self.summary, &other.summary, PLACEHOLDER_SUMMARY)
                }
                FieldName::Traits => merge_traits(&mut self.traits, &other.traits),
                FieldName::Interests => {
                    union_strings(&mut self.interests, &other.interests, PLACEHOLDER_INTEREST)
                }
                FieldName::TopicsAndThemes => union_strings(
                    &mut self.topics_and_themes,
                    &other.topics_and_themes,
                    PLACEHOLDER_TOPIC,
                ),
                FieldName::SocialBehaviorMetrics => {
                    if self.social_behavior_metrics.is_default() {
                        self.social_behavior_metrics = other.social_behavior_metrics;
                    }
                }
                FieldName::CommunicationStyle => {
                    let ours = &mut self.communication_style;
                    let theirs = &other.communication_style;
                    if ours.metrics_are_default() && !theirs.metrics_are_default() {
                        ours.formality = theirs.formality;
                        ours.enthusiasm = theirs.enthusiasm;
                        ours.technical_level = theirs.technical_level;
                        ours.emoji_usage = theirs.emoji_usage;
                    }
                    merge_text(
                        &mut ours.description,
                        &theirs.description,
                        PLACEHOLDER_DESCRIPTION,
                    );
                    union_strings(&mut ours.patterns, &theirs.patterns, PLACEHOLDER_PATTERN);
                }
                FieldName::Vocabulary => {
                    let ours = &mut self.vocabulary;
                    let theirs = &other.vocabulary;
                    union_strings(&mut ours.common_terms, &theirs.common_terms, PLACEHOLDER_TERM);
                    union_strings(&mut ours.common_phrases, &theirs.common_phrases, "");
                    if ours.average_sentence_length <= 0.0 {
                        ours.average_sentence_length = theirs.average_sentence_length;
                    }
                    merge_text(
                        &mut ours.complexity,
                        &theirs.complexity,
                        PLACEHOLDER_COMPLEXITY,
                    );
                }
                FieldName::EmotionalIntelligence => {
                    if self.emotional_intelligence.is_default() {
                        self.emotional_intelligence = other.emotional_intelligence;
                    }
                }
                FieldName::EmotionalTone => {
                    merge_text(&mut self.emotional_tone, &other.emotional_tone, PLACEHOLDER_TONE)
                }
                FieldName::ThoughtProcess => merge_text(
                    &mut self.thought_process,
                    &other.thought_process,
                    PLACEHOLDER_THOUGHT,
                ),
            }
        }
    }

    /// Reset blank fields to their placeholder so the record is fully populated.
    pub fn fill_defaults(&mut self) {
        let defaults = Self::safe_default();
        if self.summary.trim().is_empty() {
            self.summary = defaults.summary;
        }
        if self.traits.is_empty() {
            self.traits = defaults.traits;
        }
        if self.interests.is_empty() {
            self.interests = defaults.interests;
        }
        if self.topics_and_themes.is_empty() {
            self.topics_and_themes = defaults.topics_and_themes;
        }
        if self.communication_style.description.trim().is_empty() {
            self.communication_style.description = defaults.communication_style.description;
        }
        if self.communication_style.patterns.is_empty() {
            self.communication_style.patterns = defaults.communication_style.patterns;
        }
        if self.vocabulary.common_terms.is_empty() {
            self.vocabulary.common_terms = defaults.vocabulary.common_terms;
        }
        if self.vocabulary.complexity.trim().is_empty() {
            self.vocabulary.complexity = defaults.vocabulary.complexity;
        }
        if self.emotional_tone.trim().is_empty() {
            self.emotional_tone = defaults.emotional_tone;
        }
        if self.thought_process.trim().is_empty() {
            self.thought_process = defaults.thought_process;
        }
    }
}

fn is_placeholder_text(value: &str, placeholder: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case(placeholder)
}

fn is_placeholder_list(values: &[String], placeholder: &str) -> bool {
    values
        .iter()
        .all(|v| v.trim().is_empty() || v.trim().eq_ignore_ascii_case(placeholder))
}

fn merge_text(target: &mut String, incoming: &str, placeholder: &str) {
    if is_placeholder_text(target, placeholder) && !is_placeholder_text(incoming, placeholder) {
        *target = incoming.trim().to_string();
    }
}

fn union_strings(target: &mut Vec<String>, incoming: &[String], placeholder: &str) {
    if is_placeholder_list(incoming, placeholder) {
        return;
    }
    target.retain(|v| !is_placeholder_text(v, placeholder));
    for item in incoming {
        let item = item.trim();
        if item.is_empty() || item.eq_ignore_ascii_case(placeholder) {
            continue;
        }
        if !target.iter().any(|v| v.eq_ignore_ascii_case(item)) {
            target.push(item.to_string());
        }
    }
}

fn merge_traits(target: &mut Vec<Trait>, incoming: &[Trait]) {
    if incoming.iter().all(Trait::is_placeholder) {
        return;
    }
    target.retain(|t| !t.is_placeholder());
    for t in incoming.iter().filter(|t| !t.is_placeholder()) {
        match target
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&t.name))
        {
            Some(existing) => {
                if t.score > existing.score {
                    existing.score = t.score;
                }
                if !existing.explanation.contains(t.explanation.as_str()) {
                    existing.explanation = join_explanations(&existing.explanation, &t.explanation);
                }
            }
            None => target.push(t.clone()),
        }
    }
}

/// Join two trait explanations, skipping blanks.
pub(crate) fn join_explanations(first: &str, second: &str) -> String {
    match (first.trim(), second.trim()) {
        ("", b) => b.to_string(),
        (a, "") => a.to_string(),
        (a, b) => format!("{} {}", a, b),
    }
}
