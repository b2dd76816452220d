//! Heuristic response quality scoring and regeneration sessions.
//!
//! The score is in `[0, 1]`. It drops when a response repeats itself
//! (duplicate lines or word trigrams) and when it overlaps heavily with
//! earlier outputs of the same regeneration session. The threshold is a
//! tuning knob, not a correctness contract.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::error::AnalysisError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Responses scoring below this are regenerated.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Previous outputs kept per session for overlap scoring.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Style variation added per retry.
    #[serde(default = "default_variation_step")]
    pub variation_step: f32,
    #[serde(default = "default_max_variation")]
    pub max_variation: f32,
    /// Temperature added at full style variation.
    #[serde(default = "default_temperature_boost")]
    pub temperature_boost: f32,
}

fn default_threshold() -> f32 {
    0.35
}

fn default_history_size() -> usize {
    5
}

fn default_variation_step() -> f32 {
    0.15
}

fn default_max_variation() -> f32 {
    1.0
}

fn default_temperature_boost() -> f32 {
    0.3
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            history_size: default_history_size(),
            variation_step: default_variation_step(),
            max_variation: default_max_variation(),
            temperature_boost: default_temperature_boost(),
        }
    }
}

/// State of one regeneration session.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub attempts: u32,
    pub history: VecDeque<String>,
    pub style_variation: f32,
}

/// Weight of history overlap in the final score.
const OVERLAP_WEIGHT: f32 = 0.7;

/// Score a response against earlier outputs.
pub fn score_response<'a, I>(text: &str, history: I) -> f32
where
    I: IntoIterator<Item = &'a String>,
{
    let repetition = repetition_ratio(text);
    let words = word_set(text);
    let overlap = history
        .into_iter()
        .map(|previous| jaccard(&words, &word_set(previous)))
        .fold(0.0f32, f32::max);

    ((1.0 - repetition) * (1.0 - OVERLAP_WEIGHT * overlap)).clamp(0.0, 1.0)
}

/// Share of duplicated lines or word trigrams, whichever is worse.
fn repetition_ratio(text: &str) -> f32 {
    let lines: Vec<String> = text
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    let line_ratio = duplicate_ratio(&lines);

    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let trigrams: Vec<String> = words.windows(3).map(|w| w.join(" ")).collect();
    let trigram_ratio = duplicate_ratio(&trigrams);

    line_ratio.max(trigram_ratio)
}

fn duplicate_ratio(items: &[String]) -> f32 {
    if items.len() < 2 {
        return 0.0;
    }
    let unique: HashSet<&String> = items.iter().collect();
    1.0 - unique.len() as f32 / items.len() as f32
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() > 2)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Regeneration sessions keyed by caller-chosen keys.
///
/// Sessions are created lazily and live until [`QualityGate::drop_session`].
#[derive(Debug, Default)]
pub struct QualityGate {
    config: QualityConfig,
    sessions: HashMap<String, RetryContext>,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn context(&mut self, key: &str) -> &mut RetryContext {
        self.sessions.entry(key.to_string()).or_default()
    }

    pub fn style_variation(&self, key: &str) -> f32 {
        self.sessions
            .get(key)
            .map(|c| c.style_variation)
            .unwrap_or(0.0)
    }

    /// Score a response, remember it, and reject it if below threshold.
    pub fn assess(&mut self, key: &str, text: &str) -> Result<f32, AnalysisError> {
        let threshold = self.config.threshold;
        let history_size = self.config.history_size;
        let context = self.context(key);

        let score = score_response(text, context.history.iter());
        context.history.push_back(text.to_string());
        while context.history.len() > history_size {
            context.history.pop_front();
        }

        if score < threshold {
            return Err(AnalysisError::QualityInsufficient { score, threshold });
        }
        Ok(score)
    }

    /// Count a retry and widen the style variation.
    pub fn note_retry(&mut self, key: &str) {
        let step = self.config.variation_step;
        let max = self.config.max_variation;
        let context = self.context(key);
        context.attempts += 1;
        context.style_variation = (context.style_variation + step).min(max);
    }

    pub fn drop_session(&mut self, key: &str) {
        self.sessions.remove(key);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_scores_high() {
        let text = "Interests:\n- Rust programming\n- Trail running\n- Film photography";
        let score = score_response(text, std::iter::empty());
        assert!(score > 0.9, "score was {}", score);
    }

    #[test]
    fn test_repeated_lines_score_low() {
        let text = "I like cats.\nI like cats.\nI like cats.\nI like cats.";
        assert!(score_response(text, std::iter::empty()) < 0.35);
    }

    #[test]
    fn test_identical_to_history_scores_low() {
        let text = "Engaging writer focused on open source tooling and community.";
        let history = vec![text.to_string()];
        let score = score_response(text, history.iter());
        assert!(score < 0.35, "score was {}", score);
    }

    #[test]
    fn test_gate_rejects_repeat_and_grows_variation() {
        let mut gate = QualityGate::new(QualityConfig::default());
        let text = "Balanced and thoughtful writer who enjoys technical debates.";
        assert!(gate.assess("ada:basic_info", text).is_ok());
        gate.note_retry("ada:basic_info");
        assert!(matches!(
            gate.assess("ada:basic_info", text),
            Err(AnalysisError::QualityInsufficient { .. })
        ));
        assert!((gate.style_variation("ada:basic_info") - 0.15).abs() < f32::EPSILON);

        for _ in 0..20 {
            gate.note_retry("ada:basic_info");
        }
        assert_eq!(gate.style_variation("ada:basic_info"), 1.0);

        gate.drop_session("ada:basic_info");
        assert_eq!(gate.session_count(), 0);
        assert_eq!(gate.style_variation("ada:basic_info"), 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut gate = QualityGate::new(QualityConfig {
            history_size: 2,
            ..Default::default()
        });
        for i in 0..5 {
            let _ = gate.assess("k", &format!("distinct output number {}", i));
        }
        assert_eq!(gate.context("k").history.len(), 2);
    }
}
