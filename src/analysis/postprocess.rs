//! Clean-up applied to the merged record before final validation.

use crate::models::{join_explanations, PersonalityRecord, Trait};

/// Minimum Levenshtein similarity for two trait names to be merged.
const TRAIT_SIMILARITY: f32 = 0.8;

/// Shortest name that may absorb a longer one by prefix.
const MIN_PREFIX_LEN: usize = 5;

/// Run every post-processing step.
pub fn post_process(record: &mut PersonalityRecord) {
    record.traits = dedupe_traits(std::mem::take(&mut record.traits));
    record.interests = consolidate_interests(std::mem::take(&mut record.interests));
    record.topics_and_themes = consolidate_interests(std::mem::take(&mut record.topics_and_themes));
}

/// Merge lexically similar traits.
///
/// The merged trait keeps the name and score of the highest-scoring member;
/// explanations are concatenated in encounter order.
pub fn dedupe_traits(traits: Vec<Trait>) -> Vec<Trait> {
    let mut merged: Vec<Trait> = Vec::with_capacity(traits.len());
    for t in traits {
        match merged.iter_mut().find(|m| similar_names(&m.name, &t.name)) {
            Some(existing) => {
                let explanation = if existing.explanation.contains(t.explanation.trim()) {
                    existing.explanation.clone()
                } else {
                    join_explanations(&existing.explanation, &t.explanation)
                };
                if t.score > existing.score {
                    existing.name = t.name;
                    existing.score = t.score;
                }
                existing.explanation = explanation;
            }
            None => merged.push(t),
        }
    }
    merged
}

fn similar_names(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.chars().count() >= MIN_PREFIX_LEN && long.starts_with(short.as_str()) {
        return true;
    }
    levenshtein_similarity(&a, &b) >= TRAIT_SIMILARITY
}

/// Levenshtein similarity in `[0, 1]`.
fn levenshtein_similarity(a: &str, b: &str) -> f32 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 && len_b == 0 {
        return 1.0;
    }
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let distance = levenshtein_distance(a, b);
    1.0 - distance as f32 / len_a.max(len_b) as f32
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut diagonal = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let above = row[j];
            let cost = usize::from(a[i - 1] != b[j - 1]);
            row[j] = (above + 1).min(row[j - 1] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

/// Merge interests where one contains the other, keeping the longer.
///
/// Order follows first appearance of each surviving group.
pub fn consolidate_interests(interests: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::with_capacity(interests.len());
    for interest in interests {
        let trimmed = interest.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        match kept.iter_mut().find(|k| {
            let k = k.to_lowercase();
            k.contains(&lower) || lower.contains(&k)
        }) {
            Some(existing) => {
                if trimmed.chars().count() > existing.chars().count() {
                    *existing = trimmed.to_string();
                }
            }
            None => kept.push(trimmed.to_string()),
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similar_traits_keep_highest() {
        let traits = vec![
            Trait::new("Analytical", 7.0, "Breaks problems down."),
            Trait::new("Analytic", 9.0, "Loves data."),
            Trait::new("Kind", 6.0, "Helps newcomers."),
        ];
        let merged = dedupe_traits(traits);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "Analytic");
        assert_eq!(merged[0].score, 9.0);
        assert!(merged[0].explanation.contains("Breaks problems down."));
        assert!(merged[0].explanation.contains("Loves data."));
        assert_eq!(merged[1].name, "Kind");
    }

    #[test]
    fn test_short_prefixes_do_not_merge() {
        let merged = dedupe_traits(vec![
            Trait::new("Calm", 5.0, ""),
            Trait::new("Calmness-seeking adventurer", 8.0, ""),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert!((levenshtein_similarity("analytic", "analytical") - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_consolidate_interests_keeps_longer() {
        let interests = vec![
            "Rust".to_string(),
            "Photography".to_string(),
            "Rust programming".to_string(),
            "film photography".to_string(),
            "Cycling".to_string(),
        ];
        assert_eq!(
            consolidate_interests(interests),
            vec!["Rust programming", "film photography", "Cycling"]
        );
    }

    #[test]
    fn test_post_process_applies_both() {
        let mut record = PersonalityRecord::safe_default();
        record.traits = vec![
            Trait::new("Curious", 6.0, "Asks questions."),
            Trait::new("curious", 8.0, "Explores."),
        ];
        record.interests = vec!["Chess".to_string(), "chess openings".to_string()];
        post_process(&mut record);
        assert_eq!(record.traits.len(), 1);
        assert_eq!(record.traits[0].score, 8.0);
        assert_eq!(record.interests, vec!["chess openings"]);
    }
}
