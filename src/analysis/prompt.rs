//! Stage prompts.
//!
//! Every prompt asks for the section headers the parser looks for, so the
//! wording here and the marker tables in `parser` move together.

use serde::{Deserialize, Serialize};

use crate::models::{AnalysisStage, Post, Profile};

/// System prompt shared by every stage.
pub const SYSTEM_PROMPT: &str = "You are an expert at analyzing personality through social media \
writing. Ground every statement in the posts you are given. Use the exact section headers \
requested and never add commentary outside them.";

const PROFILE_HEADER: &str = r#"Analyze the social media profile below.

Profile: {name} (@{handle})
Bio: {bio}
Followers: {followers} | Following: {following}

Posts:
{posts}

Example excerpt:
{examples}
"#;

const BASIC_INFO_PROMPT: &str = r#"Respond with exactly these sections:

Summary:
A 2-3 sentence summary of who this person is.

Core Personality Traits:
- TraitName (score/10): one sentence explanation
(list 3-6 traits)

Thought Process:
One or two sentences on how this person reasons and makes decisions."#;

const INTERESTS_PROMPT: &str = r#"Respond with exactly these sections:

Interests:
- one interest per bullet (list 3-8)

Topics and Themes:
- one recurring topic per bullet (list 3-8)"#;

const SOCIAL_METRICS_PROMPT: &str = r#"Rate each metric from 0 to 100. Respond with exactly this section:

Social Behavior Metrics:
- Engagement: N
- Responsiveness: N
- Originality: N
- Influence: N"#;

const COMMUNICATION_PROMPT: &str = r#"Rate each metric from 0 to 100. Respond with exactly these sections:

Communication Style:
- Formality: N
- Enthusiasm: N
- Technical Level: N
- Emoji Usage: N

Description:
One sentence describing how this person communicates.

Patterns:
- one recurring communication pattern per bullet (list 2-5)"#;

const VOCABULARY_PROMPT: &str = r#"Respond with exactly these sections:

Common Terms: term, term, term, term
Common Phrases: "phrase", "phrase"
Average Sentence Length: N words
Complexity: Low, Moderate, or High with a short qualifier"#;

const EMOTIONAL_PROMPT: &str = r#"Rate each metric from 0 to 100. Respond with exactly these sections:

Emotional Intelligence:
- Empathy: N
- Self-awareness: N
- Social Skills: N
- Emotional Regulation: N

Emotional Tone:
A short phrase describing the overall emotional tone (avoid "Neutral" unless nothing else fits)."#;

const FREE_FORM_PROMPT: &str = r#"Answer the question below about this person, using only what the posts show.

Question: {question}"#;

/// Posts and profile an analysis runs over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub profile: Profile,
    pub posts: Vec<Post>,
}

impl AnalysisInput {
    pub fn new(profile: Profile, posts: Vec<Post>) -> Self {
        Self { profile, posts }
    }

    /// Keep only the most recent `max_posts` posts with text.
    pub fn limited(mut self, max_posts: usize) -> Self {
        self.posts.retain(Post::has_text);
        self.posts.truncate(max_posts);
        self
    }

    pub fn item_count(&self) -> usize {
        self.posts.len()
    }
}

/// Limits applied while rendering prompts.
#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub max_chars: usize,
    pub example_posts: usize,
}

fn stage_instructions(stage: AnalysisStage) -> &'static str {
    match stage {
        AnalysisStage::BasicInfo => BASIC_INFO_PROMPT,
        AnalysisStage::Interests => INTERESTS_PROMPT,
        AnalysisStage::SocialMetrics => SOCIAL_METRICS_PROMPT,
        AnalysisStage::Communication => COMMUNICATION_PROMPT,
        AnalysisStage::Vocabulary => VOCABULARY_PROMPT,
        AnalysisStage::Emotional => EMOTIONAL_PROMPT,
    }
}

/// Build the prompt for one stage.
pub fn stage_prompt(
    stage: AnalysisStage,
    input: &AnalysisInput,
    limits: PromptLimits,
    style_variation: f32,
) -> String {
    let mut prompt = profile_header(input, limits);
    prompt.push('\n');
    prompt.push_str(stage_instructions(stage));
    if let Some(hint) = variation_hint(style_variation) {
        prompt.push_str("\n\n");
        prompt.push_str(hint);
    }
    prompt
}

/// Build a prompt for a free-form question about the profile.
pub fn free_form_prompt(question: &str, input: &AnalysisInput, limits: PromptLimits) -> String {
    let mut prompt = profile_header(input, limits);
    prompt.push('\n');
    prompt.push_str(&FREE_FORM_PROMPT.replace("{question}", question.trim()));
    prompt
}

fn profile_header(input: &AnalysisInput, limits: PromptLimits) -> String {
    let profile = &input.profile;
    PROFILE_HEADER
        .replace("{name}", profile.name())
        .replace("{handle}", &profile.handle)
        .replace("{bio}", profile.bio.as_deref().unwrap_or("(none)"))
        .replace("{followers}", &count(profile.followers))
        .replace("{following}", &count(profile.following))
        .replace("{posts}", &render_posts(&input.posts, limits.max_chars))
        .replace(
            "{examples}",
            &render_examples(&input.posts, limits.example_posts),
        )
}

/// Post texts, one per line, cut off at `max_chars`.
fn render_posts(posts: &[Post], max_chars: usize) -> String {
    let mut out = String::new();
    for post in posts.iter().filter(|p| p.has_text()) {
        let line = format!("- {}\n", collapse(&post.text));
        if out.len() + line.len() > max_chars {
            break;
        }
        out.push_str(&line);
    }
    if out.is_empty() {
        out.push_str("(no posts)\n");
    }
    out
}

fn render_examples(posts: &[Post], count: usize) -> String {
    let examples: Vec<String> = posts
        .iter()
        .filter(|p| p.has_text())
        .take(count)
        .map(|p| {
            let text: String = collapse(&p.text).chars().take(280).collect();
            format!("> {}", text)
        })
        .collect();
    if examples.is_empty() {
        "(none)".to_string()
    } else {
        examples.join("\n")
    }
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Nudge away from earlier phrasings as retries accumulate.
fn variation_hint(variation: f32) -> Option<&'static str> {
    if variation <= 0.0 {
        None
    } else if variation < 0.5 {
        Some("Use fresh wording; do not repeat earlier answers verbatim.")
    } else {
        Some(
            "Previous answers were rejected. Take a different angle, cite different posts, \
             and follow the section format exactly.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AnalysisInput {
        let mut profile = Profile::new("ada");
        profile.bio = Some("Compilers and coffee".to_string());
        AnalysisInput::new(
            profile,
            vec![
                Post::new("Shipped a new release of the parser today."),
                Post::new("   "),
                Post::new("Anyone else benchmarking async runtimes this week?"),
            ],
        )
    }

    fn limits() -> PromptLimits {
        PromptLimits {
            max_chars: 12_000,
            example_posts: 1,
        }
    }

    #[test]
    fn test_stage_prompt_contains_profile_and_headers() {
        let prompt = stage_prompt(AnalysisStage::Interests, &input(), limits(), 0.0);
        assert!(prompt.contains("@ada"));
        assert!(prompt.contains("Compilers and coffee"));
        assert!(prompt.contains("- Shipped a new release"));
        assert!(prompt.contains("Interests:"));
        assert!(prompt.contains("Topics and Themes:"));
        assert!(!prompt.contains("Previous answers"));
    }

    #[test]
    fn test_examples_are_limited() {
        let prompt = stage_prompt(AnalysisStage::BasicInfo, &input(), limits(), 0.0);
        assert_eq!(prompt.matches("\n> ").count(), 1);
    }

    #[test]
    fn test_posts_are_truncated() {
        let prompt = stage_prompt(
            AnalysisStage::BasicInfo,
            &input(),
            PromptLimits {
                max_chars: 50,
                example_posts: 0,
            },
            0.0,
        );
        assert!(prompt.contains("Shipped"));
        assert!(!prompt.contains("- Anyone else"));
    }

    #[test]
    fn test_variation_hint_grows() {
        let low = stage_prompt(AnalysisStage::Vocabulary, &input(), limits(), 0.15);
        assert!(low.contains("fresh wording"));
        let high = stage_prompt(AnalysisStage::Vocabulary, &input(), limits(), 0.9);
        assert!(high.contains("Previous answers were rejected"));
    }

    #[test]
    fn test_limited_drops_blank_posts() {
        let input = input().limited(10);
        assert_eq!(input.item_count(), 2);
    }
}
