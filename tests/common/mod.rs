//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use persona::analysis::AnalysisInput;
use persona::llm::{ScriptedGenerator, ScriptedReply};
use persona::models::{AnalysisStage, Post, Profile};

pub const BASIC_INFO: &str = "## Summary\nAda is a curious engineer who shares build logs.\n\n\
**Core Personality Traits:**\n- Analytical (8/10): Breaks problems into steps.\n\
- **Generous** (7/10) - Shares code freely.\n\nThought Process: Methodical and evidence driven.";

pub const INTERESTS: &str = "Interests:\n- Rust programming\n- Trail running\n- Film photography\n\n\
Topics and Themes:\n- Open source\n- Tooling";

pub const SOCIAL: &str = "Social Behavior Metrics:\n- Engagement: 72\n- Responsiveness: 6/10\n\
- Originality: 88%\n- Influence: 40/100";

pub const COMMUNICATION: &str = "Communication Style:\n- Formality: 30\n- Enthusiasm: 80\n\
- Technical Level: 90\n- Emoji Usage: 10\nDescription: Direct and upbeat.\nPatterns:\n\
- Uses rhetorical questions\n- Ends threads with links";

pub const VOCABULARY: &str = "Vocabulary:\nCommon Terms: compiler, borrow, crate, async\n\
Common Phrases: \"ship it\", \"works on my machine\"\nAverage Sentence Length: 14.5 words\n\
Complexity: High";

pub const EMOTIONAL: &str = "Emotional Intelligence:\n- Empathy: 81\n- Self-awareness: 70\n\
- Social Skills: 65\n- Emotional Regulation: 77\n\n\
Overall the emotional tone is warm and encouraging.";

pub fn stage_text(stage: AnalysisStage) -> &'static str {
    match stage {
        AnalysisStage::BasicInfo => BASIC_INFO,
        AnalysisStage::Interests => INTERESTS,
        AnalysisStage::SocialMetrics => SOCIAL,
        AnalysisStage::Communication => COMMUNICATION,
        AnalysisStage::Vocabulary => VOCABULARY,
        AnalysisStage::Emotional => EMOTIONAL,
    }
}

pub fn all_labels() -> Vec<String> {
    AnalysisStage::ALL
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

/// Queue one good reply for each of the given stages.
pub fn script(generator: &ScriptedGenerator, stages: &[AnalysisStage]) {
    for stage in stages {
        generator.push(stage.as_str(), ScriptedReply::text(stage_text(*stage)));
    }
}

pub fn input() -> AnalysisInput {
    let mut profile = Profile::new("ada");
    profile.bio = Some("Compilers, trails and film.".to_string());
    AnalysisInput::new(
        profile,
        vec![
            Post::new("Shipped the new borrow checker pass today, works on my machine."),
            Post::new("Ran 20k on the ridge trail before breakfast."),
            Post::new("Developed a roll of Portra, the colors are wonderful."),
        ],
    )
}
