//! Response parser turning raw model text into a partial personality record.
//!
//! Parsing is section extraction, not a grammar. The text is split into
//! sections by stage-specific header markers, then every field tries an
//! ordered list of candidate shapes inside its section. The first shape
//! that yields a value wins; later shapes are never consulted.
//!
//! `parse` is total: malformed, empty, or unrelated text simply leaves the
//! stage's fields at their placeholder values.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{
    AnalysisStage, CommunicationStyle, EmotionalIntelligence, FieldName, PersonalityRecord,
    SocialBehaviorMetrics, Trait, Vocabulary,
};

/// Output of parsing one stage's response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStage {
    pub stage: AnalysisStage,
    /// Placeholder record with the stage's fields filled from the response.
    pub record: PersonalityRecord,
    /// Stage fields that were actually extracted.
    pub present: BTreeSet<FieldName>,
}

impl ParsedStage {
    /// Stage fields that could not be extracted.
    pub fn missing(&self) -> BTreeSet<FieldName> {
        self.stage
            .relevant_fields()
            .iter()
            .filter(|f| !self.present.contains(f))
            .copied()
            .collect()
    }
}

/// Header marker for one section of a stage response.
struct SectionMarker {
    key: &'static str,
    aliases: &'static [&'static str],
}

const BASIC_INFO_MARKERS: &[SectionMarker] = &[
    SectionMarker {
        key: "summary",
        aliases: &["summary", "profile summary", "overview"],
    },
    SectionMarker {
        key: "traits",
        aliases: &[
            "core personality traits",
            "personality traits",
            "key traits",
            "traits",
        ],
    },
    SectionMarker {
        key: "thought",
        aliases: &["thought process", "thinking style", "reasoning style"],
    },
];

const INTERESTS_MARKERS: &[SectionMarker] = &[
    SectionMarker {
        key: "interests",
        aliases: &["interests", "interests and hobbies", "hobbies", "main interests"],
    },
    SectionMarker {
        key: "topics",
        aliases: &[
            "topics and themes",
            "topics & themes",
            "recurring themes",
            "topics",
            "themes",
        ],
    },
];

const SOCIAL_MARKERS: &[SectionMarker] = &[SectionMarker {
    key: "social",
    aliases: &[
        "social behavior metrics",
        "social behaviour metrics",
        "social metrics",
        "social behavior",
    ],
}];

const COMMUNICATION_MARKERS: &[SectionMarker] = &[
    SectionMarker {
        key: "style",
        aliases: &["communication style", "communication", "style metrics"],
    },
    SectionMarker {
        key: "description",
        aliases: &["description", "style description"],
    },
    SectionMarker {
        key: "patterns",
        aliases: &["patterns", "communication patterns", "notable patterns"],
    },
];

const VOCABULARY_MARKERS: &[SectionMarker] = &[
    SectionMarker {
        key: "vocabulary",
        aliases: &["vocabulary", "vocabulary analysis", "language"],
    },
    SectionMarker {
        key: "terms",
        aliases: &["common terms", "frequent terms", "key terms", "common words"],
    },
    SectionMarker {
        key: "phrases",
        aliases: &["common phrases", "signature phrases", "phrases"],
    },
    SectionMarker {
        key: "length",
        aliases: &["average sentence length", "sentence length"],
    },
    SectionMarker {
        key: "complexity",
        aliases: &["complexity", "vocabulary complexity", "language complexity"],
    },
];

const EMOTIONAL_MARKERS: &[SectionMarker] = &[
    SectionMarker {
        key: "intelligence",
        aliases: &["emotional intelligence", "emotional metrics"],
    },
    SectionMarker {
        key: "tone",
        aliases: &["emotional tone", "overall tone", "tone"],
    },
];

fn stage_markers(stage: AnalysisStage) -> &'static [SectionMarker] {
    match stage {
        AnalysisStage::BasicInfo => BASIC_INFO_MARKERS,
        AnalysisStage::Interests => INTERESTS_MARKERS,
        AnalysisStage::SocialMetrics => SOCIAL_MARKERS,
        AnalysisStage::Communication => COMMUNICATION_MARKERS,
        AnalysisStage::Vocabulary => VOCABULARY_MARKERS,
        AnalysisStage::Emotional => EMOTIONAL_MARKERS,
    }
}

/// Header line: optional markdown decoration, a short label, optional colon and content.
static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:#{1,6}\s*)?(?:\d+[.)]\s*)?\**\s*(?P<label>[A-Za-z][A-Za-z &/'-]{0,48}?)\s*\**\s*(?::\s*\**\s*(?P<rest>.*))?$",
    )
    .unwrap()
});

/// Split the response into sections keyed by the stage's markers.
fn split_sections(stage: AnalysisStage, text: &str) -> HashMap<&'static str, String> {
    let markers = stage_markers(stage);
    let mut sections: HashMap<&'static str, String> = HashMap::new();
    let mut current: Option<&'static str> = None;

    for line in text.lines() {
        if let Some(caps) = HEADER_LINE.captures(line) {
            let label = caps
                .name("label")
                .map(|m| m.as_str().trim().to_lowercase())
                .unwrap_or_default();
            let has_colon = caps.name("rest").is_some();
            let rest = caps
                .name("rest")
                .map(|m| m.as_str().trim().trim_end_matches('*').trim())
                .unwrap_or("");

            if let Some(marker) = markers.iter().find(|m| m.aliases.contains(&label.as_str())) {
                current = Some(marker.key);
                let section = sections.entry(marker.key).or_default();
                if !rest.is_empty() {
                    section.push_str(rest);
                    section.push('\n');
                }
                continue;
            }

            // Unknown `Label: value` lines and other stages' headers end the section.
            let foreign = AnalysisStage::ALL
                .iter()
                .filter(|s| **s != stage)
                .flat_map(|s| stage_markers(*s))
                .any(|m| m.aliases.contains(&label.as_str()));
            if foreign || has_colon {
                current = None;
                continue;
            }
        }

        if let Some(key) = current {
            let section = sections.entry(key).or_default();
            section.push_str(line);
            section.push('\n');
        }
    }

    sections
}

/// Candidate shape for list-valued fields.
enum ListShape {
    /// Every match's `item` group is one entry.
    Items(Regex),
    /// Every match's `list` group is split on commas and semicolons.
    Delimited(Regex),
}

const BULLET_ITEM: &str = r"(?m)^\s*[-*•+]\s+(?P<item>.+?)\s*$";
const NUMBERED_ITEM: &str = r"(?m)^\s*\d+[.)]\s+(?P<item>.+?)\s*$";
const INLINE_LIST: &str = r"(?m)^\s*(?P<list>[^,;\n]{2,60}(?:[,;][^,;\n]{2,60}){2,})\s*$";
const QUOTED_ITEM: &str = r#"["“](?P<item>[^"“”\n]{2,80})["”]"#;

static INTEREST_SHAPES: LazyLock<Vec<ListShape>> = LazyLock::new(|| {
    vec![
        ListShape::Items(Regex::new(BULLET_ITEM).unwrap()),
        ListShape::Items(Regex::new(NUMBERED_ITEM).unwrap()),
        ListShape::Delimited(Regex::new(INLINE_LIST).unwrap()),
    ]
});

static PATTERN_SHAPES: LazyLock<Vec<ListShape>> = LazyLock::new(|| {
    vec![
        ListShape::Items(Regex::new(BULLET_ITEM).unwrap()),
        ListShape::Items(Regex::new(NUMBERED_ITEM).unwrap()),
        ListShape::Delimited(Regex::new(INLINE_LIST).unwrap()),
    ]
});

static TERM_SHAPES: LazyLock<Vec<ListShape>> = LazyLock::new(|| {
    vec![
        ListShape::Delimited(Regex::new(r"(?m)^\s*(?P<list>[^\n]*[,;][^\n]*)$").unwrap()),
        ListShape::Items(Regex::new(BULLET_ITEM).unwrap()),
        ListShape::Items(Regex::new(NUMBERED_ITEM).unwrap()),
    ]
});

static PHRASE_SHAPES: LazyLock<Vec<ListShape>> = LazyLock::new(|| {
    vec![
        ListShape::Items(Regex::new(QUOTED_ITEM).unwrap()),
        ListShape::Items(Regex::new(BULLET_ITEM).unwrap()),
        ListShape::Delimited(Regex::new(r"(?m)^\s*(?P<list>[^\n]*[,;][^\n]*)$").unwrap()),
    ]
});

/// Trait shapes, in precedence order.
///
/// 1. `- Analytical (7/10): breaks problems down`
/// 2. `- Analytical: 7/10 - breaks problems down`
/// 3. `- Analytical - breaks problems down` (unscored)
static TRAIT_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(
            r"(?m)^\s*(?:[-*•+]|\d+[.)])\s*\**(?P<name>[A-Za-z][A-Za-z '\-]{0,40}?)\**\s*[\[(]\s*(?P<score>\d+(?:\.\d+)?)\s*(?:/\s*10)?\s*[\])]\s*\**\s*(?:[:\-–]\s*(?P<explanation>.*))?$",
        )
        .unwrap(),
        Regex::new(
            r"(?m)^\s*(?:[-*•+]|\d+[.)])\s*\**(?P<name>[A-Za-z][A-Za-z '\-]{0,40}?)\**\s*[:\-–]\s*\**(?P<score>\d+(?:\.\d+)?)\s*/\s*10\**\s*(?:[:\-–,.]\s*(?P<explanation>.*))?$",
        )
        .unwrap(),
        Regex::new(
            r"(?m)^\s*(?:[-*•+]|\d+[.)])\s*\**(?P<name>[A-Za-z][A-Za-z '\-]{0,40}?)\**\s*[:\-–]\s+(?P<explanation>.+)$",
        )
        .unwrap(),
    ]
});

/// Score given to traits listed without one.
const UNSCORED_TRAIT: f32 = 5.0;

/// Labels accepted for each 0-100 metric.
const METRIC_LABELS: &[(&str, &str)] = &[
    ("engagement", "engagement level|engagement"),
    ("responsiveness", "responsiveness|response rate"),
    ("originality", "originality|original content"),
    ("influence", "influence|reach"),
    ("formality", "formality"),
    ("enthusiasm", "enthusiasm"),
    ("technical_level", "technical level|technicality|technical"),
    ("emoji_usage", "emoji usage|emoji use|emojis?"),
    ("empathy", "empathy"),
    ("self_awareness", "self[- ]awareness"),
    ("social_skills", "social skills"),
    ("emotional_regulation", "emotional regulation|self[- ]regulation"),
];

struct MetricShapes {
    key: &'static str,
    shapes: Vec<Regex>,
}

/// Metric shapes: a labeled line first, then a loose label-near-number match.
static METRIC_SHAPES: LazyLock<Vec<MetricShapes>> = LazyLock::new(|| {
    METRIC_LABELS
        .iter()
        .map(|&(key, labels)| MetricShapes {
            key,
            shapes: vec![
                Regex::new(&format!(
                    r"(?im)^[^A-Za-z0-9\n]*(?:{labels})[*\s]*[:=\-–][*\s]*(?P<value>\d{{1,3}}(?:\.\d+)?)\s*(?P<scale>/\s*100|/\s*10|%)?"
                ))
                .unwrap(),
                Regex::new(&format!(
                    r"(?i)\b(?:{labels})\b[^0-9\n]{{0,30}}?(?P<value>\d{{1,3}}(?:\.\d+)?)\s*(?P<scale>/\s*100|/\s*10|%)?"
                ))
                .unwrap(),
            ],
        })
        .collect()
});

/// Section body shapes for free-text fields.
static TEXT_SHAPES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#"^\s*["“](?P<text>[^"“”]{3,})["”]"#).unwrap(),
        Regex::new(r"(?s)^\s*(?P<text>\S.*?)(?:\n\s*\n|\z)").unwrap(),
    ]
});

/// Inline fallbacks for the emotional tone when no tone section exists.
static TONE_INLINE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?im)\b(?:overall|emotional)\s+tone\s+(?:is|was|appears)\s+(?P<text>[^.\n]{3,80})")
            .unwrap(),
        Regex::new(r"(?im)\btone\s*[:\-–]\s*(?P<text>[^\n]{3,80})").unwrap(),
    ]
});

static SENTENCE_LENGTH: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)average\s+sentence\s+length[^0-9\n]{0,20}(?P<value>\d+(?:\.\d+)?)").unwrap(),
        Regex::new(r"(?P<value>\d+(?:\.\d+)?)").unwrap(),
    ]
});

/// Maximum characters kept for free-text fields.
const MAX_TEXT_CHARS: usize = 600;

/// Parse a stage response into a partial record.
pub fn parse(stage: AnalysisStage, text: &str) -> ParsedStage {
    let sections = split_sections(stage, text);
    let mut record = PersonalityRecord::safe_default();

    match stage {
        AnalysisStage::BasicInfo => {
            if let Some(summary) = section(&sections, "summary").and_then(extract_text) {
                record.summary = summary;
            }
            if let Some(traits) = section(&sections, "traits").and_then(extract_traits) {
                record.traits = traits;
            }
            if let Some(thought) = section(&sections, "thought").and_then(extract_text) {
                record.thought_process = thought;
            }
        }
        AnalysisStage::Interests => {
            if let Some(items) = section(&sections, "interests")
                .and_then(|s| extract_list(&INTEREST_SHAPES, s))
            {
                record.interests = items;
            }
            if let Some(items) =
                section(&sections, "topics").and_then(|s| extract_list(&INTEREST_SHAPES, s))
            {
                record.topics_and_themes = items;
            }
        }
        AnalysisStage::SocialMetrics => {
            let scope = section(&sections, "social").unwrap_or(text);
            let defaults = SocialBehaviorMetrics::default();
            record.social_behavior_metrics = SocialBehaviorMetrics {
                engagement: scoped_metric("engagement", scope, text).unwrap_or(defaults.engagement),
                responsiveness: scoped_metric("responsiveness", scope, text)
                    .unwrap_or(defaults.responsiveness),
                originality: scoped_metric("originality", scope, text)
                    .unwrap_or(defaults.originality),
                influence: scoped_metric("influence", scope, text).unwrap_or(defaults.influence),
            };
        }
        AnalysisStage::Communication => {
            let scope = section(&sections, "style").unwrap_or(text);
            let defaults = CommunicationStyle::default();
            let description = section(&sections, "description")
                .and_then(extract_text)
                .unwrap_or(defaults.description);
            let patterns = section(&sections, "patterns")
                .and_then(|s| extract_list(&PATTERN_SHAPES, s))
                .unwrap_or(defaults.patterns);
            record.communication_style = CommunicationStyle {
                formality: scoped_metric("formality", scope, text).unwrap_or(defaults.formality),
                enthusiasm: scoped_metric("enthusiasm", scope, text).unwrap_or(defaults.enthusiasm),
                technical_level: scoped_metric("technical_level", scope, text)
                    .unwrap_or(defaults.technical_level),
                emoji_usage: scoped_metric("emoji_usage", scope, text)
                    .unwrap_or(defaults.emoji_usage),
                description,
                patterns,
            };
        }
        AnalysisStage::Vocabulary => {
            let defaults = Vocabulary::default();
            let terms = section(&sections, "terms")
                .or_else(|| section(&sections, "vocabulary"))
                .and_then(|s| extract_list(&TERM_SHAPES, s))
                .unwrap_or(defaults.common_terms);
            let phrases = section(&sections, "phrases")
                .and_then(|s| extract_list(&PHRASE_SHAPES, s))
                .unwrap_or(defaults.common_phrases);
            let average_sentence_length = section(&sections, "length")
                .and_then(extract_number)
                .or_else(|| SENTENCE_LENGTH[0].captures(text).and_then(|c| number(&c)))
                .unwrap_or(defaults.average_sentence_length);
            let complexity = section(&sections, "complexity")
                .and_then(extract_text)
                .unwrap_or(defaults.complexity);
            record.vocabulary = Vocabulary {
                common_terms: terms,
                common_phrases: phrases,
                average_sentence_length,
                complexity,
            };
        }
        AnalysisStage::Emotional => {
            let scope = section(&sections, "intelligence").unwrap_or(text);
            let defaults = EmotionalIntelligence::default();
            record.emotional_intelligence = EmotionalIntelligence {
                empathy: scoped_metric("empathy", scope, text).unwrap_or(defaults.empathy),
                self_awareness: scoped_metric("self_awareness", scope, text)
                    .unwrap_or(defaults.self_awareness),
                social_skills: scoped_metric("social_skills", scope, text)
                    .unwrap_or(defaults.social_skills),
                emotional_regulation: scoped_metric("emotional_regulation", scope, text)
                    .unwrap_or(defaults.emotional_regulation),
            };
            let tone = section(&sections, "tone")
                .and_then(extract_text)
                .or_else(|| first_inline(&TONE_INLINE, text));
            if let Some(tone) = tone {
                record.emotional_tone = tone;
            }
        }
    }

    let present = stage
        .relevant_fields()
        .iter()
        .filter(|f| !record.is_placeholder(**f))
        .copied()
        .collect();

    ParsedStage {
        stage,
        record,
        present,
    }
}

fn section<'a>(sections: &'a HashMap<&'static str, String>, key: &str) -> Option<&'a str> {
    sections
        .get(key)
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn extract_list(shapes: &[ListShape], scope: &str) -> Option<Vec<String>> {
    for shape in shapes {
        let mut items: Vec<String> = Vec::new();
        match shape {
            ListShape::Items(re) => {
                for caps in re.captures_iter(scope) {
                    if let Some(item) = caps.name("item").and_then(|m| clean_item(m.as_str())) {
                        push_unique(&mut items, item);
                    }
                }
            }
            ListShape::Delimited(re) => {
                for caps in re.captures_iter(scope) {
                    let Some(list) = caps.name("list") else {
                        continue;
                    };
                    for part in list.as_str().split([',', ';']) {
                        if let Some(item) = clean_item(part) {
                            push_unique(&mut items, item);
                        }
                    }
                }
            }
        }
        if !items.is_empty() {
            return Some(items);
        }
    }
    None
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.iter().any(|i| i.eq_ignore_ascii_case(&item)) {
        items.push(item);
    }
}

/// Normalize a list entry: drop decoration and any trailing explanation.
fn clean_item(raw: &str) -> Option<String> {
    let mut item = raw.trim().trim_matches('*').trim();
    for sep in [": ", " - ", " – ", " — "] {
        if let Some((head, _)) = item.split_once(sep) {
            if !head.trim().is_empty() {
                item = head;
            }
        }
    }
    let item = item
        .trim()
        .trim_matches(|c: char| c == '*' || c == '"' || c == '“' || c == '”' || c == '\'')
        .trim_end_matches(['.', ':'])
        .trim();
    let item = item
        .strip_prefix("and ")
        .or_else(|| item.strip_prefix("or "))
        .unwrap_or(item)
        .trim();

    if item.is_empty() || item.chars().count() > 60 || item.split_whitespace().count() > 6 {
        return None;
    }
    Some(item.to_string())
}

fn extract_traits(scope: &str) -> Option<Vec<Trait>> {
    for shape in TRAIT_SHAPES.iter() {
        let mut traits: Vec<Trait> = Vec::new();
        for caps in shape.captures_iter(scope) {
            let Some(name) = caps.name("name").map(|m| m.as_str().trim()) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let score = caps
                .name("score")
                .and_then(|m| m.as_str().parse::<f32>().ok())
                .unwrap_or(UNSCORED_TRAIT);
            let explanation = caps
                .name("explanation")
                .map(|m| clean_text(m.as_str()))
                .unwrap_or_default();
            if !traits.iter().any(|t| t.name.eq_ignore_ascii_case(name)) {
                traits.push(Trait::new(name, score, &explanation));
            }
        }
        if !traits.is_empty() {
            return Some(traits);
        }
    }
    None
}

fn extract_metric(key: &str, scope: &str) -> Option<u8> {
    let shapes = METRIC_SHAPES.iter().find(|m| m.key == key)?;
    shapes.shapes.iter().find_map(|re| {
        let caps = re.captures(scope)?;
        let value: f32 = caps.name("value")?.as_str().parse().ok()?;
        let scaled = match caps.name("scale").map(|m| m.as_str().replace(' ', "")) {
            Some(scale) if scale == "/10" => value * 10.0,
            _ => value,
        };
        Some(scaled.clamp(0.0, 100.0).round() as u8)
    })
}

/// Metric from its section, falling back to the whole response when the
/// section header carried its own text and cut the section short.
fn scoped_metric(key: &str, scope: &str, text: &str) -> Option<u8> {
    extract_metric(key, scope).or_else(|| extract_metric(key, text))
}

fn extract_text(scope: &str) -> Option<String> {
    TEXT_SHAPES.iter().find_map(|re| {
        let caps = re.captures(scope)?;
        let text = clean_text(caps.name("text")?.as_str());
        (!text.is_empty()).then_some(text)
    })
}

fn first_inline(shapes: &[Regex], text: &str) -> Option<String> {
    shapes.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let value = clean_text(caps.name("text")?.as_str());
        (!value.is_empty()).then_some(value)
    })
}

fn extract_number(scope: &str) -> Option<f32> {
    SENTENCE_LENGTH.iter().find_map(|re| number(&re.captures(scope)?))
}

fn number(caps: &regex::Captures<'_>) -> Option<f32> {
    caps.name("value")?
        .as_str()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Collapse whitespace, strip list and markdown decoration, cap the length.
fn clean_text(raw: &str) -> String {
    let joined = raw
        .lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['-', '•', '+'])
                .trim()
                .replace("**", "")
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '"' || c == '“' || c == '”');
    trimmed.chars().take(MAX_TEXT_CHARS).collect::<String>().trim().to_string()
}
