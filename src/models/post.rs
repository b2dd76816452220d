//! Scraped profile and post records.
//!
//! These are produced by the external scraper and consumed as a JSON dump.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public profile information for the analyzed account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub following: Option<u64>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Profile {
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            ..Default::default()
        }
    }

    /// Display name if known, otherwise the handle.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.handle)
    }
}

/// A single scraped post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_repost: bool,
}

impl Post {
    pub fn new(text: &str) -> Self {
        Self {
            id: None,
            text: text.to_string(),
            created_at: None,
            likes: 0,
            reposts: 0,
            replies: 0,
            is_reply: false,
            is_repost: false,
        }
    }

    /// Whether the post carries any analyzable text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Scraper output: a profile and its posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDump {
    pub profile: Profile,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl ProfileDump {
    /// Load a dump from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let dump: Self = serde_json::from_str(&contents)?;
        Ok(dump)
    }

    /// Posts with text, reposts excluded.
    pub fn original_posts(&self) -> Vec<Post> {
        self.posts
            .iter()
            .filter(|p| p.has_text() && !p.is_repost)
            .cloned()
            .collect()
    }
}
