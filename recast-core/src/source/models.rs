use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single video on the source platform. The `id` is the dedup identity;
/// `url` is the canonical watch page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    pub url: String,
}

impl VideoRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A channel on the source platform, either seeded from configuration or
/// discovered at runtime. Identity is the canonical URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub url: String,
    pub name: Option<String>,
}

impl ChannelRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }

    pub fn named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => f.write_str(&self.url),
        }
    }
}

/// Lightweight candidate metadata produced by a probe, without downloading
/// any media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub duration_seconds: Option<u64>,
    pub channel: Option<ChannelRef>,
}

impl VideoMetadata {
    /// Hashtags found in the description, in order of first occurrence,
    /// deduplicated case-insensitively.
    pub fn hashtags(&self) -> Vec<String> {
        let pattern = Regex::new(r"#\w+").expect("valid regex");
        let mut seen = HashSet::new();
        let mut tags = Vec::new();
        for found in pattern.find_iter(&self.description) {
            let raw = found.as_str();
            if seen.insert(raw.to_lowercase()) {
                tags.push(raw.to_string());
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtags_dedup_case_insensitively() {
        let metadata = VideoMetadata {
            description: "street set #Dance #dance crowd #Live #night".to_string(),
            ..VideoMetadata::default()
        };
        assert_eq!(metadata.hashtags(), vec!["#Dance", "#Live", "#night"]);
    }

    #[test]
    fn hashtags_handle_empty_description() {
        assert!(VideoMetadata::default().hashtags().is_empty());
    }

    #[test]
    fn channel_display_prefers_name() {
        let named = ChannelRef::named("https://example.com/c/abc", "Street Beats");
        assert_eq!(named.to_string(), "Street Beats");
        let bare = ChannelRef::new("https://example.com/c/abc");
        assert_eq!(bare.to_string(), "https://example.com/c/abc");
    }
}
