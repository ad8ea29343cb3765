use crate::config::RecastConfig;

use super::models::VideoMetadata;

/// Content gate shared by selection and discovery. All checks are
/// case-insensitive substring containment against title plus description;
/// this is a policy heuristic, not a rights determination, and false
/// negatives are expected.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    copyright_markers: Vec<String>,
    topic_keywords: Vec<String>,
    format_keywords: Vec<String>,
    max_duration_seconds: Option<u64>,
}

impl ContentFilter {
    pub fn new(
        copyright_markers: &[String],
        topic_keywords: &[String],
        format_keywords: &[String],
        max_duration_seconds: Option<u64>,
    ) -> Self {
        Self {
            copyright_markers: lowercase_all(copyright_markers),
            topic_keywords: lowercase_all(topic_keywords),
            format_keywords: lowercase_all(format_keywords),
            max_duration_seconds,
        }
    }

    pub fn from_config(config: &RecastConfig) -> Self {
        let cap = match config.discovery.max_duration_seconds {
            0 => None,
            seconds => Some(seconds),
        };
        Self::new(
            &config.selection.copyright_markers,
            &config.discovery.topic_keywords,
            &config.discovery.format_keywords,
            cap,
        )
    }

    /// True when the title or description carries a copyright indicator.
    pub fn flags_copyright(&self, metadata: &VideoMetadata) -> bool {
        let haystack = haystack(metadata);
        self.copyright_markers
            .iter()
            .any(|marker| haystack.contains(marker.as_str()))
    }

    /// True when the metadata mentions at least one topic keyword and at
    /// least one format keyword. An empty keyword list matches everything.
    pub fn is_relevant(&self, metadata: &VideoMetadata) -> bool {
        let haystack = haystack(metadata);
        let topical = self.topic_keywords.is_empty()
            || self
                .topic_keywords
                .iter()
                .any(|keyword| haystack.contains(keyword.as_str()));
        let formatted = self.format_keywords.is_empty()
            || self
                .format_keywords
                .iter()
                .any(|keyword| haystack.contains(keyword.as_str()));
        topical && formatted
    }

    /// Unknown durations pass; probes cannot always determine length.
    pub fn within_duration_limit(&self, metadata: &VideoMetadata) -> bool {
        match (self.max_duration_seconds, metadata.duration_seconds) {
            (Some(limit), Some(duration)) => duration <= limit,
            _ => true,
        }
    }
}

fn haystack(metadata: &VideoMetadata) -> String {
    format!("{} {}", metadata.title, metadata.description).to_lowercase()
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|value| value.to_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ContentFilter {
        ContentFilter::new(
            &["copyright".to_string(), "all rights reserved".to_string()],
            &["dance".to_string(), "street".to_string()],
            &["performance".to_string(), "live".to_string()],
            Some(120),
        )
    }

    fn metadata(title: &str, description: &str, duration: Option<u64>) -> VideoMetadata {
        VideoMetadata {
            title: title.to_string(),
            description: description.to_string(),
            duration_seconds: duration,
            channel: None,
        }
    }

    #[test]
    fn copyright_markers_match_case_insensitively() {
        let meta = metadata("clip", "All Rights Reserved by the label", None);
        assert!(filter().flags_copyright(&meta));
        let clean = metadata("clip", "crowd goes wild", None);
        assert!(!filter().flags_copyright(&clean));
    }

    #[test]
    fn relevance_needs_topic_and_format() {
        assert!(filter().is_relevant(&metadata("Street dance LIVE", "", None)));
        assert!(!filter().is_relevant(&metadata("street dance", "no format word", None)));
        assert!(!filter().is_relevant(&metadata("live set", "no topic word", None)));
    }

    #[test]
    fn empty_keyword_lists_match_everything() {
        let open = ContentFilter::new(&[], &[], &[], None);
        assert!(open.is_relevant(&metadata("anything", "", None)));
    }

    #[test]
    fn duration_limit_passes_unknown_lengths() {
        let gate = filter();
        assert!(gate.within_duration_limit(&metadata("a", "b", None)));
        assert!(gate.within_duration_limit(&metadata("a", "b", Some(90))));
        assert!(!gate.within_duration_limit(&metadata("a", "b", Some(600))));
    }
}
