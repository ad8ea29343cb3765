use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Response, StatusCode};

use crate::config::HttpSection;

use super::error::{SourceError, SourceResult};
use super::models::{ChannelRef, VideoRef};

/// Read-only view of the source platform's public listings.
#[async_trait]
pub trait VideoIndex: Send + Sync {
    /// Candidate videos for a search term, in the platform's result order.
    async fn search(&self, term: &str) -> SourceResult<Vec<VideoRef>>;

    /// Videos listed on a channel's public page.
    async fn list_channel_videos(&self, channel: &ChannelRef) -> SourceResult<Vec<VideoRef>>;
}

/// Scrapes video ids out of public listing pages. No API key and no
/// session; the only layout assumption is the embedded `videoId` json key
/// with a watch-page anchor fallback.
#[derive(Debug, Clone)]
pub struct HttpVideoIndex {
    client: Client,
    base_url: String,
    user_agents: Vec<String>,
    id_pattern: Regex,
    anchor_pattern: Regex,
}

impl HttpVideoIndex {
    pub fn new(http: &HttpSection) -> SourceResult<Self> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&http.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: http.base_url.trim_end_matches('/').to_string(),
            user_agents: http.user_agents.clone(),
            id_pattern: Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("valid regex"),
            anchor_pattern: Regex::new(r#"href="/watch\?v=([A-Za-z0-9_-]{11})""#)
                .expect("valid regex"),
        })
    }

    async fn get_page(&self, url: &str, context: &str) -> SourceResult<String> {
        let mut request = self.client.get(url);
        if let Some(agent) = self.user_agents.choose(&mut rand::thread_rng()) {
            request = request.header(USER_AGENT, agent.as_str());
        }
        let response = check_status(request.send().await?, context)?;
        Ok(response.text().await?)
    }

    fn extract_video_refs(&self, body: &str) -> Vec<VideoRef> {
        let mut seen = HashSet::new();
        let mut refs = Vec::new();
        for captures in self.id_pattern.captures_iter(body) {
            self.push_unique(&mut seen, &mut refs, &captures[1]);
        }
        if refs.is_empty() {
            // Older page variants render plain anchors instead of the
            // embedded player json.
            for captures in self.anchor_pattern.captures_iter(body) {
                self.push_unique(&mut seen, &mut refs, &captures[1]);
            }
        }
        refs
    }

    fn push_unique(&self, seen: &mut HashSet<String>, refs: &mut Vec<VideoRef>, id: &str) {
        if seen.insert(id.to_string()) {
            refs.push(VideoRef::new(id, format!("{}/watch?v={id}", self.base_url)));
        }
    }
}

#[async_trait]
impl VideoIndex for HttpVideoIndex {
    async fn search(&self, term: &str) -> SourceResult<Vec<VideoRef>> {
        let url = format!(
            "{}/results?search_query={}",
            self.base_url,
            urlencode(term)
        );
        let body = self.get_page(&url, "search results").await?;
        Ok(self.extract_video_refs(&body))
    }

    async fn list_channel_videos(&self, channel: &ChannelRef) -> SourceResult<Vec<VideoRef>> {
        let base = channel.url.trim_end_matches('/');
        let url = if base.ends_with("/videos") {
            base.to_string()
        } else {
            format!("{base}/videos")
        };
        let body = self.get_page(&url, "channel videos").await?;
        Ok(self.extract_video_refs(&body))
    }
}

fn check_status(response: Response, context: &str) -> SourceResult<Response> {
    match response.status() {
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited),
        StatusCode::NOT_FOUND => Err(SourceError::NotFound(context.to_string())),
        status if status.is_success() => Ok(response),
        status => Err(SourceError::InvalidResponse(format!(
            "{context} returned status {status}"
        ))),
    }
}

fn urlencode(term: &str) -> String {
    url::form_urlencoded::byte_serialize(term.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> HttpVideoIndex {
        let http: HttpSection = toml::from_str("").expect("http defaults");
        HttpVideoIndex::new(&http).expect("client builds")
    }

    #[test]
    fn extracts_and_dedups_embedded_video_ids() {
        let body = r#"
            {"videoId":"abcdefghijk","thumbnail":{}}
            {"videoId":"abcdefghijk"}
            {"videoId":"zyxwvutsrq0"}
        "#;
        let refs = index().extract_video_refs(body);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].id, "abcdefghijk");
        assert_eq!(refs[0].url, "https://www.youtube.com/watch?v=abcdefghijk");
        assert_eq!(refs[1].id, "zyxwvutsrq0");
    }

    #[test]
    fn falls_back_to_watch_anchors() {
        let body = r#"<a href="/watch?v=abcdefghijk">clip</a>"#;
        let refs = index().extract_video_refs(body);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, "abcdefghijk");
    }

    #[test]
    fn urlencode_escapes_spaces() {
        assert_eq!(urlencode("street dance live"), "street+dance+live");
    }
}
