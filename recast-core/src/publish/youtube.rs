use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::YouTubeSection;
use crate::source::VideoMetadata;

use super::target::{truncate_chars, Publication, PublishError, PublishResult, PublishTarget};

const YOUTUBE: &str = "youtube";
const TITLE_LIMIT: usize = 100;

/// Publishes clips through the YouTube Data API resumable upload flow.
///
/// The OAuth token is re-read from disk on every publish so an external
/// refresher can rotate it without restarting the pipeline.
pub struct YouTubeTarget {
    client: Client,
    api_base: String,
    token_file: PathBuf,
    category_id: String,
    privacy_status: String,
    tags: Vec<String>,
}

impl YouTubeTarget {
    pub fn new(section: &YouTubeSection, token_file: PathBuf) -> PublishResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            api_base: section.api_base.trim_end_matches('/').to_string(),
            token_file,
            category_id: section.category_id.clone(),
            privacy_status: section.privacy_status.clone(),
            tags: section.tags.clone(),
        })
    }

    fn load_token(&self) -> PublishResult<String> {
        let contents =
            fs::read_to_string(&self.token_file).map_err(|err| PublishError::AuthRequired {
                target: YOUTUBE,
                reason: format!("cannot read token file {}: {err}", self.token_file.display()),
            })?;
        match parse_token(&contents) {
            Some(token) => Ok(token),
            None => Err(PublishError::AuthRequired {
                target: YOUTUBE,
                reason: format!(
                    "token file {} holds no usable token",
                    self.token_file.display()
                ),
            }),
        }
    }

    fn request_body(&self, metadata: &VideoMetadata) -> serde_json::Value {
        serde_json::json!({
            "snippet": {
                "title": truncate_chars(&metadata.title, TITLE_LIMIT),
                "description": metadata.description,
                "tags": self.tags,
                "categoryId": self.category_id,
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            }
        })
    }

    async fn open_session(&self, token: &str, metadata: &VideoMetadata) -> PublishResult<String> {
        let url = format!(
            "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
            self.api_base
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&self.request_body(metadata))
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        match location {
            Some(session_url) => Ok(session_url),
            None => Err(PublishError::Transport {
                target: YOUTUBE,
                reason: "resumable session opened without an upload location".to_string(),
            }),
        }
    }

    async fn send_file(&self, token: &str, session_url: &str, file: &Path) -> PublishResult<String> {
        let bytes = tokio::fs::read(file).await?;
        if bytes.is_empty() {
            return Err(PublishError::Rejected {
                target: YOUTUBE,
                reason: format!("{} is empty", file.display()),
            });
        }
        let response = self
            .client
            .put(session_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "video/mp4")
            .body(bytes)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;
        let uploaded: UploadedVideo = response.json().await.map_err(transport)?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl PublishTarget for YouTubeTarget {
    fn name(&self) -> &'static str {
        YOUTUBE
    }

    async fn publish(&self, file: &Path, metadata: &VideoMetadata) -> PublishResult<Publication> {
        let token = self.load_token()?;
        debug!(file = %file.display(), "opening resumable upload session");
        let session_url = self.open_session(&token, metadata).await?;
        let video_id = self.send_file(&token, &session_url, file).await?;
        info!(video_id = %video_id, title = %metadata.title, "published to youtube");
        Ok(Publication::new(YOUTUBE, Some(video_id)))
    }
}

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Accepts either a bare token string or the authorized-user json blob that
/// OAuth tooling writes, which keeps the access token under `token` or
/// `access_token`.
fn parse_token(contents: &str) -> Option<String> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return value
            .get("token")
            .or_else(|| value.get("access_token"))
            .and_then(|token| token.as_str())
            .map(str::to_string);
    }
    Some(trimmed.to_string())
}

fn transport(err: reqwest::Error) -> PublishError {
    PublishError::Transport {
        target: YOUTUBE,
        reason: err.to_string(),
    }
}

async fn check_status(response: Response) -> PublishResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::AuthRequired {
            target: YOUTUBE,
            reason: format!("api returned {status}"),
        },
        StatusCode::TOO_MANY_REQUESTS => PublishError::RateLimited { target: YOUTUBE },
        status if status.is_client_error() => PublishError::Rejected {
            target: YOUTUBE,
            reason: format!("{status}: {}", summarize(&body)),
        },
        status => PublishError::Transport {
            target: YOUTUBE,
            reason: format!("{status}: {}", summarize(&body)),
        },
    })
}

fn summarize(body: &str) -> String {
    let flat = body.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&flat, 200).to_string()
}
