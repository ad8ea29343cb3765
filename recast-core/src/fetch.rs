use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::PipelineSection;
use crate::error::{Categorize, ErrorCategory};
use crate::source::{ChannelRef, VideoMetadata, VideoRef};

const YT_DLP: &str = "yt-dlp";

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{tool} is not installed or not on PATH")]
    ToolMissing { tool: &'static str },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },
    #[error("video {0} is unavailable on the source platform")]
    Unavailable(String),
    #[error("source platform rate limited the download")]
    RateLimited,
    #[error("{tool} failed: {detail}")]
    Tool { tool: &'static str, detail: String },
    #[error("metadata payload could not be parsed: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("downloaded file missing at {0}")]
    MissingOutput(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Categorize for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Timeout { .. } | FetchError::RateLimited | FetchError::Tool { .. } => {
                ErrorCategory::Transient
            }
            FetchError::Unavailable(_) => ErrorCategory::NotFound,
            FetchError::Payload(_) => ErrorCategory::Validation,
            FetchError::ToolMissing { .. }
            | FetchError::MissingOutput(_)
            | FetchError::Io(_) => ErrorCategory::Resource,
        }
    }
}

/// A fetched video on local disk, alive until the deletion queue reclaims
/// its path.
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub video: VideoRef,
    pub metadata: VideoMetadata,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: Option<String>,
}

/// Retrieves media and metadata for a video reference.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Metadata only, no media download.
    async fn probe(&self, video: &VideoRef) -> FetchResult<VideoMetadata>;

    /// Downloads the media into `destination` and returns the artifact.
    async fn fetch(&self, video: &VideoRef, destination: &Path) -> FetchResult<DownloadedArtifact>;
}

/// Default fetcher shelling out to yt-dlp. One process per call,
/// `kill_on_drop` so an elapsed timeout also reaps the child.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    binary: PathBuf,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(YT_DLP),
            probe_timeout: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(300),
        }
    }
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(pipeline: &PipelineSection) -> Self {
        Self {
            binary: PathBuf::from(YT_DLP),
            probe_timeout: Duration::from_secs(pipeline.probe_timeout_seconds),
            fetch_timeout: Duration::from_secs(pipeline.fetch_timeout_seconds),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn probe(&self, video: &VideoRef) -> FetchResult<VideoMetadata> {
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("--dump-json")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg(&video.url);
        let future = timeout(self.probe_timeout, command.output());
        match future.await {
            Ok(Ok(output)) if output.status.success() => {
                let payload: ProbePayload = serde_json::from_slice(&output.stdout)?;
                Ok(payload.into_metadata())
            }
            Ok(Ok(output)) => Err(classify_tool_failure(YT_DLP, &output.stderr)),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                Err(FetchError::ToolMissing { tool: YT_DLP })
            }
            Ok(Err(err)) => Err(FetchError::Io(err)),
            Err(_) => Err(FetchError::Timeout {
                tool: YT_DLP,
                timeout: self.probe_timeout,
            }),
        }
    }

    async fn fetch(&self, video: &VideoRef, destination: &Path) -> FetchResult<DownloadedArtifact> {
        tokio::fs::create_dir_all(destination).await?;
        let output_path = destination.join(format!("{}.mp4", sanitize_id(&video.id)));
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("--no-warnings")
            .arg("--no-playlist")
            // Downloads and dumps the metadata json in one process.
            .arg("--no-simulate")
            .arg("--dump-json")
            .arg("-f")
            .arg("mp4")
            .arg("-o")
            .arg(&output_path)
            .arg(&video.url);
        let future = timeout(self.fetch_timeout, command.output());
        let output = match future.await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => return Err(classify_tool_failure(YT_DLP, &output.stderr)),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::ToolMissing { tool: YT_DLP })
            }
            Ok(Err(err)) => return Err(FetchError::Io(err)),
            Err(_) => {
                return Err(FetchError::Timeout {
                    tool: YT_DLP,
                    timeout: self.fetch_timeout,
                })
            }
        };

        let payload: ProbePayload = serde_json::from_slice(&output.stdout)?;
        let bytes = match tokio::fs::metadata(&output_path).await {
            Ok(stat) => stat.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(FetchError::MissingOutput(output_path))
            }
            Err(err) => return Err(FetchError::Io(err)),
        };
        let sha256 = file_sha256(&output_path).await?;
        debug!(video = %video.id, path = %output_path.display(), bytes, "download complete");
        Ok(DownloadedArtifact {
            video: video.clone(),
            metadata: payload.into_metadata(),
            path: output_path,
            bytes,
            sha256: Some(sha256),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProbePayload {
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_url: Option<String>,
    uploader_url: Option<String>,
}

impl ProbePayload {
    fn into_metadata(self) -> VideoMetadata {
        let name = self.channel.or(self.uploader);
        let channel = self.channel_url.or(self.uploader_url).map(|url| match name {
            Some(name) => ChannelRef::named(url, name),
            None => ChannelRef::new(url),
        });
        VideoMetadata {
            title: self.title.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            duration_seconds: self.duration.map(|seconds| seconds.round() as u64),
            channel,
        }
    }
}

fn classify_tool_failure(tool: &'static str, stderr: &[u8]) -> FetchError {
    let text = String::from_utf8_lossy(stderr);
    let lowered = text.to_lowercase();
    if lowered.contains("429")
        || lowered.contains("too many requests")
        || lowered.contains("rate limit")
    {
        return FetchError::RateLimited;
    }
    let unavailable = [
        "video unavailable",
        "private video",
        "has been removed",
        "not available",
        "404",
    ];
    if unavailable.iter().any(|marker| lowered.contains(marker)) {
        return FetchError::Unavailable(stderr_tail(&text));
    }
    FetchError::Tool {
        tool,
        detail: stderr_tail(&text),
    }
}

/// Last few stderr lines, enough to identify the failure without dumping
/// a whole progress log into the error chain.
fn stderr_tail(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
