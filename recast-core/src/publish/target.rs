use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::error::{Categorize, ErrorCategory};
use crate::source::VideoMetadata;

/// Errors raised while pushing a finished clip to a destination platform.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{target} session is not authenticated: {reason}")]
    AuthRequired { target: &'static str, reason: String },

    #[error("{target} rate limited the upload")]
    RateLimited { target: &'static str },

    #[error("{target} rejected the upload: {reason}")]
    Rejected { target: &'static str, reason: String },

    #[error("transport failure talking to {target}: {reason}")]
    Transport { target: &'static str, reason: String },

    #[error("browser automation failed on {target}: {reason}")]
    Browser { target: &'static str, reason: String },

    #[error("{target} upload did not finish within {seconds}s")]
    Timeout { target: &'static str, seconds: u64 },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type PublishResult<T> = Result<T, PublishError>;

impl Categorize for PublishError {
    fn category(&self) -> ErrorCategory {
        match self {
            PublishError::AuthRequired { .. } => ErrorCategory::Auth,
            PublishError::RateLimited { .. }
            | PublishError::Transport { .. }
            | PublishError::Browser { .. }
            | PublishError::Timeout { .. } => ErrorCategory::Transient,
            PublishError::Rejected { .. } => ErrorCategory::Validation,
            PublishError::Io(_) => ErrorCategory::Resource,
        }
    }
}

/// Receipt for a clip that reached a platform.
#[derive(Debug, Clone, Serialize)]
pub struct Publication {
    pub target: String,
    /// Platform-side identifier when the platform reports one.
    pub remote_id: Option<String>,
}

impl Publication {
    pub fn new(target: impl Into<String>, remote_id: Option<String>) -> Self {
        Self {
            target: target.into(),
            remote_id,
        }
    }
}

/// A destination platform that accepts finished clips.
///
/// Implementations are independent of each other; the pipeline treats a run
/// as successful when at least one target accepts the clip.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, file: &Path, metadata: &VideoMetadata) -> PublishResult<Publication>;
}

/// Truncates to at most `limit` characters, on a char boundary.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn auth_errors_are_not_retryable() {
        let err = PublishError::AuthRequired {
            target: "tiktok",
            reason: "cookie jar expired".into(),
        };
        assert!(!err.category().is_retryable());

        let err = PublishError::RateLimited { target: "youtube" };
        assert!(err.category().is_retryable());
    }
}
