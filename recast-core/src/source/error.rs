use thiserror::Error;

use crate::error::{Categorize, ErrorCategory};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to source platform failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source platform rate limited the request")]
    RateLimited,
    #[error("{0} not found on source platform")]
    NotFound(String),
    #[error("unexpected response from source platform: {0}")]
    InvalidResponse(String),
}

pub type SourceResult<T> = Result<T, SourceError>;

impl Categorize for SourceError {
    fn category(&self) -> ErrorCategory {
        match self {
            SourceError::Http(_) | SourceError::RateLimited => ErrorCategory::Transient,
            SourceError::NotFound(_) => ErrorCategory::NotFound,
            SourceError::InvalidResponse(_) => ErrorCategory::Validation,
        }
    }
}
