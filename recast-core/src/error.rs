use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Coarse failure classes shared by every collaborator error type. The
/// retry policy and the orchestrator branch on the category, never on the
/// concrete error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network blips, rate limits, temporary locks. Worth retrying.
    Transient,
    /// The referenced item is gone or blocked. Skip it, do not retry.
    NotFound,
    /// The platform rejected the content itself. Retrying cannot help.
    Validation,
    /// Disk full, unwritable directory, missing tool. Fatal to the run.
    Resource,
    /// Credentials are missing or expired. Needs external re-auth.
    Auth,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Auth => "auth",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Categorize {
    fn category(&self) -> ErrorCategory;
}
