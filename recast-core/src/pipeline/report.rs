use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cleanup::CleanupReport;
use crate::publish::Publication;
use crate::source::{DiscoveryReport, SelectionReport, VideoRef};

/// One publish target that did not accept the clip. The run carries on past
/// these; they are collected for the final report.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub target: String,
    pub error: String,
    pub category: &'static str,
}

/// Everything a single pass through the pipeline did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cleanup: CleanupReport,
    pub discovery: Option<DiscoveryReport>,
    pub channels_considered: usize,
    pub selection: Option<SelectionReport>,
    pub channel: Option<String>,
    pub video: Option<VideoRef>,
    pub title: Option<String>,
    pub publications: Vec<Publication>,
    pub failures: Vec<TargetFailure>,
    /// Targets that received the original file because their overlay failed.
    pub overlay_fallbacks: Vec<String>,
    pub recorded: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            cleanup: CleanupReport::default(),
            discovery: None,
            channels_considered: 0,
            selection: None,
            channel: None,
            video: None,
            title: None,
            publications: Vec::new(),
            failures: Vec::new(),
            overlay_fallbacks: Vec::new(),
            recorded: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        !self.publications.is_empty()
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|end| end.signed_duration_since(self.started_at).num_seconds())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Dry-run outcome: what would be picked, with nothing downloaded,
/// published, or recorded.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewReport {
    pub discovery: Option<DiscoveryReport>,
    pub channels_considered: usize,
    pub channel: Option<String>,
    pub selection: Option<SelectionReport>,
    pub video: Option<VideoRef>,
    pub title: Option<String>,
    pub duration_seconds: Option<u64>,
}
