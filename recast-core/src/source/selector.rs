use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{Categorize, ErrorCategory};
use crate::fetch::MediaFetcher;
use crate::history::{DownloadHistory, HistoryError};

use super::error::SourceError;
use super::filter::ContentFilter;
use super::index::VideoIndex;
use super::models::{ChannelRef, VideoMetadata, VideoRef};

#[derive(Debug, Error)]
pub enum SelectError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("history lookup failed: {0}")]
    History(#[from] HistoryError),
}

impl Categorize for SelectError {
    fn category(&self) -> ErrorCategory {
        match self {
            SelectError::Source(err) => err.category(),
            SelectError::History(_) => ErrorCategory::Resource,
        }
    }
}

/// One candidate that passed every eligibility gate.
#[derive(Debug, Clone)]
pub struct Selection {
    pub video: VideoRef,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionReport {
    pub listed: usize,
    pub scanned: usize,
    pub already_downloaded: usize,
    pub rejected_copyright: usize,
    pub probe_failures: usize,
    pub eligible: usize,
}

#[derive(Debug)]
pub struct SelectionOutcome {
    pub selection: Option<Selection>,
    pub report: SelectionReport,
}

/// Picks one eligible video from a channel.
///
/// The listing is shuffled before the scan and the returned candidate is
/// a second uniform draw over everything that passed, so neither the
/// platform's result order nor the scan order determines the pick.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    max_to_check: usize,
}

impl CandidateSelector {
    pub fn new(max_to_check: usize) -> Self {
        Self { max_to_check }
    }

    pub async fn select<R: Rng>(
        &self,
        rng: &mut R,
        index: &dyn VideoIndex,
        fetcher: &dyn MediaFetcher,
        history: &DownloadHistory,
        filter: &ContentFilter,
        channel: &ChannelRef,
    ) -> Result<SelectionOutcome, SelectError> {
        let mut report = SelectionReport::default();
        let mut videos = index.list_channel_videos(channel).await?;
        report.listed = videos.len();
        videos.shuffle(rng);

        let mut eligible = Vec::new();
        for video in videos.into_iter().take(self.max_to_check) {
            report.scanned += 1;
            if history.is_downloaded(&video.id)? {
                report.already_downloaded += 1;
                continue;
            }
            let metadata = match fetcher.probe(&video).await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(video = %video.id, error = %err, "probe failed, skipping candidate");
                    report.probe_failures += 1;
                    continue;
                }
            };
            if filter.flags_copyright(&metadata) {
                debug!(video = %video.id, "candidate carries a copyright indicator");
                report.rejected_copyright += 1;
                continue;
            }
            eligible.push(Selection { video, metadata });
        }

        report.eligible = eligible.len();
        let selection = if eligible.is_empty() {
            None
        } else {
            let pick = rng.gen_range(0..eligible.len());
            Some(eligible.swap_remove(pick))
        };
        Ok(SelectionOutcome { selection, report })
    }
}
