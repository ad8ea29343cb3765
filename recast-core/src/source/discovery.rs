use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DiscoverySection;
use crate::fetch::MediaFetcher;

use super::filter::ContentFilter;
use super::index::VideoIndex;
use super::models::ChannelRef;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub terms_searched: usize,
    pub videos_probed: usize,
    pub probe_failures: usize,
    pub rejected: usize,
    pub channels_found: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub channels: Vec<ChannelRef>,
    pub report: DiscoveryReport,
}

/// Finds channels worth pulling from by probing the search results for
/// each configured term. Results live for the current run only; nothing
/// is persisted.
#[derive(Debug, Clone)]
pub struct ChannelDiscovery {
    search_terms: Vec<String>,
    max_channels: usize,
    probe_limit: usize,
    request_delay_ms: [u64; 2],
}

impl ChannelDiscovery {
    pub fn new(discovery: &DiscoverySection) -> Self {
        Self {
            search_terms: discovery.search_terms.clone(),
            max_channels: discovery.max_channels,
            probe_limit: discovery.probe_limit,
            request_delay_ms: discovery.request_delay_ms,
        }
    }

    /// Search failures are logged per term and do not abort the sweep; an
    /// empty result simply leaves the seed list unsupplemented.
    pub async fn discover<R: Rng>(
        &self,
        rng: &mut R,
        index: &dyn VideoIndex,
        fetcher: &dyn MediaFetcher,
        filter: &ContentFilter,
    ) -> DiscoveryOutcome {
        let mut report = DiscoveryReport::default();
        let mut seen = HashSet::new();
        let mut channels: Vec<ChannelRef> = Vec::new();

        for term in &self.search_terms {
            if channels.len() >= self.max_channels {
                break;
            }
            self.pause(rng).await;
            report.terms_searched += 1;
            let videos = match index.search(term).await {
                Ok(videos) => videos,
                Err(err) => {
                    warn!(term, error = %err, "search failed, moving to next term");
                    continue;
                }
            };
            for video in videos.into_iter().take(self.probe_limit) {
                if channels.len() >= self.max_channels {
                    break;
                }
                let metadata = match fetcher.probe(&video).await {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        debug!(video = %video.id, error = %err, "probe failed during discovery");
                        report.probe_failures += 1;
                        continue;
                    }
                };
                report.videos_probed += 1;
                if !filter.is_relevant(&metadata)
                    || filter.flags_copyright(&metadata)
                    || !filter.within_duration_limit(&metadata)
                {
                    report.rejected += 1;
                    continue;
                }
                let channel = match metadata.channel {
                    Some(channel) => channel,
                    None => {
                        report.rejected += 1;
                        continue;
                    }
                };
                if seen.insert(channel.url.clone()) {
                    debug!(channel = %channel, term, "discovered channel");
                    channels.push(channel);
                }
            }
        }

        report.channels_found = channels.len();
        DiscoveryOutcome { channels, report }
    }

    /// Randomized spacing between search requests.
    async fn pause<R: Rng>(&self, rng: &mut R) {
        let [lo, hi] = self.request_delay_ms;
        let millis = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
        if millis > 0 {
            sleep(Duration::from_millis(millis)).await;
        }
    }
}
