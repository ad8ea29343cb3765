use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupError, CleanupQueue};
use crate::config::{ConfigBundle, RecastConfig};
use crate::error::{Categorize, ConfigError};
use crate::fetch::{DownloadedArtifact, MediaFetcher, YtDlpFetcher};
use crate::history::{DownloadHistory, HistoryError, HistoryRecord};
use crate::overlay::{FfmpegOverlay, OverlayEngine, WatermarkSpec};
use crate::publish::{
    ChromiumUploadSession, PublishError, PublishTarget, TikTokTarget, YouTubeTarget,
};
use crate::retry::RetryPolicy;
use crate::source::{
    CandidateSelector, ChannelDiscovery, ChannelRef, ContentFilter, DiscoveryOutcome,
    DiscoveryReport, HttpVideoIndex, SelectError, SourceError, VideoIndex,
};

use super::report::{PreviewReport, RunReport, TargetFailure};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("history store error: {0}")]
    History(#[from] HistoryError),
    #[error("cleanup store error: {0}")]
    Cleanup(#[from] CleanupError),
    #[error("candidate selection failed: {0}")]
    Selection(#[from] SelectError),
    #[error("publish target setup failed: {0}")]
    Publish(#[from] PublishError),
    #[error("no publish targets are enabled")]
    NoTargets,
    #[error("no channels available to draw from")]
    NoChannels,
    #[error("no publishable candidate after {attempts} channel attempts")]
    ChannelsExhausted { attempts: u32 },
    #[error("all {} publish targets failed", .failures.len())]
    AllTargetsFailed { failures: Vec<TargetFailure> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// A publish destination plus the watermark burned in for it, if any.
pub struct TargetBinding {
    target: Box<dyn PublishTarget>,
    watermark: Option<WatermarkSpec>,
}

impl TargetBinding {
    pub fn new(target: Box<dyn PublishTarget>) -> Self {
        Self {
            target,
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, spec: WatermarkSpec) -> Self {
        self.watermark = Some(spec);
        self
    }

    pub fn name(&self) -> &'static str {
        self.target.name()
    }
}

enum ChannelOutcome {
    Fetched(DownloadedArtifact),
    NoCandidate,
    DownloadsFailed,
}

/// The whole machine: discovery, selection, download, overlay, publishing,
/// and the two stores that make re-runs idempotent.
///
/// One instance drives any number of runs. Each `run_once` call flushes the
/// deletion backlog first, then tries to put exactly one new clip on every
/// enabled target.
pub struct Pipeline<R: Rng = StdRng> {
    recast: RecastConfig,
    index: Box<dyn VideoIndex>,
    fetcher: Box<dyn MediaFetcher>,
    overlay: Box<dyn OverlayEngine>,
    targets: Vec<TargetBinding>,
    history: DownloadHistory,
    cleanup: CleanupQueue,
    filter: ContentFilter,
    selector: CandidateSelector,
    discovery: Option<ChannelDiscovery>,
    download_policy: RetryPolicy,
    overlay_policy: RetryPolicy,
    publish_policy: RetryPolicy,
    rng: R,
}

impl Pipeline<StdRng> {
    pub fn builder(recast: RecastConfig) -> PipelineBuilder<StdRng> {
        PipelineBuilder {
            recast,
            index: None,
            fetcher: None,
            overlay: None,
            targets: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Standard wiring from a loaded config pair: HTTP index, yt-dlp
    /// fetcher, ffmpeg overlay, and one binding per enabled target.
    pub fn from_bundle(bundle: &ConfigBundle) -> PipelineResult<Pipeline<StdRng>> {
        let recast = &bundle.recast;
        let mut builder = Pipeline::builder(recast.clone());

        let youtube = &recast.targets.youtube;
        if youtube.enabled {
            let token_file = recast.resolve_path(&youtube.token_file);
            let target = YouTubeTarget::new(youtube, token_file)?;
            let mut binding = TargetBinding::new(Box::new(target));
            if let Some(section) = &youtube.watermark {
                binding = binding.with_watermark(WatermarkSpec::from_section(section)?);
            }
            builder = builder.target(binding);
        }

        let tiktok = &recast.targets.tiktok;
        if tiktok.enabled {
            let session = ChromiumUploadSession::new(
                bundle.browser.clone(),
                recast.resolve_path(&tiktok.cookies_file),
                tiktok.upload_url.clone(),
                recast.state_dir().join("tiktok-profile"),
            );
            let target = TikTokTarget::new(tiktok, session);
            let mut binding = TargetBinding::new(Box::new(target));
            if let Some(section) = &tiktok.watermark {
                binding = binding.with_watermark(WatermarkSpec::from_section(section)?);
            }
            builder = builder.target(binding);
        }

        builder.build()
    }
}

impl<R: Rng> Pipeline<R> {
    pub fn history(&self) -> &DownloadHistory {
        &self.history
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// One complete pass: flush pending deletions, pick a fresh candidate,
    /// download it, then hand it to every enabled target.
    ///
    /// The downloaded id is marked in history and every produced file is
    /// queued for deletion whether or not any target accepted the clip, so
    /// a failed run never gets re-uploaded and never leaks disk.
    pub async fn run_once(&mut self) -> PipelineResult<RunReport> {
        let mut report = RunReport::new();
        info!(run = %report.run_id, "starting pipeline run");

        report.cleanup = self.cleanup.flush()?;
        if report.cleanup.reclaimed() > 0 {
            info!(
                reclaimed = report.cleanup.reclaimed(),
                "cleared deletion backlog from earlier runs"
            );
        }

        let (mut pool, discovery_report) = self.assemble_pool().await;
        report.discovery = discovery_report;
        report.channels_considered = pool.len();
        if pool.is_empty() {
            return Err(PipelineError::NoChannels);
        }

        let mut attempts = 0u32;
        let (channel, artifact) = loop {
            if pool.is_empty() || attempts >= self.recast.pipeline.channel_attempts {
                return Err(PipelineError::ChannelsExhausted { attempts });
            }
            attempts += 1;
            let slot = self.rng.gen_range(0..pool.len());
            let channel = pool[slot].clone();
            debug!(channel = %channel, attempt = attempts, "drawing from channel");

            match self.try_channel(&channel, &mut report).await? {
                ChannelOutcome::Fetched(artifact) => break (channel, artifact),
                ChannelOutcome::NoCandidate => {
                    info!(channel = %channel, "no publishable candidate here, dropping channel");
                    pool.swap_remove(slot);
                }
                ChannelOutcome::DownloadsFailed => {
                    warn!(channel = %channel, "downloads kept failing, moving to another channel");
                }
            }
        };

        report.channel = Some(channel.url.clone());
        report.video = Some(artifact.video.clone());
        report.title = Some(artifact.metadata.title.clone());

        let mut produced = vec![artifact.path.clone()];
        for binding in &self.targets {
            let name = binding.target.name();
            let upload_path = match &binding.watermark {
                Some(spec) => {
                    let overlay_result = self
                        .overlay_policy
                        .run("overlay", || async {
                            self.overlay.apply_overlay(&artifact.path, spec).await
                        })
                        .await;
                    match overlay_result {
                        Ok(path) => {
                            produced.push(path.clone());
                            path
                        }
                        Err(err) => {
                            warn!(
                                target = name,
                                error = %err,
                                "overlay failed, publishing the original file"
                            );
                            report.overlay_fallbacks.push(name.to_string());
                            artifact.path.clone()
                        }
                    }
                }
                None => artifact.path.clone(),
            };

            let publish_result = self
                .publish_policy
                .run(name, || async {
                    binding.target.publish(&upload_path, &artifact.metadata).await
                })
                .await;
            match publish_result {
                Ok(publication) => {
                    info!(target = name, remote_id = ?publication.remote_id, "target accepted the clip");
                    report.publications.push(publication);
                }
                Err(err) => {
                    warn!(target = name, error = %err, "target rejected the clip");
                    report.failures.push(TargetFailure {
                        target: name.to_string(),
                        error: err.to_string(),
                        category: err.category().as_str(),
                    });
                }
            }
        }

        // Recording is unconditional. A clip that failed everywhere must
        // still never be picked again, and its files must still be
        // reclaimed on the next pass.
        let record = HistoryRecord {
            video_id: artifact.video.id.clone(),
            source_url: artifact.video.url.clone(),
            title: Some(artifact.metadata.title.clone()),
            channel_url: artifact.metadata.channel.as_ref().map(|c| c.url.clone()),
            sha256: artifact.sha256.clone(),
        };
        if !self.history.mark_downloaded(&record)? {
            debug!(video = %artifact.video, "history already held this id");
        }
        for file in &produced {
            self.cleanup.enqueue(file)?;
        }
        report.recorded = true;
        report.finish();

        if report.publications.is_empty() {
            warn!(run = %report.run_id, "every enabled target rejected the clip");
            return Err(PipelineError::AllTargetsFailed {
                failures: report.failures.clone(),
            });
        }
        info!(
            run = %report.run_id,
            published = report.publications.len(),
            failed = report.failures.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Discovery and selection only. Nothing is downloaded, published, or
    /// written to either store.
    pub async fn preview(&mut self) -> PipelineResult<PreviewReport> {
        let mut report = PreviewReport::default();
        let (mut pool, discovery_report) = self.assemble_pool().await;
        report.discovery = discovery_report;
        report.channels_considered = pool.len();
        if pool.is_empty() {
            return Err(PipelineError::NoChannels);
        }

        let slot = self.rng.gen_range(0..pool.len());
        let channel = pool.swap_remove(slot);
        let outcome = self
            .selector
            .select(
                &mut self.rng,
                self.index.as_ref(),
                self.fetcher.as_ref(),
                &self.history,
                &self.filter,
                &channel,
            )
            .await?;

        report.channel = Some(channel.url);
        report.selection = Some(outcome.report);
        if let Some(selection) = outcome.selection {
            report.title = Some(selection.metadata.title.clone());
            report.duration_seconds = selection.metadata.duration_seconds;
            report.video = Some(selection.video);
        }
        Ok(report)
    }

    /// Runs the discovery sweep on its own. Seed channels are not
    /// included; this reports what the search terms actually turned up.
    pub async fn discover(&mut self) -> DiscoveryOutcome {
        match &self.discovery {
            Some(discovery) => {
                discovery
                    .discover(
                        &mut self.rng,
                        self.index.as_ref(),
                        self.fetcher.as_ref(),
                        &self.filter,
                    )
                    .await
            }
            None => DiscoveryOutcome {
                channels: Vec::new(),
                report: DiscoveryReport::default(),
            },
        }
    }

    /// Seed channels first, then whatever discovery turns up, deduplicated
    /// by url.
    async fn assemble_pool(&mut self) -> (Vec<ChannelRef>, Option<DiscoveryReport>) {
        let mut pool: Vec<ChannelRef> = self
            .recast
            .discovery
            .seed_channels
            .iter()
            .map(ChannelRef::new)
            .collect();
        let mut discovery_report = None;
        if let Some(discovery) = &self.discovery {
            let outcome = discovery
                .discover(
                    &mut self.rng,
                    self.index.as_ref(),
                    self.fetcher.as_ref(),
                    &self.filter,
                )
                .await;
            for channel in outcome.channels {
                if !pool.iter().any(|existing| existing.url == channel.url) {
                    pool.push(channel);
                }
            }
            discovery_report = Some(outcome.report);
        }
        (pool, discovery_report)
    }

    /// Tries to land one downloaded artifact from the given channel. A
    /// listing failure counts the same as an empty channel; only store
    /// errors abort the run.
    async fn try_channel(
        &mut self,
        channel: &ChannelRef,
        report: &mut RunReport,
    ) -> PipelineResult<ChannelOutcome> {
        let destination = self.recast.download_dir();
        for attempt in 1..=self.recast.pipeline.video_attempts {
            let outcome = match self
                .selector
                .select(
                    &mut self.rng,
                    self.index.as_ref(),
                    self.fetcher.as_ref(),
                    &self.history,
                    &self.filter,
                    channel,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(SelectError::History(err)) => return Err(err.into()),
                Err(SelectError::Source(err)) => {
                    warn!(channel = %channel, error = %err, "channel listing failed");
                    return Ok(ChannelOutcome::NoCandidate);
                }
            };
            report.selection = Some(outcome.report);
            let selection = match outcome.selection {
                Some(selection) => selection,
                None => return Ok(ChannelOutcome::NoCandidate),
            };
            info!(
                video = %selection.video,
                title = %selection.metadata.title,
                "candidate selected"
            );

            let video = selection.video;
            let fetch_result = self
                .download_policy
                .run("download", || async {
                    self.fetcher.fetch(&video, &destination).await
                })
                .await;
            match fetch_result {
                Ok(artifact) => {
                    info!(video = %artifact.video, bytes = artifact.bytes, "download complete");
                    return Ok(ChannelOutcome::Fetched(artifact));
                }
                Err(err) => {
                    warn!(
                        video = %video,
                        attempt,
                        error = %err,
                        "download failed, drawing another candidate"
                    );
                }
            }
        }
        Ok(ChannelOutcome::DownloadsFailed)
    }
}

pub struct PipelineBuilder<R: Rng> {
    recast: RecastConfig,
    index: Option<Box<dyn VideoIndex>>,
    fetcher: Option<Box<dyn MediaFetcher>>,
    overlay: Option<Box<dyn OverlayEngine>>,
    targets: Vec<TargetBinding>,
    rng: R,
}

impl<R: Rng> PipelineBuilder<R> {
    pub fn index(mut self, index: Box<dyn VideoIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn fetcher(mut self, fetcher: Box<dyn MediaFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn overlay(mut self, overlay: Box<dyn OverlayEngine>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn target(mut self, binding: TargetBinding) -> Self {
        self.targets.push(binding);
        self
    }

    /// Swaps the random source. Tests hand in a seeded generator to make
    /// draws reproducible.
    pub fn rng<R2: Rng>(self, rng: R2) -> PipelineBuilder<R2> {
        PipelineBuilder {
            recast: self.recast,
            index: self.index,
            fetcher: self.fetcher,
            overlay: self.overlay,
            targets: self.targets,
            rng,
        }
    }

    pub fn build(self) -> PipelineResult<Pipeline<R>> {
        if self.targets.is_empty() {
            return Err(PipelineError::NoTargets);
        }
        let recast = self.recast;
        if recast.pipeline.channel_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.channel_attempts",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if recast.pipeline.video_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.video_attempts",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        std::fs::create_dir_all(recast.download_dir())?;
        std::fs::create_dir_all(recast.state_dir())?;

        let history = DownloadHistory::builder().path(recast.history_db()).build()?;
        history.initialize()?;
        let cleanup = CleanupQueue::builder()
            .path(recast.cleanup_db())
            .max_attempts(recast.pipeline.cleanup_max_attempts)
            .build()?;
        cleanup.initialize()?;

        let index = match self.index {
            Some(index) => index,
            None => Box::new(HttpVideoIndex::new(&recast.http)?),
        };
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Box::new(YtDlpFetcher::from_config(&recast.pipeline)));
        let overlay = self.overlay.unwrap_or_else(|| Box::new(FfmpegOverlay::new()));

        let filter = ContentFilter::from_config(&recast);
        let selector = CandidateSelector::new(recast.selection.max_to_check);
        let discovery = if recast.discovery.search_terms.is_empty() {
            None
        } else {
            Some(ChannelDiscovery::new(&recast.discovery))
        };

        let download_policy =
            RetryPolicy::from_section(recast.pipeline.download_attempts, &recast.pipeline)?;
        let overlay_policy =
            RetryPolicy::from_section(recast.pipeline.overlay_attempts, &recast.pipeline)?;
        let publish_policy =
            RetryPolicy::from_section(recast.pipeline.publish_attempts, &recast.pipeline)?;

        Ok(Pipeline {
            recast,
            index,
            fetcher,
            overlay,
            targets: self.targets,
            history,
            cleanup,
            filter,
            selector,
            discovery,
            download_policy,
            overlay_policy,
            publish_policy,
            rng: self.rng,
        })
    }
}
