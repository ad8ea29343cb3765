use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tempfile::TempDir;

use recast_core::config::WatermarkSection;
use recast_core::{
    ChannelRef, DownloadedArtifact, FetchError, FetchResult, MediaFetcher, OverlayEngine,
    OverlayError, OverlayResult, Pipeline, PipelineError, Publication, PublishError,
    PublishResult, PublishTarget, RecastConfig, SourceResult, TargetBinding, VideoIndex,
    VideoMetadata, VideoRef, WatermarkSpec,
};

const CHANNEL_URL: &str = "https://www.youtube.com/@seeded";

fn test_config(base: &Path) -> RecastConfig {
    let raw = format!(
        r##"
        [paths]
        base_dir = "{base}"
        download_dir = "downloads"
        state_dir = "state"
        logs_dir = "logs"

        [http]

        [pipeline]
        channel_attempts = 2
        video_attempts = 2
        download_attempts = 3
        publish_attempts = 1
        overlay_attempts = 1
        retry_initial_delay_seconds = 1

        [discovery]
        seed_channels = ["{channel}"]
        search_terms = []
        max_channels = 4
        request_delay_ms = [0, 0]
        topic_keywords = ["dance"]
        format_keywords = ["#shorts"]

        [selection]

        [targets.youtube]
        enabled = false
        token_file = "unused.json"

        [targets.tiktok]
        enabled = false
        cookies_file = "unused.json"
        "##,
        base = base.display(),
        channel = CHANNEL_URL,
    );
    toml::from_str(&raw).expect("test config")
}

fn video(id: &str) -> VideoRef {
    VideoRef::new(id, format!("https://www.youtube.com/watch?v={id}"))
}

fn metadata(title: &str) -> VideoMetadata {
    VideoMetadata {
        title: title.to_string(),
        description: "crowd favourite #shorts #dance".to_string(),
        duration_seconds: Some(40),
        channel: Some(ChannelRef::new(CHANNEL_URL)),
    }
}

struct MockIndex {
    listings: Vec<VideoRef>,
}

#[async_trait]
impl VideoIndex for MockIndex {
    async fn search(&self, _term: &str) -> SourceResult<Vec<VideoRef>> {
        Ok(Vec::new())
    }

    async fn list_channel_videos(&self, _channel: &ChannelRef) -> SourceResult<Vec<VideoRef>> {
        Ok(self.listings.clone())
    }
}

struct ScriptedFetcher {
    metadata: HashMap<String, VideoMetadata>,
    download_calls: Arc<AtomicU32>,
    fail_downloads: bool,
}

impl ScriptedFetcher {
    fn new(ids: &[&str]) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = Self {
            metadata: ids
                .iter()
                .map(|id| (id.to_string(), metadata(&format!("clip {id}"))))
                .collect(),
            download_calls: Arc::clone(&calls),
            fail_downloads: false,
        };
        (fetcher, calls)
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn probe(&self, video: &VideoRef) -> FetchResult<VideoMetadata> {
        self.metadata
            .get(&video.id)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(video.id.clone()))
    }

    async fn fetch(
        &self,
        video: &VideoRef,
        destination: &Path,
    ) -> FetchResult<DownloadedArtifact> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads {
            return Err(FetchError::RateLimited);
        }
        let path = destination.join(format!("{}.mp4", video.id));
        tokio::fs::write(&path, b"clip-bytes").await?;
        Ok(DownloadedArtifact {
            video: video.clone(),
            metadata: self
                .metadata
                .get(&video.id)
                .cloned()
                .unwrap_or_default(),
            path,
            bytes: 10,
            sha256: None,
        })
    }
}

/// Stands in for ffmpeg by copying the input next to itself.
struct CopyingOverlay;

#[async_trait]
impl OverlayEngine for CopyingOverlay {
    async fn apply_overlay(&self, input: &Path, _spec: &WatermarkSpec) -> OverlayResult<PathBuf> {
        let output = input.with_extension("marked.mp4");
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }
}

struct BrokenOverlay;

#[async_trait]
impl OverlayEngine for BrokenOverlay {
    async fn apply_overlay(&self, _input: &Path, _spec: &WatermarkSpec) -> OverlayResult<PathBuf> {
        Err(OverlayError::ToolMissing { tool: "ffmpeg" })
    }
}

#[derive(Clone, Copy)]
enum TargetMode {
    Accept,
    Reject,
}

struct ScriptedTarget {
    name: &'static str,
    mode: TargetMode,
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedTarget {
    fn new(name: &'static str, mode: TargetMode) -> (Self, Arc<Mutex<Vec<PathBuf>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let target = Self {
            name,
            mode,
            seen: Arc::clone(&seen),
        };
        (target, seen)
    }
}

#[async_trait]
impl PublishTarget for ScriptedTarget {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn publish(&self, file: &Path, _metadata: &VideoMetadata) -> PublishResult<Publication> {
        self.seen.lock().unwrap().push(file.to_path_buf());
        match self.mode {
            TargetMode::Accept => Ok(Publication::new(
                self.name,
                Some(format!("{}-remote-id", self.name)),
            )),
            TargetMode::Reject => Err(PublishError::Rejected {
                target: self.name,
                reason: "scripted rejection".to_string(),
            }),
        }
    }
}

fn watermark_spec() -> WatermarkSpec {
    let section: WatermarkSection = toml::from_str(r#"text = "@recast""#).expect("section");
    WatermarkSpec::from_section(&section).expect("spec")
}

#[tokio::test]
async fn run_publishes_records_and_defers_deletion() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha", "beta"]);
    let (target, seen) = ScriptedTarget::new("primary", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha"), video("beta")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(target)))
        .rng(ChaCha20Rng::seed_from_u64(5))
        .build()
        .unwrap();

    let report = pipeline.run_once().await.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.publications.len(), 1);
    assert_eq!(report.publications[0].target, "primary");
    assert!(report.recorded);
    assert!(report.finished_at.is_some());

    let picked = report.video.expect("a video was processed");
    assert!(picked.id == "alpha" || picked.id == "beta");
    assert!(pipeline.history().is_downloaded(&picked.id).unwrap());

    // The file is still on disk; deletion happens on the next run's sweep.
    let uploaded = seen.lock().unwrap()[0].clone();
    assert!(uploaded.exists());
    let pending = pipeline.cleanup().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].path.ends_with(&format!("{}.mp4", picked.id)));
}

#[tokio::test]
async fn second_run_skips_processed_ids_and_reclaims_files() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha", "beta"]);
    let (first_target, _) = ScriptedTarget::new("primary", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha"), video("beta")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(first_target)))
        .rng(ChaCha20Rng::seed_from_u64(5))
        .build()
        .unwrap();

    let first = pipeline.run_once().await.unwrap();
    let first_video = first.video.unwrap();
    let first_file = base
        .path()
        .join("downloads")
        .join(format!("{}.mp4", first_video.id));
    assert!(first_file.exists());

    let second = pipeline.run_once().await.unwrap();
    let second_video = second.video.unwrap();

    assert_ne!(first_video.id, second_video.id, "processed id was re-picked");
    assert!(second.cleanup.reclaimed() >= 1);
    assert!(!first_file.exists(), "first run's file survived the sweep");
    assert_eq!(pipeline.history().count().unwrap(), 2);
}

#[tokio::test]
async fn one_rejecting_target_does_not_fail_the_run() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha"]);
    let (bad, bad_seen) = ScriptedTarget::new("flaky", TargetMode::Reject);
    let (good, good_seen) = ScriptedTarget::new("steady", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(bad)))
        .target(TargetBinding::new(Box::new(good)))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let report = pipeline.run_once().await.unwrap();

    assert_eq!(report.publications.len(), 1);
    assert_eq!(report.publications[0].target, "steady");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].target, "flaky");
    assert_eq!(report.failures[0].category, "validation");
    assert!(report.recorded);
    // Both targets were attempted independently.
    assert_eq!(bad_seen.lock().unwrap().len(), 1);
    assert_eq!(good_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn total_publish_failure_still_records_and_queues() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha"]);
    let (only, _) = ScriptedTarget::new("flaky", TargetMode::Reject);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(only)))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    match err {
        PipelineError::AllTargetsFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].target, "flaky");
        }
        other => panic!("expected AllTargetsFailed, got {other}"),
    }

    // The clip is burned either way: never re-picked, file queued for sweep.
    assert!(pipeline.history().is_downloaded("alpha").unwrap());
    assert_eq!(pipeline.cleanup().count().unwrap(), 1);
}

#[tokio::test]
async fn overlay_failure_falls_back_to_the_original_file() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha"]);
    let (target, seen) = ScriptedTarget::new("marked", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(BrokenOverlay))
        .target(TargetBinding::new(Box::new(target)).with_watermark(watermark_spec()))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let report = pipeline.run_once().await.unwrap();

    assert_eq!(report.publications.len(), 1);
    assert_eq!(report.overlay_fallbacks, vec!["marked".to_string()]);
    let uploaded = seen.lock().unwrap()[0].clone();
    assert!(uploaded.to_string_lossy().ends_with("alpha.mp4"));
}

#[tokio::test]
async fn watermarked_upload_also_queues_the_derived_file() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, _) = ScriptedFetcher::new(&["alpha"]);
    let (target, seen) = ScriptedTarget::new("marked", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(target)).with_watermark(watermark_spec()))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let report = pipeline.run_once().await.unwrap();
    assert!(report.overlay_fallbacks.is_empty());

    let uploaded = seen.lock().unwrap()[0].clone();
    assert!(uploaded.to_string_lossy().ends_with("alpha.marked.mp4"));

    let queued = pipeline.cleanup().pending().unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued.iter().any(|entry| entry.path.ends_with("alpha.mp4")));
    assert!(queued
        .iter()
        .any(|entry| entry.path.ends_with("alpha.marked.mp4")));
}

#[tokio::test(start_paused = true)]
async fn download_retries_stop_at_the_configured_bound() {
    let base = TempDir::new().unwrap();
    let mut config = test_config(base.path());
    config.pipeline.channel_attempts = 1;
    config.pipeline.video_attempts = 1;

    let (mut fetcher, calls) = ScriptedFetcher::new(&["alpha"]);
    fetcher.fail_downloads = true;
    let (target, _) = ScriptedTarget::new("primary", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(target)))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ChannelsExhausted { attempts: 1 }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.history().count().unwrap(), 0);
}

#[tokio::test]
async fn empty_channel_pool_is_an_error() {
    let base = TempDir::new().unwrap();
    let mut config = test_config(base.path());
    config.discovery.seed_channels.clear();

    let (fetcher, _) = ScriptedFetcher::new(&[]);
    let (target, _) = ScriptedTarget::new("primary", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: Vec::new(),
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(target)))
        .rng(ChaCha20Rng::seed_from_u64(2))
        .build()
        .unwrap();

    let err = pipeline.run_once().await.unwrap_err();
    assert!(matches!(err, PipelineError::NoChannels));
}

#[tokio::test]
async fn preview_reports_a_candidate_without_side_effects() {
    let base = TempDir::new().unwrap();
    let config = test_config(base.path());
    let (fetcher, download_calls) = ScriptedFetcher::new(&["alpha", "beta"]);
    let (target, seen) = ScriptedTarget::new("primary", TargetMode::Accept);

    let mut pipeline = Pipeline::builder(config)
        .index(Box::new(MockIndex {
            listings: vec![video("alpha"), video("beta")],
        }))
        .fetcher(Box::new(fetcher))
        .overlay(Box::new(CopyingOverlay))
        .target(TargetBinding::new(Box::new(target)))
        .rng(ChaCha20Rng::seed_from_u64(9))
        .build()
        .unwrap();

    let preview = pipeline.preview().await.unwrap();

    assert!(preview.video.is_some());
    assert!(preview.title.is_some());
    assert_eq!(preview.channels_considered, 1);
    assert_eq!(download_calls.load(Ordering::SeqCst), 0);
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(pipeline.history().count().unwrap(), 0);
    let downloads = std::fs::read_dir(base.path().join("downloads")).unwrap();
    assert_eq!(downloads.count(), 0);
}
