pub mod cleanup;
pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod overlay;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod source;

mod sqlite;

pub use cleanup::{
    CleanupError, CleanupQueue, CleanupQueueBuilder, CleanupReport, CleanupResult,
    PendingDeletion,
};
pub use config::{
    load_browser_config, load_recast_config, BrowserConfig, ConfigBundle, RecastConfig,
};
pub use error::{Categorize, ConfigError, ErrorCategory};
pub use fetch::{DownloadedArtifact, FetchError, FetchResult, MediaFetcher, YtDlpFetcher};
pub use history::{
    DownloadHistory, DownloadHistoryBuilder, HistoryEntry, HistoryError, HistoryRecord,
    HistoryResult,
};
pub use overlay::{
    FfmpegOverlay, OverlayEngine, OverlayError, OverlayPosition, OverlayResult, WatermarkSpec,
};
pub use pipeline::{
    Pipeline, PipelineBuilder, PipelineError, PipelineResult, PreviewReport, RunReport,
    TargetBinding, TargetFailure,
};
pub use publish::{
    ChromiumUploadSession, Publication, PublishError, PublishResult, PublishTarget, StoredCookie,
    TikTokTarget, UploadSession, YouTubeTarget,
};
pub use retry::RetryPolicy;
pub use source::{
    CandidateSelector, ChannelDiscovery, ChannelRef, ContentFilter, DiscoveryOutcome,
    DiscoveryReport, HttpVideoIndex, SelectError, Selection, SelectionOutcome, SelectionReport,
    SourceError, SourceResult, VideoIndex, VideoMetadata, VideoRef,
};
