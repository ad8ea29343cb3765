use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecastConfig {
    pub paths: PathsSection,
    pub http: HttpSection,
    pub pipeline: PipelineSection,
    pub discovery: DiscoverySection,
    pub selection: SelectionSection,
    pub targets: TargetsSection,
}

impl RecastConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.download_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.state_dir)
    }

    pub fn history_db(&self) -> PathBuf {
        self.state_dir().join("history.sqlite")
    }

    pub fn cleanup_db(&self) -> PathBuf {
        self.state_dir().join("cleanup.sqlite")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub download_dir: String,
    pub state_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_channel_attempts")]
    pub channel_attempts: u32,
    #[serde(default = "default_video_attempts")]
    pub video_attempts: u32,
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
    #[serde(default = "default_overlay_attempts")]
    pub overlay_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_initial_delay_seconds: u64,
    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: f64,
    /// 0 keeps failed deletions queued forever.
    #[serde(default)]
    pub cleanup_max_attempts: u32,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    /// Channels always in the candidate pool, before discovery adds more.
    #[serde(default)]
    pub seed_channels: Vec<String>,
    pub search_terms: Vec<String>,
    pub max_channels: usize,
    #[serde(default = "default_probe_limit")]
    pub probe_limit: usize,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: [u64; 2],
    pub topic_keywords: Vec<String>,
    pub format_keywords: Vec<String>,
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionSection {
    #[serde(default = "default_max_to_check")]
    pub max_to_check: usize,
    #[serde(default = "default_copyright_markers")]
    pub copyright_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetsSection {
    pub youtube: YouTubeSection,
    pub tiktok: TikTokSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YouTubeSection {
    pub enabled: bool,
    pub token_file: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,
    #[serde(default = "default_youtube_tags")]
    pub tags: Vec<String>,
    pub watermark: Option<WatermarkSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TikTokSection {
    pub enabled: bool,
    pub cookies_file: String,
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,
    #[serde(default = "default_max_hashtags")]
    pub max_hashtags: usize,
    #[serde(default = "default_trailing_tag")]
    pub trailing_tag: String,
    pub watermark: Option<WatermarkSection>,
}

/// Position is kept as a string here and parsed into an
/// `overlay::OverlayPosition` when the pipeline is assembled, so a typo
/// fails at startup with the offending value in the message.
#[derive(Debug, Clone, Deserialize)]
pub struct WatermarkSection {
    pub text: String,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_box_opacity")]
    pub box_opacity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    pub chromium: ChromiumSection,
    pub session: SessionSection,
    pub selectors: SelectorSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: String,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    #[serde(default = "default_window")]
    pub window: [u32; 2],
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_login_wait")]
    pub login_wait_seconds: u64,
    /// How long to wait for the page to finish ingesting the file before
    /// the caption field appears.
    #[serde(default = "default_processing_wait")]
    pub processing_wait_seconds: u64,
    #[serde(default = "default_upload_wait")]
    pub upload_wait_seconds: u64,
    #[serde(default = "default_grace")]
    pub grace_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSection {
    pub file_inputs: Vec<String>,
    pub caption_fields: Vec<String>,
    pub post_buttons: Vec<String>,
    pub success_markers: Vec<String>,
    pub error_markers: Vec<String>,
    #[serde(default = "default_login_fragment")]
    pub login_url_fragment: String,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub recast: RecastConfig,
    pub browser: BrowserConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let recast = load_recast_config(dir.join("recast.toml"))?;
        let browser = load_browser_config(dir.join("browser.toml"))?;
        Ok(Self { recast, browser })
    }
}

pub fn load_recast_config<P: AsRef<Path>>(path: P) -> Result<RecastConfig> {
    load_toml(path)
}

pub fn load_browser_config<P: AsRef<Path>>(path: P) -> Result<BrowserConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn default_base_url() -> String {
    "https://www.youtube.com".to_string()
}

fn default_http_timeout() -> u64 {
    15
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36".to_string(),
    ]
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

fn default_channel_attempts() -> u32 {
    5
}

fn default_video_attempts() -> u32 {
    3
}

fn default_download_attempts() -> u32 {
    5
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_overlay_attempts() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    2
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    60
}

fn default_probe_limit() -> usize {
    15
}

fn default_request_delay_ms() -> [u64; 2] {
    [2000, 5000]
}

fn default_max_duration() -> u64 {
    120
}

fn default_max_to_check() -> usize {
    50
}

fn default_copyright_markers() -> Vec<String> {
    [
        "\u{a9}",
        "copyright",
        "all rights reserved",
        "licensed to",
        "provided to youtube",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_category_id() -> String {
    "22".to_string()
}

fn default_privacy_status() -> String {
    "public".to_string()
}

fn default_youtube_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

fn default_youtube_tags() -> Vec<String> {
    vec!["shorts".to_string(), "trending".to_string()]
}

fn default_upload_url() -> String {
    "https://www.tiktok.com/upload?lang=en".to_string()
}

fn default_caption_limit() -> usize {
    100
}

fn default_max_hashtags() -> usize {
    5
}

fn default_trailing_tag() -> String {
    "#shorts".to_string()
}

fn default_position() -> String {
    "bottom-middle".to_string()
}

fn default_font_size() -> u32 {
    24
}

fn default_box_opacity() -> f64 {
    0.5
}

fn default_window() -> [u32; 2] {
    [1280, 900]
}

fn default_login_wait() -> u64 {
    120
}

fn default_processing_wait() -> u64 {
    120
}

fn default_upload_wait() -> u64 {
    300
}

fn default_grace() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_login_fragment() -> String {
    "login".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("configs should parse");
        assert!(bundle.recast.targets.youtube.enabled);
        assert!(bundle.recast.discovery.search_terms.len() >= 2);
        assert_eq!(bundle.recast.selection.max_to_check, 50);
        assert_eq!(bundle.browser.session.login_wait_seconds, 120);
        assert!(!bundle.browser.selectors.caption_fields.is_empty());
    }

    #[test]
    fn copyright_markers_have_defaults() {
        let section: SelectionSection = toml::from_str("").expect("empty section");
        assert!(section
            .copyright_markers
            .iter()
            .any(|marker| marker == "copyright"));
        assert_eq!(section.max_to_check, 50);
    }

    #[test]
    fn pipeline_attempt_counts_have_defaults() {
        let section: PipelineSection = toml::from_str("").expect("empty section");
        assert_eq!(section.channel_attempts, 5);
        assert_eq!(section.video_attempts, 3);
        assert_eq!(section.download_attempts, 5);
        assert_eq!(section.publish_attempts, 3);
        assert_eq!(section.overlay_attempts, 2);
    }

    #[test]
    fn resolve_path_keeps_absolute_paths() {
        let config = RecastConfig {
            paths: PathsSection {
                base_dir: "/srv/recast".to_string(),
                download_dir: "downloads".to_string(),
                state_dir: "state".to_string(),
                logs_dir: "logs".to_string(),
            },
            http: toml::from_str("").expect("http defaults"),
            pipeline: toml::from_str(
                "channel_attempts = 5\nvideo_attempts = 3\ndownload_attempts = 5\npublish_attempts = 3",
            )
            .expect("pipeline section"),
            discovery: toml::from_str(
                "search_terms = ['a']\nmax_channels = 5\ntopic_keywords = ['a']\nformat_keywords = ['live']",
            )
            .expect("discovery section"),
            selection: toml::from_str("").expect("selection defaults"),
            targets: toml::from_str(
                "[youtube]\nenabled = false\ntoken_file = 'token.json'\n[tiktok]\nenabled = false\ncookies_file = 'cookies.json'",
            )
            .expect("targets section"),
        };

        assert_eq!(
            config.resolve_path("/tmp/video.mp4"),
            PathBuf::from("/tmp/video.mp4")
        );
        assert_eq!(
            config.download_dir(),
            PathBuf::from("/srv/recast/downloads")
        );
        assert_eq!(
            config.history_db(),
            PathBuf::from("/srv/recast/state/history.sqlite")
        );
    }
}
