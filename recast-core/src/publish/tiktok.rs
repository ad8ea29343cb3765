use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, TikTokSection};
use crate::source::VideoMetadata;

use super::target::{truncate_chars, Publication, PublishError, PublishResult, PublishTarget};

const TIKTOK: &str = "tiktok";

const REVEAL_FILE_INPUTS_SCRIPT: &str = r#"
(() => {
    const inputs = document.querySelectorAll('input[type="file"]');
    inputs.forEach(input => {
        input.style.display = 'block';
        input.style.visibility = 'visible';
        input.style.opacity = '1';
        input.style.width = '1px';
        input.style.height = '1px';
    });
    return inputs.length;
})()
"#;

const POST_BUTTON_SWEEP_SCRIPT: &str = r#"
(() => {
    const buttons = Array.from(document.querySelectorAll('button'));
    const target = buttons.find(button => {
        if (button.disabled) return false;
        const text = (button.innerText || '').trim().toLowerCase();
        return text === 'post' || text.includes('post') || text.includes('upload') || text.includes('submit');
    });
    if (!target) return false;
    target.click();
    return true;
})()
"#;

/// A signed-in composer session that receives the finished file and caption.
#[async_trait]
pub trait UploadSession: Send + Sync {
    /// Returns the platform-side identifier when the composer exposes one.
    async fn upload(&self, file: &Path, caption: &str) -> PublishResult<Option<String>>;
}

/// Publishes clips through the TikTok web composer.
pub struct TikTokTarget<S> {
    session: S,
    caption_limit: usize,
    max_hashtags: usize,
    trailing_tag: String,
}

impl<S> TikTokTarget<S> {
    pub fn new(section: &TikTokSection, session: S) -> Self {
        Self {
            session,
            caption_limit: section.caption_limit,
            max_hashtags: section.max_hashtags,
            trailing_tag: section.trailing_tag.clone(),
        }
    }

    /// Caption starts from the description (falling back to the title),
    /// truncated to the composer limit, then carries the first few hashtags
    /// plus the trailing tag when it is not already among them.
    fn build_caption(&self, metadata: &VideoMetadata) -> String {
        let description = metadata.description.trim();
        let title = metadata.title.trim();
        let base = if description.is_empty() {
            title
        } else {
            description
        };
        let mut caption = truncate_chars(base, self.caption_limit).to_string();
        if caption.len() < base.len() {
            caption.push_str("...");
        }

        let mut tags: Vec<String> = metadata
            .hashtags()
            .into_iter()
            .take(self.max_hashtags)
            .collect();
        let trailing = self.trailing_tag.trim();
        if !trailing.is_empty() && !tags.iter().any(|tag| tag.eq_ignore_ascii_case(trailing)) {
            tags.push(trailing.to_string());
        }
        for tag in tags {
            if !caption.is_empty() {
                caption.push(' ');
            }
            caption.push_str(&tag);
        }
        caption.trim().to_string()
    }
}

#[async_trait]
impl<S: UploadSession> PublishTarget for TikTokTarget<S> {
    fn name(&self) -> &'static str {
        TIKTOK
    }

    async fn publish(&self, file: &Path, metadata: &VideoMetadata) -> PublishResult<Publication> {
        let caption = self.build_caption(metadata);
        debug!(caption = %caption, "uploading to tiktok");
        let remote_id = self.session.upload(file, &caption).await?;
        info!(title = %metadata.title, "published to tiktok");
        Ok(Publication::new(TIKTOK, remote_id))
    }
}

/// Cookie entry as written by session exporters. Selenium dumps use
/// `expiry`/`httpOnly`, browser extensions use `expirationDate`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, alias = "expirationDate")]
    pub expiry: Option<f64>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, alias = "httpOnly")]
    pub http_only: Option<bool>,
}

impl StoredCookie {
    fn into_param(self) -> CookieParam {
        let mut param = CookieParam::new(self.name, self.value);
        // Exports prefix host-wide cookies with a dot; the composer session
        // replays them without it.
        param.domain = self
            .domain
            .map(|domain| domain.trim_start_matches('.').to_string());
        param.path = self.path;
        param.secure = self.secure;
        param.http_only = self.http_only;
        param.expires = self.expiry.map(TimeSinceEpoch::new);
        param
    }
}

/// Runs the composer in a Chromium instance launched per upload: restore
/// cookies, open the upload page, attach the file, enter the caption, post,
/// and poll for the outcome.
pub struct ChromiumUploadSession {
    browser: BrowserConfig,
    cookies_file: PathBuf,
    upload_url: String,
    profile_dir: PathBuf,
}

impl ChromiumUploadSession {
    pub fn new(
        browser: BrowserConfig,
        cookies_file: PathBuf,
        upload_url: impl Into<String>,
        profile_dir: PathBuf,
    ) -> Self {
        Self {
            browser,
            cookies_file,
            upload_url: upload_url.into(),
            profile_dir,
        }
    }

    fn build_chromium_config(&self) -> Result<ChromiumConfig, String> {
        let chromium = &self.browser.chromium;
        let [width, height] = chromium.window;
        let mut builder = ChromiumConfig::builder()
            .user_data_dir(&self.profile_dir)
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            });

        if !chromium.executable_path.is_empty() {
            builder = builder.chrome_executable(&chromium.executable_path);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![format!("--window-size={width},{height}")];
        if let Some(agent) = &chromium.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(accept) = &chromium.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--mute-audio".into());
        args.push("--no-first-run".into());
        args.push("--disable-blink-features=AutomationControlled".into());
        builder = builder.args(args);

        builder.build()
    }

    fn load_cookies(&self) -> PublishResult<Vec<CookieParam>> {
        if !self.cookies_file.exists() {
            warn!(
                file = %self.cookies_file.display(),
                "cookie jar not found, starting an unauthenticated session"
            );
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.cookies_file)?;
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(&contents).map_err(|err| PublishError::AuthRequired {
                target: TIKTOK,
                reason: format!(
                    "cookie jar {} is unreadable: {err}",
                    self.cookies_file.display()
                ),
            })?;
        let mut cookies = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<StoredCookie>(entry) {
                Ok(cookie) => cookies.push(cookie.into_param()),
                Err(err) => debug!(error = %err, "skipping malformed cookie entry"),
            }
        }
        Ok(cookies)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.browser.session.poll_interval_ms.max(250))
    }

    async fn drive_upload(
        &self,
        browser: &Browser,
        file: &Path,
        caption: &str,
    ) -> PublishResult<Option<String>> {
        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await
            .map_err(|err| browser_err(format!("failed to open a page: {err}")))?;

        let cookies = self.load_cookies()?;
        if !cookies.is_empty() {
            debug!(count = cookies.len(), "restoring session cookies");
            page.execute(SetCookiesParams::new(cookies))
                .await
                .map_err(|err| browser_err(format!("failed to restore cookies: {err}")))?;
        }

        goto(&page, &self.upload_url).await?;
        self.ensure_logged_in(&page).await?;

        let input = self.find_file_input(&page).await?;
        let absolute = file.canonicalize()?;
        let params = SetFileInputFilesParams::builder()
            .file(absolute.to_string_lossy().into_owned())
            .backend_node_id(input.backend_node_id)
            .build()
            .map_err(browser_err)?;
        page.execute(params)
            .await
            .map_err(|err| browser_err(format!("failed to attach the video file: {err}")))?;
        info!(file = %file.display(), "video file attached");

        let caption_selector = self.await_caption_field(&page).await?;
        self.enter_caption(&page, &caption_selector, caption).await?;
        self.click_post(&page).await?;
        let submitted_from = current_url(&page).await?;
        self.await_outcome(&page, &submitted_from).await?;
        Ok(None)
    }

    async fn ensure_logged_in(&self, page: &Page) -> PublishResult<()> {
        let fragment = self.browser.selectors.login_url_fragment.to_lowercase();
        let deadline =
            Instant::now() + Duration::from_secs(self.browser.session.login_wait_seconds);
        let mut warned = false;
        loop {
            let url = current_url(page).await?;
            if !url.to_lowercase().contains(&fragment) {
                return Ok(());
            }
            if !warned {
                warn!("session is not signed in, waiting for a manual login");
                warned = true;
            }
            if Instant::now() >= deadline {
                return Err(PublishError::AuthRequired {
                    target: TIKTOK,
                    reason: "login page did not clear within the configured wait".to_string(),
                });
            }
            sleep(self.poll_interval()).await;
        }
    }

    async fn find_file_input(&self, page: &Page) -> PublishResult<Element> {
        let deadline =
            Instant::now() + Duration::from_secs(self.browser.session.processing_wait_seconds);
        let mut revealed = false;
        loop {
            for selector in &self.browser.selectors.file_inputs {
                if let Ok(element) = page.find_element(selector.clone()).await {
                    return Ok(element);
                }
            }
            if !revealed {
                // The composer keeps its input hidden until a drag starts.
                page.evaluate(REVEAL_FILE_INPUTS_SCRIPT)
                    .await
                    .map_err(|err| browser_err(format!("failed to reveal file inputs: {err}")))?;
                revealed = true;
                continue;
            }
            if Instant::now() >= deadline {
                return Err(browser_err(
                    "file input did not appear on the upload page".to_string(),
                ));
            }
            sleep(self.poll_interval()).await;
        }
    }

    async fn await_caption_field(&self, page: &Page) -> PublishResult<String> {
        let deadline =
            Instant::now() + Duration::from_secs(self.browser.session.processing_wait_seconds);
        loop {
            for selector in &self.browser.selectors.caption_fields {
                if page.find_element(selector.clone()).await.is_ok() {
                    return Ok(selector.clone());
                }
            }
            if Instant::now() >= deadline {
                return Err(PublishError::Timeout {
                    target: TIKTOK,
                    seconds: self.browser.session.processing_wait_seconds,
                });
            }
            sleep(self.poll_interval()).await;
        }
    }

    async fn enter_caption(
        &self,
        page: &Page,
        selector: &str,
        caption: &str,
    ) -> PublishResult<()> {
        if let Ok(element) = page.find_element(selector.to_string()).await {
            if let Err(err) = element.click().await {
                debug!(error = %err, "caption field click failed, relying on script focus");
            }
        }
        let script = format!(
            r#"
(() => {{
    const field = document.querySelector("{selector}");
    if (!field) return false;
    field.focus();
    document.execCommand('selectAll', false, null);
    document.execCommand('delete', false, null);
    document.execCommand('insertText', false, "{caption}");
    field.dispatchEvent(new Event('input', {{ bubbles: true }}));
    return true;
}})()
"#,
            selector = escape_js(selector),
            caption = escape_js(caption),
        );
        let entered: bool = page
            .evaluate(script.as_str())
            .await
            .map_err(|err| browser_err(format!("failed to enter the caption: {err}")))?
            .into_value()
            .map_err(|err| browser_err(format!("failed to decode caption entry result: {err}")))?;
        if !entered {
            return Err(browser_err(
                "caption field disappeared before text entry".to_string(),
            ));
        }
        debug!("caption entered");
        Ok(())
    }

    async fn click_post(&self, page: &Page) -> PublishResult<()> {
        for selector in &self.browser.selectors.post_buttons {
            if let Ok(element) = page.find_element(selector.clone()).await {
                match element.click().await {
                    Ok(_) => {
                        info!(selector = %selector, "post button clicked");
                        return Ok(());
                    }
                    Err(err) => {
                        debug!(selector = %selector, error = %err, "direct click failed")
                    }
                }
            }
        }
        let clicked: bool = page
            .evaluate(POST_BUTTON_SWEEP_SCRIPT)
            .await
            .map_err(|err| browser_err(format!("failed to sweep for the post button: {err}")))?
            .into_value()
            .map_err(|err| browser_err(format!("failed to decode button sweep result: {err}")))?;
        if clicked {
            info!("post button clicked via script sweep");
            return Ok(());
        }
        Err(browser_err("post button not found".to_string()))
    }

    async fn await_outcome(&self, page: &Page, submitted_from: &str) -> PublishResult<()> {
        let wait = Duration::from_secs(self.browser.session.upload_wait_seconds);
        let grace = Duration::from_secs(self.browser.session.grace_seconds);
        let started = Instant::now();
        let script = self.outcome_probe_script();
        loop {
            let probe: OutcomeProbe = page
                .evaluate(script.as_str())
                .await
                .map_err(|err| browser_err(format!("failed to inspect upload state: {err}")))?
                .into_value()
                .map_err(|err| browser_err(format!("failed to decode upload state: {err}")))?;
            if let Some(text) = probe.error_text.filter(|text| !text.is_empty()) {
                return Err(PublishError::Rejected {
                    target: TIKTOK,
                    reason: text,
                });
            }
            if probe.success_marker {
                info!("upload success marker detected");
                return Ok(());
            }
            let href = probe.href.to_lowercase();
            if href.contains("success")
                || href.contains("/profile")
                || (!href.contains("upload") && probe.href != submitted_from)
            {
                info!(url = %probe.href, "upload confirmed by navigation");
                return Ok(());
            }
            if started.elapsed() >= wait {
                break;
            }
            sleep(self.poll_interval()).await;
        }
        if started.elapsed() >= grace {
            // The composer frequently completes without leaving a marker
            // behind. A quiet wait past the grace period counts as done.
            warn!("no explicit success marker, assuming the post went through");
            return Ok(());
        }
        Err(PublishError::Timeout {
            target: TIKTOK,
            seconds: self.browser.session.upload_wait_seconds,
        })
    }

    fn outcome_probe_script(&self) -> String {
        let success = js_string_array(&self.browser.selectors.success_markers);
        let error = js_string_array(&self.browser.selectors.error_markers);
        format!(
            r#"
(() => {{
    const visible = (el) => !!(el && (el.offsetWidth || el.offsetHeight || el.getClientRects().length));
    const successSelectors = [{success}];
    const errorSelectors = [{error}];
    const successVisible = successSelectors.some(sel => visible(document.querySelector(sel)));
    const errorNode = errorSelectors.map(sel => document.querySelector(sel)).find(visible);
    const bodyText = (document.body ? document.body.innerText : '').toLowerCase();
    return {{
        href: window.location.href,
        success_marker: successVisible || bodyText.includes('upload successful') || bodyText.includes('video uploaded'),
        error_text: errorNode ? (errorNode.innerText || '').trim() : null
    }};
}})()
"#
        )
    }
}

#[async_trait]
impl UploadSession for ChromiumUploadSession {
    async fn upload(&self, file: &Path, caption: &str) -> PublishResult<Option<String>> {
        fs::create_dir_all(&self.profile_dir)?;
        let config = self.build_chromium_config().map_err(browser_err)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| browser_err(format!("failed to launch chromium: {err}")))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        let result = self.drive_upload(&browser, file, caption).await;
        shutdown(browser, handler_task).await;
        result
    }
}

#[derive(Debug, Deserialize)]
struct OutcomeProbe {
    href: String,
    success_marker: bool,
    error_text: Option<String>,
}

async fn goto(page: &Page, url: &str) -> PublishResult<()> {
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(browser_err)?;
    page.goto(params)
        .await
        .map_err(|err| browser_err(format!("failed to open {url}: {err}")))?;
    page.wait_for_navigation()
        .await
        .map_err(|err| browser_err(format!("navigation to {url} did not settle: {err}")))?;
    Ok(())
}

async fn current_url(page: &Page) -> PublishResult<String> {
    let url = page
        .url()
        .await
        .map_err(|err| browser_err(format!("failed to read the page url: {err}")))?;
    Ok(url.unwrap_or_default())
}

async fn shutdown(mut browser: Browser, handler_task: JoinHandle<()>) {
    if let Err(err) = browser.close().await {
        warn!(error = %err, "failed to close browser gracefully");
    }
    if let Err(err) = handler_task.await {
        warn!(error = %err, "browser handler join error");
    }
}

fn browser_err(reason: impl Into<String>) -> PublishError {
    PublishError::Browser {
        target: TIKTOK,
        reason: reason.into(),
    }
}

fn js_string_array(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("\"{}\"", escape_js(item)))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape_js(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(caption_limit: usize) -> TikTokSection {
        toml::from_str(&format!(
            r#"
            enabled = true
            cookies_file = "tiktok_cookies.json"
            caption_limit = {caption_limit}
            "#
        ))
        .unwrap()
    }

    #[test]
    fn caption_prefers_description_and_truncates() {
        let target = TikTokTarget::new(&section(10), ());
        let metadata = VideoMetadata {
            title: "Title".into(),
            description: "a very long description that exceeds the limit".into(),
            ..VideoMetadata::default()
        };
        let caption = target.build_caption(&metadata);
        assert!(caption.starts_with("a very lon..."));
        assert!(caption.ends_with("#shorts"));
    }

    #[test]
    fn caption_falls_back_to_title() {
        let target = TikTokTarget::new(&section(100), ());
        let metadata = VideoMetadata {
            title: "Concert highlights".into(),
            ..VideoMetadata::default()
        };
        assert_eq!(
            target.build_caption(&metadata),
            "Concert highlights #shorts"
        );
    }

    #[test]
    fn caption_caps_appended_hashtags() {
        let target = TikTokTarget::new(&section(100), ());
        let metadata = VideoMetadata {
            title: "Title".into(),
            description: format!(
                "{} #one #two #three #four #five #six #seven",
                "x".repeat(90)
            ),
            ..VideoMetadata::default()
        };
        let caption = target.build_caption(&metadata);
        assert!(caption.contains("#five"));
        assert!(!caption.contains("#six"));
        assert!(caption.ends_with("#shorts"));
    }

    #[test]
    fn trailing_tag_is_not_duplicated_in_hashtags() {
        let target = TikTokTarget::new(&section(100), ());
        let metadata = VideoMetadata {
            title: "Title".into(),
            description: "Fun night #Shorts extra words".into(),
            ..VideoMetadata::default()
        };
        let caption = target.build_caption(&metadata);
        assert_eq!(caption.to_lowercase().matches("#shorts").count(), 2);
    }

    #[test]
    fn stored_cookie_accepts_selenium_exports() {
        let cookie: StoredCookie = serde_json::from_str(
            r#"{"name":"sessionid","value":"abc","domain":".tiktok.com","path":"/","expiry":1750000000,"secure":true,"httpOnly":true}"#,
        )
        .unwrap();
        let param = cookie.into_param();
        assert_eq!(param.name, "sessionid");
        assert_eq!(param.domain.as_deref(), Some("tiktok.com"));
        assert_eq!(param.secure, Some(true));
        assert_eq!(param.http_only, Some(true));
        assert!(param.expires.is_some());
    }

    #[test]
    fn stored_cookie_accepts_extension_exports() {
        let cookie: StoredCookie = serde_json::from_str(
            r#"{"name":"tt_csrf","value":"xyz","domain":"www.tiktok.com","expirationDate":1750000000.5}"#,
        )
        .unwrap();
        assert_eq!(cookie.expiry, Some(1750000000.5));
        let param = cookie.into_param();
        assert_eq!(param.domain.as_deref(), Some("www.tiktok.com"));
    }

    #[test]
    fn escape_js_covers_quotes_and_newlines() {
        assert_eq!(escape_js(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_js("line one\nline two"), "line one\\nline two");
    }
}
