use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::WatermarkSection;
use crate::error::{Categorize, ConfigError, ErrorCategory};

const FFMPEG: &str = "ffmpeg";

pub type OverlayResult<T> = Result<T, OverlayError>;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("{tool} is not installed or not on PATH")]
    ToolMissing { tool: &'static str },
    #[error("{tool} timed out after {timeout:?}")]
    Timeout {
        tool: &'static str,
        timeout: Duration,
    },
    #[error("{tool} failed: {detail}")]
    Processing { tool: &'static str, detail: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Categorize for OverlayError {
    fn category(&self) -> ErrorCategory {
        match self {
            OverlayError::Timeout { .. } | OverlayError::Processing { .. } => {
                ErrorCategory::Transient
            }
            OverlayError::ToolMissing { .. } | OverlayError::Io(_) => ErrorCategory::Resource,
        }
    }
}

/// Where the watermark box sits on the frame. Expressions use the
/// drawtext variables `w`, `h`, `text_w`, `text_h` with a 10px margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayPosition {
    TopLeft,
    TopMiddle,
    TopRight,
    Center,
    BottomLeft,
    BottomMiddle,
    BottomRight,
}

impl OverlayPosition {
    pub fn expressions(&self) -> (&'static str, &'static str) {
        match self {
            OverlayPosition::TopLeft => ("10", "10"),
            OverlayPosition::TopMiddle => ("(w-text_w)/2", "10"),
            OverlayPosition::TopRight => ("w-text_w-10", "10"),
            OverlayPosition::Center => ("(w-text_w)/2", "(h-text_h)/2"),
            OverlayPosition::BottomLeft => ("10", "h-text_h-10"),
            OverlayPosition::BottomMiddle => ("(w-text_w)/2", "h-text_h-10"),
            OverlayPosition::BottomRight => ("w-text_w-10", "h-text_h-10"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayPosition::TopLeft => "top-left",
            OverlayPosition::TopMiddle => "top-middle",
            OverlayPosition::TopRight => "top-right",
            OverlayPosition::Center => "center",
            OverlayPosition::BottomLeft => "bottom-left",
            OverlayPosition::BottomMiddle => "bottom-middle",
            OverlayPosition::BottomRight => "bottom-right",
        }
    }
}

impl fmt::Display for OverlayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlayPosition {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "top-left" => Ok(OverlayPosition::TopLeft),
            "top-middle" | "top-center" => Ok(OverlayPosition::TopMiddle),
            "top-right" => Ok(OverlayPosition::TopRight),
            "center" | "middle" => Ok(OverlayPosition::Center),
            "bottom-left" => Ok(OverlayPosition::BottomLeft),
            "bottom-middle" | "bottom-center" => Ok(OverlayPosition::BottomMiddle),
            "bottom-right" => Ok(OverlayPosition::BottomRight),
            other => Err(ConfigError::Invalid {
                field: "watermark.position",
                reason: format!("unknown position {other:?}"),
            }),
        }
    }
}

/// A validated watermark: text plus rendering parameters.
#[derive(Debug, Clone)]
pub struct WatermarkSpec {
    pub text: String,
    pub position: OverlayPosition,
    pub font_size: u32,
    pub box_opacity: f64,
}

impl WatermarkSpec {
    pub fn from_section(section: &WatermarkSection) -> Result<Self, ConfigError> {
        if section.text.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "watermark.text",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            text: section.text.clone(),
            position: section.position.parse()?,
            font_size: section.font_size,
            box_opacity: section.box_opacity.clamp(0.0, 1.0),
        })
    }
}

/// Burns a watermark into a video file, yielding a new file next to the
/// input. The input is never modified.
#[async_trait]
pub trait OverlayEngine: Send + Sync {
    async fn apply_overlay(&self, input: &Path, spec: &WatermarkSpec) -> OverlayResult<PathBuf>;
}

/// Default engine shelling out to ffmpeg with a drawtext filter. Audio is
/// stream-copied; only the video track is re-encoded.
#[derive(Debug, Clone)]
pub struct FfmpegOverlay {
    binary: PathBuf,
    timeout: Duration,
}

impl Default for FfmpegOverlay {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(FFMPEG),
            timeout: Duration::from_secs(120),
        }
    }
}

impl FfmpegOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl OverlayEngine for FfmpegOverlay {
    async fn apply_overlay(&self, input: &Path, spec: &WatermarkSpec) -> OverlayResult<PathBuf> {
        let output = overlay_output_path(input, spec);
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(drawtext_filter(spec))
            .arg("-codec:a")
            .arg("copy")
            .arg(&output);
        let future = timeout(self.timeout, command.output());
        match future.await {
            Ok(Ok(result)) if result.status.success() => {
                debug!(input = %input.display(), output = %output.display(), "overlay applied");
                Ok(output)
            }
            Ok(Ok(result)) => Err(OverlayError::Processing {
                tool: FFMPEG,
                detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
                Err(OverlayError::ToolMissing { tool: FFMPEG })
            }
            Ok(Err(err)) => Err(OverlayError::Io(err)),
            Err(_) => Err(OverlayError::Timeout {
                tool: FFMPEG,
                timeout: self.timeout,
            }),
        }
    }
}

fn drawtext_filter(spec: &WatermarkSpec) -> String {
    let (x, y) = spec.position.expressions();
    format!(
        "drawtext=text='{}':x={x}:y={y}:fontcolor=white:fontsize={}:box=1:boxcolor=black@{}:boxborderw=5",
        escape_drawtext(&spec.text),
        spec.font_size,
        spec.box_opacity,
    )
}

/// Output lands next to the input, suffixed with a slug of the watermark
/// text so two targets with distinct overlays never clobber each other.
fn overlay_output_path(input: &Path, spec: &WatermarkSpec) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_string());
    let slug = text_slug(&spec.text);
    input.with_file_name(format!("{stem}_{slug}.{extension}"))
}

fn text_slug(text: &str) -> String {
    let slug: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(16)
        .collect::<String>()
        .to_lowercase();
    if slug.is_empty() {
        "watermarked".to_string()
    } else {
        slug
    }
}

fn escape_drawtext(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("'\\''"),
            ':' => escaped.push_str("\\:"),
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(text: &str, position: OverlayPosition) -> WatermarkSpec {
        WatermarkSpec {
            text: text.to_string(),
            position,
            font_size: 24,
            box_opacity: 0.5,
        }
    }

    #[test]
    fn positions_parse_and_roundtrip() {
        let position: OverlayPosition = "bottom-middle".parse().expect("parses");
        assert_eq!(position, OverlayPosition::BottomMiddle);
        assert_eq!(position.to_string(), "bottom-middle");
        assert!("under-the-fold".parse::<OverlayPosition>().is_err());
    }

    #[test]
    fn bottom_middle_centers_horizontally() {
        let (x, y) = OverlayPosition::BottomMiddle.expressions();
        assert_eq!(x, "(w-text_w)/2");
        assert_eq!(y, "h-text_h-10");
    }

    #[test]
    fn drawtext_filter_embeds_parameters() {
        let filter = drawtext_filter(&spec("@recast", OverlayPosition::BottomMiddle));
        assert_eq!(
            filter,
            "drawtext=text='@recast':x=(w-text_w)/2:y=h-text_h-10:fontcolor=white:fontsize=24:box=1:boxcolor=black@0.5:boxborderw=5"
        );
    }

    #[test]
    fn drawtext_escapes_special_characters() {
        assert_eq!(escape_drawtext(r"a:b'c%d\e"), r"a\:b'\''c\%d\\e");
    }

    #[test]
    fn output_path_is_slugged_per_text() {
        let input = Path::new("/tmp/abc123.mp4");
        let first = overlay_output_path(input, &spec("@recast", OverlayPosition::Center));
        let second = overlay_output_path(input, &spec("@other", OverlayPosition::Center));
        assert_eq!(first, Path::new("/tmp/abc123_recast.mp4"));
        assert_ne!(first, second);
    }

    #[test]
    fn watermark_spec_rejects_blank_text() {
        let section: WatermarkSection =
            toml::from_str("text = '  '").expect("section parses");
        assert!(WatermarkSpec::from_section(&section).is_err());
    }
}
