use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::overlay::render::{DEFAULT_LABEL_HEIGHT, DEFAULT_MIN_LABEL_WIDTH};
use crate::overlay::OverlayOptions;
use crate::stream::decoder::DEFAULT_MAX_LINE_BYTES;
use crate::stream::ControllerSettings;

const DEFAULT_BASE_URL: &str = "http://localhost:5000/";
const DEFAULT_STREAM_PATH: &str = "realtime";
const DEFAULT_READ_CHUNK_BYTES: usize = 8192;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct ViewerConfigFile {
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    base_url: Option<String>,
    stream_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    read_chunk_bytes: Option<usize>,
    max_line_bytes: Option<usize>,
    connect_timeout_secs: Option<u64>,
    token_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    show_masks: Option<bool>,
    render_degenerate_boxes: Option<bool>,
    label_height: Option<f64>,
    min_label_width: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Backend base URL, always ending in '/'.
    pub base_url: String,
    pub stream_path: String,
    pub stream: StreamSettings,
    pub overlay: OverlaySettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub read_chunk_bytes: usize,
    pub max_line_bytes: usize,
    pub connect_timeout: Duration,
    /// Where the session token persists. `None` means a fresh token per run.
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub show_masks: bool,
    pub render_degenerate_boxes: bool,
    pub label_height: f64,
    pub min_label_width: f64,
}

impl ViewerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ViewerConfigFile) -> Self {
        let base_url = file
            .api
            .as_ref()
            .and_then(|api| api.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let stream_path = file
            .api
            .and_then(|api| api.stream_path)
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            read_chunk_bytes: stream_file
                .read_chunk_bytes
                .unwrap_or(DEFAULT_READ_CHUNK_BYTES),
            max_line_bytes: stream_file.max_line_bytes.unwrap_or(DEFAULT_MAX_LINE_BYTES),
            connect_timeout: Duration::from_secs(
                stream_file
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
            token_path: stream_file.token_path,
        };
        let overlay_file = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            show_masks: overlay_file.show_masks.unwrap_or(true),
            render_degenerate_boxes: overlay_file.render_degenerate_boxes.unwrap_or(false),
            label_height: overlay_file.label_height.unwrap_or(DEFAULT_LABEL_HEIGHT),
            min_label_width: overlay_file
                .min_label_width
                .unwrap_or(DEFAULT_MIN_LABEL_WIDTH),
        };
        Self {
            base_url,
            stream_path,
            stream,
            overlay,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DETECT_API_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("DETECT_SESSION_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.stream.token_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(bytes) = std::env::var("DETECT_READ_CHUNK_BYTES") {
            self.stream.read_chunk_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_READ_CHUNK_BYTES must be an integer byte count"))?;
        }
        if let Ok(bytes) = std::env::var("DETECT_MAX_LINE_BYTES") {
            self.stream.max_line_bytes = bytes
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECT_MAX_LINE_BYTES must be an integer byte count"))?;
        }
        if let Ok(secs) = std::env::var("DETECT_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("DETECT_CONNECT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.stream.connect_timeout = Duration::from_secs(secs);
        }
        if let Ok(flag) = std::env::var("DETECT_SHOW_MASKS") {
            self.overlay.show_masks = parse_bool(&flag)
                .ok_or_else(|| anyhow!("DETECT_SHOW_MASKS must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| anyhow!("invalid api base url {}: {}", self.base_url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "api base url must be http or https, got {}",
                parsed.scheme()
            ));
        }
        self.base_url = parsed.to_string();
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
        self.stream_path = self.stream_path.trim_matches('/').to_string();
        if self.stream_path.is_empty() {
            return Err(anyhow!("stream path must not be empty"));
        }
        if self.stream.read_chunk_bytes == 0 {
            return Err(anyhow!("read chunk size must be greater than zero"));
        }
        if self.stream.max_line_bytes == 0 {
            return Err(anyhow!("max line size must be greater than zero"));
        }
        if self.stream.connect_timeout.is_zero() {
            return Err(anyhow!("connect timeout must be greater than zero"));
        }
        if !(self.overlay.label_height >= 0.0 && self.overlay.min_label_width >= 0.0) {
            return Err(anyhow!("label dimensions must be non-negative"));
        }
        Ok(())
    }

    /// Replace the base URL (e.g. from a command-line flag) and re-validate.
    pub fn override_base_url(&mut self, url: &str) -> Result<()> {
        self.base_url = url.trim().to_string();
        self.validate()
    }

    /// Full URL of the streaming endpoint.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            read_chunk_bytes: self.stream.read_chunk_bytes,
            max_line_bytes: self.stream.max_line_bytes,
            ..ControllerSettings::new(&self.base_url, &self.stream_path)
        }
    }

    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            show_masks: self.overlay.show_masks,
            selected_category: None,
            render_degenerate_boxes: self.overlay.render_degenerate_boxes,
            label_height: self.overlay.label_height,
            min_label_width: self.overlay.min_label_width,
        }
    }
}

fn read_config_file(path: &Path) -> Result<ViewerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
