//! Desk configuration.
//!
//! Loaded from `livedrop.json` in the data directory when present, then
//! overridden by `LIVEDROP_*` environment variables. Store-level settings
//! (currency, default delivery) are not here; they live on the backend.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "livedrop.json";

const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_VISION_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_VISION_MODEL: &str = "claude-opus-4-5";

/// Which decoder turns camera input into codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Decode symbols from camera frames with the bundled decoder.
    #[default]
    Bundled,
    /// Hardware scanner on a serial port that decodes on-device.
    Serial,
}

impl DetectorBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bundled" | "camera" => Some(DetectorBackend::Bundled),
            "serial" | "native" => Some(DetectorBackend::Serial),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    /// Extra attempts for a failed GET.
    pub get_retries: u32,
    pub cache_stale_secs: u64,
    pub detector: DetectorBackend,
    pub scanner_port: String,
    pub scanner_baud_rate: u32,
    pub vision_url: String,
    pub vision_model: String,
    pub dashboard_poll_secs: u64,
    pub pending_poll_secs: u64,
    pub dispatch_poll_secs: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
            get_retries: 1,
            cache_stale_secs: 30,
            detector: DetectorBackend::Bundled,
            scanner_port: default_scanner_port().to_string(),
            scanner_baud_rate: 9600,
            vision_url: DEFAULT_VISION_URL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            dashboard_poll_secs: 30,
            pending_poll_secs: 30,
            dispatch_poll_secs: 15,
            log_dir: None,
        }
    }
}

fn default_scanner_port() -> &'static str {
    if cfg!(windows) {
        "COM2"
    } else {
        "/dev/ttyACM0"
    }
}

impl AppConfig {
    /// Read `<data_dir>/livedrop.json` (missing file means defaults) and
    /// apply environment overrides.
    pub fn load(data_dir: &Path) -> Result<Self, String> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<AppConfig>(&raw)
                .map_err(|e| format!("Invalid config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(format!("Cannot read config {}: {e}", path.display())),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.api_base_url = normalize_api_url(&config.api_base_url);
        info!(api = %config.api_base_url, detector = ?config.detector, "configuration loaded");
        Ok(config)
    }

    /// Apply `LIVEDROP_*` overrides from `lookup` (the environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("LIVEDROP_API_URL") {
            self.api_base_url = url;
        }
        if let Some(raw) = get("LIVEDROP_DETECTOR") {
            match DetectorBackend::parse(&raw) {
                Some(d) => self.detector = d,
                None => warn!(value = %raw, "ignoring unknown LIVEDROP_DETECTOR"),
            }
        }
        if let Some(port) = get("LIVEDROP_SCANNER_PORT") {
            self.scanner_port = port;
        }
        if let Some(raw) = get("LIVEDROP_SCANNER_BAUD") {
            match raw.parse::<u32>() {
                Ok(baud) => self.scanner_baud_rate = baud,
                Err(_) => warn!(value = %raw, "ignoring invalid LIVEDROP_SCANNER_BAUD"),
            }
        }
        if let Some(url) = get("LIVEDROP_VISION_URL") {
            self.vision_url = url;
        }
        if let Some(model) = get("LIVEDROP_VISION_MODEL") {
            self.vision_model = model;
        }
        if let Some(dir) = get("LIVEDROP_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn cache_staleness(&self) -> Duration {
        Duration::from_secs(self.cache_stale_secs)
    }
}

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - ensure it ends with the `/api` base path
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return DEFAULT_API_URL.to_string();
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    if !url.ends_with("/api") {
        url.push_str("/api");
    }
    url
}
