//! Diagnostics for the order desk.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Health snapshot**: backend reachability, camera, AI key, scanner backend
//! - **Logging setup**: console + daily rolling file, with old files pruned

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Log files older than this are deleted at startup.
pub const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const LOG_FILE_PREFIX: &str = "livedrop";
const APP_DIR: &str = "livedrop-desk";
const DEFAULT_FILTER: &str = "info,livedrop_lib=debug";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct HealthInputs<'a> {
    pub api_base_url: &'a str,
    pub backend_online: bool,
    pub camera_in_use: bool,
    pub ai_key_present: bool,
    pub detector: &'a str,
    pub pending_orders: usize,
}

pub fn health_snapshot(inputs: &HealthInputs<'_>) -> Value {
    json!({
        "backend": {
            "url": inputs.api_base_url,
            "online": inputs.backend_online,
        },
        "cameraInUse": inputs.camera_in_use,
        "aiKeyConfigured": inputs.ai_key_present,
        "detector": inputs.detector,
        "pendingOrders": inputs.pending_orders,
        "about": get_about_info(),
    })
}

// ---------------------------------------------------------------------------
// Directories
// ---------------------------------------------------------------------------

/// Per-user data directory (`%LOCALAPPDATA%`, `$XDG_DATA_HOME` or
/// `~/.local/share`, then `livedrop-desk`).
pub fn get_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR)
}

pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Delete our log files last modified more than `retention` ago. Returns
/// how many were removed.
pub fn prune_old_logs(log_dir: &Path, retention: Duration) -> usize {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !path.is_file() || !is_ours {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= retention {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to prune log file {}: {e}", path.display()),
        }
    }
    removed
}

/// Install the global subscriber: `RUST_LOG`-overridable filter, console
/// output, and a non-blocking daily file under `log_dir`. Keep the guard
/// alive for the life of the process; dropping it flushes the file.
pub fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let pruned = prune_old_logs(log_dir, LOG_RETENTION);
    fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if installed.is_ok() {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            git_sha = env!("BUILD_GIT_SHA"),
            log_dir = %log_dir.display(),
            pruned,
            "Starting LiveDrop desk"
        );
    }
    guard
}
