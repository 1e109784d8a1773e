//! Error types for the backend client, the AI call and the camera.
//!
//! Every failure the backend can produce collapses into a single
//! human-readable string when displayed; that string is what the shell
//! shows in its notification toast.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Backend unreachable (DNS, refused connection, TLS).
    #[error("Cannot reach backend at {0}")]
    Unreachable(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    /// Non-2xx response. `message` is the backend's `error` field when it
    /// sent one, otherwise a status-derived fallback.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Invalid response from backend: {0}")]
    Decode(String),

    /// Rejected client-side before any request was sent.
    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a GET failing with this error is worth one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Unreachable(_) | ApiError::Timeout(_) | ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::Decode(_) | ApiError::Validation(_) => false,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures of the AI product identification call.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Enter your AI API key first")]
    MissingKey,

    #[error("Start camera first")]
    NoFrame,

    #[error("{0}")]
    Request(String),

    /// Error object returned by the vision service.
    #[error("{0}")]
    Service(String),

    #[error("unreadable reply: {0}")]
    BadReply(String),

    #[error("image encoding failed: {0}")]
    Encode(String),
}

impl VisionError {
    /// Toast text. Call failures carry the `AI error:` prefix; the two
    /// precondition errors read as instructions.
    pub fn notification(&self) -> String {
        match self {
            VisionError::MissingKey | VisionError::NoFrame => self.to_string(),
            other => format!("AI error: {other}"),
        }
    }
}

/// Camera and decoder failures.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Camera is already in use")]
    CameraBusy,

    #[error("Camera stream ended")]
    CameraClosed,

    #[error("Scanner port error: {0}")]
    Serial(String),
}
