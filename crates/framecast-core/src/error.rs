//! Closed error taxonomy surfaced across the worker boundary and the façade.
//!
//! Internal glue (ffmpeg FFI, file I/O, channel plumbing) keeps propagating
//! with `anyhow::Result` the way the rest of the corpus does; this type is
//! only what crosses the pool/façade boundary toward a caller.

use std::fmt;

/// One of the nine closed error kinds from the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    MediaNotSupported,
    MediaLoadFailed,
    DecodeError,
    NetworkError,
    PermissionDenied,
    PlaybackError,
    TrackNotFound,
    InvalidState,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::MediaNotSupported => "MEDIA_NOT_SUPPORTED",
            ErrorCode::MediaLoadFailed => "MEDIA_LOAD_FAILED",
            ErrorCode::DecodeError => "DECODE_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::PlaybackError => "PLAYBACK_ERROR",
            ErrorCode::TrackNotFound => "TRACK_NOT_FOUND",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

/// A typed compositor error: code + human message + optional wrapped cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CompositorError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl CompositorError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: Some(details.into()) }
    }

    /// Wraps an internal `anyhow::Error` (e.g. an ffmpeg open/decode failure)
    /// as a typed error, preserving its text as `details`.
    pub fn wrap(code: ErrorCode, message: impl Into<String>, cause: &anyhow::Error) -> Self {
        Self::with_details(code, message, cause.to_string())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn unknown_source(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UnknownError, format!("unknown source: {id}"))
    }
}

pub type Result<T> = std::result::Result<T, CompositorError>;
