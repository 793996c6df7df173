//! Error enums shared across the external seams

use thiserror::Error;

/// Microphone acquisition and capture failures.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// No usable input device, or the device could not be opened
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The platform refused access to the microphone
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The input stream failed after it was opened
    #[error("audio input stream failed: {0}")]
    Stream(String),
}

/// Remote service failures (transcription, dialogue, synthesis,
/// verification).
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Transport-level failure (connection, timeout, TLS)
    #[error("request failed: {0}")]
    Http(String),

    /// The service answered with a non-success status
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Speaker output failures.
#[derive(Debug, Clone, Error)]
pub enum PlaybackError {
    /// No usable output device
    #[error("audio output device unavailable: {0}")]
    Device(String),

    /// The fetched audio could not be decoded
    #[error("could not decode audio: {0}")]
    Decode(String),
}
