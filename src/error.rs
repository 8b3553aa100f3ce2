//! Typed failures surfaced by the SDK core.
//!
//! Retryability is not encoded here; the retry module decides what to do
//! with a failure based on the configured status/method matrix.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the connection, upload and pagination layers.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure (DNS, refused, reset, TLS, ...).
    #[error("network error after {attempts} attempt(s): {message}")]
    Network { message: String, attempts: u32 },

    /// The per-request timeout elapsed without a response.
    #[error("request timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout { timeout: Duration, attempts: u32 },

    /// Non-2xx response, either outside the retryable matrix or after the
    /// retry budget was exhausted. Carries the server body for diagnostics.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The server rejected the grant or a freshly acquired token.
    /// Terminal: never retried beyond the single refresh replay.
    #[error("authentication failed (status {status:?}): {body}")]
    Auth { status: Option<u16>, body: String },

    /// A multipart upload session was abandoned; the caller must start a
    /// new upload from scratch.
    #[error("upload aborted: {0}")]
    UploadAborted(String),

    /// Local file access failure. Never retried.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The response body could not be decoded as the expected JSON shape.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status associated with this failure, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Auth { status, .. } => *status,
            _ => None,
        }
    }
}
