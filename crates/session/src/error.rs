//! Error types for device sessions and the context

use catalog::{PixelFormat, Resolution, StreamKind};
use thiserror::Error;

/// Session and context errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// The (resolution, format) pair is not in the mode catalog
    #[error("unsupported {kind} mode: {resolution} {format}")]
    InvalidMode {
        /// Stream the mode was requested for
        kind: StreamKind,
        /// Requested resolution
        resolution: Resolution,
        /// Requested pixel format
        format: PixelFormat,
    },

    /// A driver call returned a non-zero status
    #[error("driver call {op} failed with status {code}")]
    Driver {
        /// Driver operation that failed
        op: &'static str,
        /// Native status code
        code: i32,
    },

    /// The session was closed
    #[error("device session is closed")]
    DisposedSession,

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    State(String),

    /// The event thread could not be started
    #[error("failed to spawn event thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SessionError {
    /// Build a driver error for `op`
    pub fn driver(op: &'static str, code: i32) -> Self {
        Self::Driver { op, code }
    }

    /// Native status code, if this is a driver error
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            Self::Driver { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result alias using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::VideoFormat;

    #[test]
    fn test_display() {
        let err = SessionError::InvalidMode {
            kind: StreamKind::Video,
            resolution: Resolution::Low,
            format: PixelFormat::Video(VideoFormat::Rgb),
        };
        assert_eq!(err.to_string(), "unsupported video mode: low rgb");

        let err = SessionError::driver("start_stream", -6);
        assert_eq!(err.driver_code(), Some(-6));
        assert!(err.to_string().contains("start_stream"));
        assert_eq!(SessionError::DisposedSession.driver_code(), None);
    }
}
