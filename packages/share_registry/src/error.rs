//! Error types and stable error codes for the share registry.

use std::path::PathBuf;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ShareError {
    #[error("failed to connect to the server at {addr}")]
    ConnectionFailed { addr: String },

    #[error("not an image: {path}")]
    NotAnImage { path: PathBuf },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("write failed: {reason}")]
    WriteFailed { reason: String },

    #[error("no session for connection {connection_id}")]
    SessionNotFound { connection_id: String },

    #[error("invalid filename: {filename:?}")]
    InvalidFilename { filename: String },

    #[error("payload of {size} bytes exceeds the {max} byte upload cap")]
    PayloadTooLarge { size: usize, max: usize },

    /// A server-reported failure the client cannot map onto a more
    /// specific variant. Never produced server-side.
    #[error("server rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl ShareError {
    /// Stable machine-readable code, used in wire-level error messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::NotAnImage { .. } => "not_an_image",
            Self::FileNotFound { .. } => "file_not_found",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::WriteFailed { .. } => "write_failed",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::InvalidFilename { .. } => "invalid_filename",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Rejected { .. } => "rejected",
        }
    }
}
