//! Error types for voipscope-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the voipscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// External tool failed to start, timed out, or exited non-zero
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// Malformed dissector output
    #[error("parse error in {profile} output: {message}")]
    Parse { profile: String, message: String },

    /// Dialog not present in the current index
    #[error("dialog not found: {0}")]
    DialogNotFound(String),

    /// No capture file available
    #[error("capture not found: {}", .0.display())]
    CaptureNotFound(PathBuf),
}

impl Error {
    /// True for the not-found family, which callers surface differently
    /// from tool failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DialogNotFound(_) | Error::CaptureNotFound(_))
    }
}

/// Result type alias for voipscope-core
pub type Result<T> = std::result::Result<T, Error>;
