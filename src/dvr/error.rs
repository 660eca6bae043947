//! Error types for DVR operations

use thiserror::Error;

/// Errors surfaced by the DVR components
#[derive(Debug, Error)]
pub enum DvrError {
    /// Update targeted a recording id that was never added
    #[error("Recording not found: {0}")]
    RecordingNotFound(i64),

    #[error("Recording already exists: {0}")]
    DuplicateRecording(i64),

    #[error("Invalid recording: {0}")]
    InvalidRecording(String),

    /// The store has not finished loading yet
    #[error("DVR data manager is not initialized")]
    NotInitialized,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Background work needs a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DvrError>;
