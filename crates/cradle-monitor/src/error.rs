//! Monitor error types.

use cradle_media::MediaError;
use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alert rejected with status {0}")]
    AlertRejected(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Hardware and network failures that are recovered by retrying.
    ///
    /// Nothing in the monitor is fatal at runtime; this only separates the
    /// expected failures from programming errors in logs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MonitorError::Media(_)
                | MonitorError::WebSocket(_)
                | MonitorError::Http(_)
                | MonitorError::AlertRejected(_)
                | MonitorError::Transport(_)
                | MonitorError::Timeout(_)
                | MonitorError::Io(_)
        )
    }
}
