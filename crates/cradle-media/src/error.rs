//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised by cameras, detectors and sensors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("gst-launch-1.0 not found in PATH")]
    GstLaunchNotFound,

    #[error("Failed to open camera pipeline: {0}")]
    CameraOpen(String),

    #[error("Failed to read frame: {0}")]
    CameraRead(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model has no class names table: {0}")]
    MissingClassNames(PathBuf),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Light sensor error: {0}")]
    Sensor(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn camera_open(message: impl Into<String>) -> Self {
        Self::CameraOpen(message.into())
    }

    pub fn camera_read(message: impl Into<String>) -> Self {
        Self::CameraRead(message.into())
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    pub fn sensor(message: impl Into<String>) -> Self {
        Self::Sensor(message.into())
    }

    /// Whether the error came from the camera (open or read).
    pub fn is_camera_error(&self) -> bool {
        matches!(
            self,
            MediaError::CameraOpen(_) | MediaError::CameraRead(_) | MediaError::GstLaunchNotFound
        )
    }
}
