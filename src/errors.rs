use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Custom error types for the area measurement pipeline
#[derive(Error, Debug)]
pub enum AreaError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("Failed to load image {path}: {reason}")]
    LoadFailure {
        path: PathBuf,
        reason: String,
    },

    #[error("Invalid gamma value: {0} (must be finite and > 0)")]
    InvalidGamma(f64),

    #[error("Invalid stretch threshold: {0} (must be in [0, 1))")]
    InvalidThreshold(f64),

    #[error("Calibration unresolved: {0}")]
    CalibrationUnresolved(String),

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Camera frame timed out")]
    CameraTimeout,

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, AreaError>;
