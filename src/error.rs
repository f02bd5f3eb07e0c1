//! Error types for the frame pipeline.

use thiserror::Error;

/// Errors raised while converting, transforming or presenting a frame.
///
/// Every variant is scoped to a single frame: the pipeline reports it and
/// moves on to the next capture.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("GPU error: {0}")]
    Gpu(String),
}

impl PipelineError {
    pub(crate) fn dimensions(width: u32, height: u32) -> Self {
        Self::InvalidDimensions(format!("{width}x{height}"))
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
