//! Error types for the capture and comparison pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing or comparing
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed input (target pair, cookie string, option range)
    #[error("Invalid input: {0}")]
    InvalidInputError(String),

    /// The rendering engine is not installed and could not be installed
    #[error("Rendering engine unavailable: {0}")]
    EngineUnavailableError(String),

    /// Navigation or a readiness wait exceeded its bound
    #[error("Capture timed out after {0}ms")]
    CaptureTimeoutError(u64),

    /// A source raster could not be decoded
    #[error("Failed to decode image: {0}")]
    ImageDecodeError(String),

    /// Reading or writing a file failed
    #[error("File I/O failed for {}: {source}", .path.display())]
    FileIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to start the browser or create a page
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to produce or encode pixels
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileIoError {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the engine binary is missing, which is the
    /// only condition the capture pipeline retries after a self-heal.
    pub fn is_engine_missing(&self) -> bool {
        matches!(self, Error::EngineUnavailableError(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::CaptureTimeoutError(_))
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}
