//! Error types for void-artifact

use std::time::Duration;

use thiserror::Error;
use void_artifact_tar::TarError;

/// Result type alias using void-artifact Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while pushing or pulling artifacts
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed artifact reference
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The manifest lists no layers
    #[error("no layers found in artifact {0}")]
    NoLayers(String),

    /// Source path cannot be packaged with the requested layer type
    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Registry transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking worker task panicked or was aborted
    #[error("background task failed: {0}")]
    Task(String),

    /// Deadline elapsed before the operation finished
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Archive build/extract errors
    #[error(transparent)]
    Tar(#[from] TarError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Config file parse errors
    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Error::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }

    /// The source path to build or push does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Tar(TarError::NotFound(_)))
    }

    /// Extraction stopped at the decompressed-size budget.
    pub fn is_size_limit_exceeded(&self) -> bool {
        matches!(self, Error::Tar(TarError::SizeLimitExceeded { .. }))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Tar(TarError::Cancelled) | Error::Timeout(_))
    }
}
