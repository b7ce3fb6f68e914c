use std::io;
use std::path::{Path, PathBuf};

/// Errors produced while building or extracting artifact archives.
#[derive(Debug, thiserror::Error)]
pub enum TarError {
    #[error("source path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("decompressed size {actual} exceeds limit of {limit} bytes")]
    SizeLimitExceeded { limit: u64, actual: u64 },

    #[error("unsupported layer type: {0:?}")]
    UnsupportedLayerType(String),

    #[error("unsafe archive entry: {0}")]
    UnsafePath(String),

    #[error("invalid ignore pattern {pattern:?}: {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TarError>;

/// Attach the failing operation and path to an `io::Error`.
pub(crate) trait IoContext<T> {
    fn io_ctx(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_ctx(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| TarError::Io {
            op,
            path: path.to_path_buf(),
            source,
        })
    }
}
