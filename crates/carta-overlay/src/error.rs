use carta_store::StoreError;
use thiserror::Error;

/// Errors from overlay operations.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The path does not exist where existence was required.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// A create-only operation hit an existing entry.
    #[error("overwrite rejected: {path}")]
    OverwriteRejected { path: String },

    /// An intermediate path segment exists but is not a directory.
    #[error("not a directory: {path}")]
    NotDirectory { path: String },

    /// The path is empty or contains empty segments.
    #[error("invalid path: {path:?}")]
    InvalidPath { path: String },

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for overlay operations.
pub type OverlayResult<T> = Result<T, OverlayError>;
