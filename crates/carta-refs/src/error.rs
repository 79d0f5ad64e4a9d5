//! Error types for reference operations.

use thiserror::Error;

/// Errors that can occur during reference operations.
///
/// A missing ref is not an error here: reads return `Option` and a branch
/// that does not exist yet is the ordinary unborn state.
#[derive(Debug, Error)]
pub enum RefError {
    /// The branch name is invalid.
    #[error("invalid branch name: {name}: {reason}")]
    InvalidBranchName { name: String, reason: String },

    /// I/O error from the underlying backend (including a remote).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote side rejected or failed a ref operation.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience type alias for ref operations.
pub type RefResult<T> = std::result::Result<T, RefError>;
