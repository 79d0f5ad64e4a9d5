use carta_overlay::OverlayError;
use carta_refs::RefError;
use carta_store::StoreError;
use thiserror::Error;

/// Errors from the transactional write path.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// The path does not exist where existence was required.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// A create-only write hit an existing entry.
    #[error("overwrite rejected: {path}")]
    OverwriteRejected { path: String },

    /// An intermediate path segment exists but is not a directory.
    #[error("not a directory: {path}")]
    NotDirectory { path: String },

    /// The path is empty or contains empty segments.
    #[error("invalid path: {path:?}")]
    InvalidPath { path: String },

    /// Both sides changed the same paths differently. Terminal: the
    /// transaction is not retried, the caller must resolve and resubmit.
    #[error("merge conflict on {} path(s): {}", paths.len(), paths.join(", "))]
    Conflict { paths: Vec<String> },

    /// The branch kept moving under us and the retry budget ran out.
    #[error("could not land commit after {attempts} attempt(s): branch kept moving")]
    FinalizeExhausted { attempts: u32 },

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ref backend failure.
    #[error(transparent)]
    Ref(#[from] RefError),
}

impl From<OverlayError> for ChangeError {
    fn from(e: OverlayError) -> Self {
        match e {
            OverlayError::NotFound { path } => Self::NotFound { path },
            OverlayError::OverwriteRejected { path } => Self::OverwriteRejected { path },
            OverlayError::NotDirectory { path } => Self::NotDirectory { path },
            OverlayError::InvalidPath { path } => Self::InvalidPath { path },
            OverlayError::Store(e) => Self::Store(e),
        }
    }
}

/// Result alias for transactional operations.
pub type ChangeResult<T> = Result<T, ChangeError>;
