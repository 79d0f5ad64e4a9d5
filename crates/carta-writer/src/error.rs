use carta_change::ChangeError;
use carta_refs::RefError;
use carta_store::StoreError;
use carta_types::TypeError;
use thiserror::Error;

/// Errors from the document write path, each mapped to an HTTP-style
/// status by [`WriterError::status`].
#[derive(Debug, Error)]
pub enum WriterError {
    /// The supplied version token does not resolve to a commit.
    #[error("version token does not resolve: {token:?}")]
    VersionMismatch { token: String },

    /// No document at the given identity.
    #[error("document not found: {path}")]
    NotFound { path: String },

    /// A create collided with an existing document id.
    #[error("id already in use: {path}")]
    IdInUse { path: String },

    /// Concurrent writers changed the same paths; the caller must re-read
    /// and resubmit.
    #[error("conflict on {} path(s): {}", paths.len(), paths.join(", "))]
    Conflict { paths: Vec<String> },

    /// Document encode/decode failure.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// Transaction machinery failure not covered by the variants above.
    #[error(transparent)]
    Change(ChangeError),

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ref backend failure.
    #[error(transparent)]
    Ref(#[from] RefError),
}

impl WriterError {
    /// The HTTP-style status for this error: stale token 400, missing
    /// document 404, contention 409, everything else 500.
    pub fn status(&self) -> u16 {
        match self {
            Self::VersionMismatch { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::IdInUse { .. } | Self::Conflict { .. } => 409,
            _ => 500,
        }
    }
}

impl From<ChangeError> for WriterError {
    fn from(e: ChangeError) -> Self {
        match e {
            ChangeError::NotFound { path } => Self::NotFound { path },
            ChangeError::OverwriteRejected { path } => Self::IdInUse { path },
            ChangeError::Conflict { paths } => Self::Conflict { paths },
            ChangeError::Store(e) => Self::Store(e),
            ChangeError::Ref(e) => Self::Ref(e),
            other => Self::Change(other),
        }
    }
}

/// Result alias for writer operations.
pub type WriterResult<T> = Result<T, WriterError>;
