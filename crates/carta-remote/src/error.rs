use carta_refs::RefError;
use carta_store::StoreError;
use thiserror::Error;

/// Errors from the remote boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The transport failed to reach or operate on the remote.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ref backend failure.
    #[error(transparent)]
    Ref(#[from] RefError),
}

/// Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;
