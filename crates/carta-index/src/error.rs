use carta_refs::RefError;
use carta_store::StoreError;
use thiserror::Error;

/// Errors from index feeding.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying object store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Ref backend failure.
    #[error(transparent)]
    Ref(#[from] RefError),

    /// The sink refused or failed to apply an emission.
    #[error("sink failure: {0}")]
    Sink(String),
}

/// Result alias for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
