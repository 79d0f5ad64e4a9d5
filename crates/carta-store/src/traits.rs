use async_trait::async_trait;

use carta_types::ObjectId;

use crate::error::StoreResult;
use crate::object::StoredObject;

/// Content-addressed object store.
///
/// All implementations must satisfy these invariants:
/// - Objects are immutable once written. Content-addressing guarantees this:
///   the same data always produces the same ID.
/// - `read` returns `Ok(None)` for a missing object and `Err` only for I/O
///   failure or corruption; callers that require existence map `None` to
///   [`StoreError::NotFound`](crate::StoreError::NotFound).
/// - Concurrent reads are always safe (objects are immutable).
/// - The store never interprets object contents -- it is a pure key-value
///   store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object by its content-addressed ID.
    async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Write an object and return its content-addressed ID.
    ///
    /// If the object already exists, this is a no-op (idempotent).
    async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Check whether an object exists in the store.
    async fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Delete an object by ID. Returns `true` if the object existed.
    ///
    /// Intended for garbage collection only; deleting referenced objects
    /// corrupts the graph.
    async fn delete(&self, id: &ObjectId) -> StoreResult<bool>;
}
