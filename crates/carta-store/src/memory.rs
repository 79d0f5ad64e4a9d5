use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use carta_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::ObjectStore;

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. All objects are held in memory behind a
/// `RwLock` for safe concurrent access. Objects are cloned on read/write.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|obj| obj.size)
            .sum()
    }

    /// Return a sorted list of all object IDs in the store.
    pub fn all_ids(&self) -> Vec<ObjectId> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<ObjectId> = map.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).cloned())
    }

    async fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        let mut map = self.objects.write().expect("lock poisoned");
        // Idempotent: the same ID always maps to the same content.
        if map.insert(id, object.clone()).is_none() {
            debug!(id = %id.short_hex(), kind = %object.kind, size = object.size, "stored object");
        }
        Ok(id)
    }

    async fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(id))
    }

    async fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Blob, ObjectKind};

    fn make_blob(content: &[u8]) -> StoredObject {
        Blob::new(content.to_vec()).to_stored_object()
    }

    #[tokio::test]
    async fn write_and_read_blob() {
        let store = InMemoryObjectStore::new();
        let obj = make_blob(b"hello world");
        let id = store.write(&obj).await.unwrap();
        assert!(!id.is_null());

        let read_back = store.read(&id).await.unwrap().expect("should exist");
        assert_eq!(read_back, obj);
        assert_eq!(read_back.kind, ObjectKind::Blob);
    }

    #[tokio::test]
    async fn same_content_produces_same_id() {
        let store = InMemoryObjectStore::new();
        let id1 = store.write(&make_blob(b"identical")).await.unwrap();
        let id2 = store.write(&make_blob(b"identical")).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn different_content_produces_different_ids() {
        let store = InMemoryObjectStore::new();
        let id1 = store.write(&make_blob(b"aaa")).await.unwrap();
        let id2 = store.write(&make_blob(b"bbb")).await.unwrap();
        assert_ne!(id1, id2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn read_missing_object_returns_none() {
        let store = InMemoryObjectStore::new();
        let id = ObjectId::from_bytes(b"missing");
        assert!(store.read(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exists_and_delete() {
        let store = InMemoryObjectStore::new();
        let id = store.write(&make_blob(b"to-delete")).await.unwrap();
        assert!(store.exists(&id).await.unwrap());
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.exists(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn total_bytes() {
        let store = InMemoryObjectStore::new();
        store.write(&make_blob(b"12345")).await.unwrap();
        store.write(&make_blob(b"123456789")).await.unwrap();
        assert_eq!(store.total_bytes(), 14);
    }

    #[tokio::test]
    async fn all_ids_is_sorted() {
        let store = InMemoryObjectStore::new();
        for content in [b"aaa".as_slice(), b"bbb", b"ccc"] {
            store.write(&make_blob(content)).await.unwrap();
        }
        let ids = store.all_ids();
        assert_eq!(ids.len(), 3);
        for w in ids.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[tokio::test]
    async fn concurrent_reads_are_safe() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryObjectStore::new());
        let obj = make_blob(b"shared data");
        let id = store.write(&obj).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let result = store.read(&id).await.unwrap();
                    assert_eq!(result.unwrap().compute_id(), id);
                })
            })
            .collect();

        for h in handles {
            h.await.expect("task should not panic");
        }
    }
}
