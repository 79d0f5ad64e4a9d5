//! In-memory reference store for testing and ephemeral use.
//!
//! [`InMemoryRefStore`] stores all refs in a `HashMap` protected by a
//! `RwLock`. Compare-and-swap takes the write lock for the full
//! read-compare-write sequence, which is what makes it atomic from the
//! caller's point of view.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use carta_types::ObjectId;

use crate::error::RefResult;
use crate::traits::RefStore;

/// An in-memory implementation of [`RefStore`].
///
/// Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    refs: RwLock<HashMap<String, ObjectId>>,
}

impl InMemoryRefStore {
    /// Create a new empty ref store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefStore for InMemoryRefStore {
    async fn read_ref(&self, name: &str) -> RefResult<Option<ObjectId>> {
        let refs = self.refs.read().expect("lock poisoned");
        Ok(refs.get(name).copied())
    }

    async fn write_ref(&self, name: &str, target: ObjectId) -> RefResult<()> {
        let mut refs = self.refs.write().expect("lock poisoned");
        refs.insert(name.to_string(), target);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> RefResult<bool> {
        let mut refs = self.refs.write().expect("lock poisoned");
        let current = refs.get(name).copied();
        if current != expected {
            debug!(
                name,
                expected = ?expected.map(|id| id.short_hex()),
                current = ?current.map(|id| id.short_hex()),
                "compare_and_swap lost"
            );
            return Ok(false);
        }
        refs.insert(name.to_string(), new);
        debug!(name, new = %new.short_hex(), "ref advanced");
        Ok(true)
    }

    async fn delete_ref(&self, name: &str) -> RefResult<bool> {
        let mut refs = self.refs.write().expect("lock poisoned");
        Ok(refs.remove(name).is_some())
    }

    async fn list_refs(&self, prefix: &str) -> RefResult<Vec<(String, ObjectId)>> {
        let refs = self.refs.read().expect("lock poisoned");
        let mut result: Vec<(String, ObjectId)> = refs
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        result.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(result)
    }
}
