//! The clone cache.
//!
//! Opening a remote means standing up a local object store and pulling the
//! remote's objects into it -- too expensive to repeat per operation. A
//! [`CloneCache`] holds one opened clone per URL. It is an explicitly
//! constructed value that callers create once at startup and pass where
//! needed; nothing in this crate holds global state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use carta_store::{InMemoryObjectStore, ObjectStore};

use crate::branch::RemoteBranch;
use crate::error::RemoteResult;
use crate::transport::RemoteTransport;

/// An opened clone: the local object store plus the transport it mirrors.
#[derive(Clone)]
pub struct CloneState {
    pub store: Arc<dyn ObjectStore>,
    pub transport: Arc<dyn RemoteTransport>,
}

impl CloneState {
    /// A [`RemoteBranch`] reading through this clone.
    pub fn branch(&self, name: impl Into<String>) -> RemoteBranch {
        RemoteBranch::new(Arc::clone(&self.transport), Arc::clone(&self.store), name)
    }
}

/// One opened clone per remote URL.
#[derive(Default)]
pub struct CloneCache {
    clones: RwLock<HashMap<String, CloneState>>,
}

impl CloneCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached clone for a URL, if one is open.
    pub fn get(&self, url: &str) -> Option<CloneState> {
        self.clones
            .read()
            .expect("lock poisoned")
            .get(url)
            .cloned()
    }

    /// Open (or reuse) the clone for `transport`'s URL.
    ///
    /// A cache miss creates a fresh store and performs the initial fetch.
    pub async fn open(&self, transport: Arc<dyn RemoteTransport>) -> RemoteResult<CloneState> {
        let url = transport.url().to_string();
        if let Some(state) = self.get(&url) {
            return Ok(state);
        }

        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let copied = transport.fetch_all(&*store).await?;
        debug!(url, copied, "opened clone");

        let state = CloneState { store, transport };
        let mut clones = self.clones.write().expect("lock poisoned");
        // Two tasks may have raced the fetch; the first insert wins so every
        // caller shares one store.
        Ok(clones
            .entry(url)
            .or_insert_with(|| state.clone())
            .clone())
    }

    /// Number of open clones.
    pub fn len(&self) -> usize {
        self.clones.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every open clone. Tests use this to force re-fetching.
    pub fn clear(&self) {
        self.clones.write().expect("lock poisoned").clear();
    }
}
