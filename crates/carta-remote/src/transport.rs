//! Transports and the in-memory remote.
//!
//! A [`RemoteTransport`] is the whole wire surface: read a branch head,
//! pull every object down, push a commit closure up. Everything above it
//! (clone cache, remote-backed branches) is transport-agnostic, which is
//! also what makes the hosted side testable -- [`InMemoryRemote`] simulates
//! a remote repository with nothing but the in-memory backends.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tracing::debug;

use carta_refs::{InMemoryRefStore, RefStore};
use carta_store::{Commit, InMemoryObjectStore, ObjectKind, ObjectStore, Tree};
use carta_types::ObjectId;

use crate::error::{RemoteError, RemoteResult};

/// The wire surface of one remote repository.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// The remote's URL, for diagnostics and cache keying.
    fn url(&self) -> &str;

    /// The remote's head for `branch`, `None` for an unborn branch.
    async fn head(&self, branch: &str) -> RemoteResult<Option<ObjectId>>;

    /// Copy every remote object into `into`. Returns the number copied.
    ///
    /// Idempotent: objects already present locally are skipped.
    async fn fetch_all(&self, into: &dyn ObjectStore) -> RemoteResult<u64>;

    /// Push the closure of `new` from `from`, then atomically move the
    /// remote branch from `expected` to `new`.
    ///
    /// Returns `Ok(false)` when the remote rejected the ref update because
    /// the branch no longer matches `expected`; the objects may have been
    /// transferred regardless.
    async fn push(
        &self,
        branch: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
        from: &dyn ObjectStore,
    ) -> RemoteResult<bool>;
}

/// Copy the full object closure of `root` (a commit) from one store into
/// another. An object already present in `to` prunes its whole reachable
/// subgraph, so incremental pushes transfer only the new delta.
pub async fn copy_closure(
    from: &dyn ObjectStore,
    to: &dyn ObjectStore,
    root: &ObjectId,
) -> RemoteResult<u64> {
    let mut copied = 0u64;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(*root);
    queue.push_back(*root);

    while let Some(id) = queue.pop_front() {
        if to.exists(&id).await? {
            continue;
        }
        let obj = from
            .read(&id)
            .await?
            .ok_or(carta_store::StoreError::NotFound(id))?;
        match obj.kind {
            ObjectKind::Commit => {
                let commit = Commit::from_stored_object(&obj)?;
                for next in commit.parents.iter().chain(std::iter::once(&commit.tree)) {
                    if seen.insert(*next) {
                        queue.push_back(*next);
                    }
                }
            }
            ObjectKind::Tree => {
                let tree = Tree::from_stored_object(&obj)?;
                for entry in &tree.entries {
                    if seen.insert(entry.object_id) {
                        queue.push_back(entry.object_id);
                    }
                }
            }
            ObjectKind::Blob => {}
        }
        to.write(&obj).await?;
        copied += 1;
    }
    Ok(copied)
}

/// A hosted repository simulated in memory, for tests and embedding.
pub struct InMemoryRemote {
    url: String,
    objects: InMemoryObjectStore,
    refs: InMemoryRefStore,
}

impl InMemoryRemote {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            objects: InMemoryObjectStore::new(),
            refs: InMemoryRefStore::new(),
        }
    }

    fn canonical(branch: &str) -> String {
        format!("refs/heads/{branch}")
    }

    /// Number of objects the remote holds.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl RemoteTransport for InMemoryRemote {
    fn url(&self) -> &str {
        &self.url
    }

    async fn head(&self, branch: &str) -> RemoteResult<Option<ObjectId>> {
        Ok(self.refs.read_ref(&Self::canonical(branch)).await?)
    }

    async fn fetch_all(&self, into: &dyn ObjectStore) -> RemoteResult<u64> {
        let mut copied = 0u64;
        for id in self.objects.all_ids() {
            if into.exists(&id).await? {
                continue;
            }
            let obj = self
                .objects
                .read(&id)
                .await?
                .ok_or(carta_store::StoreError::NotFound(id))?;
            into.write(&obj).await?;
            copied += 1;
        }
        debug!(url = %self.url, copied, "fetched all objects");
        Ok(copied)
    }

    async fn push(
        &self,
        branch: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
        from: &dyn ObjectStore,
    ) -> RemoteResult<bool> {
        // Cheap pre-check so a doomed push skips the object transfer. The
        // compare-and-swap below is still the authoritative decision.
        if self.refs.read_ref(&Self::canonical(branch)).await? != expected {
            return Ok(false);
        }
        let copied = copy_closure(from, &self.objects, &new).await?;
        let accepted = self
            .refs
            .compare_and_swap(&Self::canonical(branch), expected, new)
            .await?;
        debug!(
            url = %self.url,
            branch,
            copied,
            accepted,
            commit = %new.short_hex(),
            "push"
        );
        Ok(accepted)
    }
}

impl From<RemoteError> for carta_refs::RefError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Ref(e) => e,
            other => carta_refs::RefError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use carta_store::ancestry::{write_blob, write_commit, write_tree};
    use carta_store::{Blob, EntryMode, Signature, TreeEntry};

    async fn seed_commit(store: &dyn ObjectStore, content: &str) -> ObjectId {
        let blob = write_blob(store, &Blob::new(content.as_bytes().to_vec()))
            .await
            .unwrap();
        let tree = write_tree(
            store,
            &Tree::new(vec![TreeEntry::new(EntryMode::Regular, "doc.json", blob)]),
        )
        .await
        .unwrap();
        let sig = Signature::now("Remote Test", "remote@example.com");
        write_commit(
            store,
            &Commit {
                tree,
                parents: vec![],
                author: sig.clone(),
                committer: sig,
                message: "seed".into(),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn push_transfers_closure_and_moves_head() {
        let local = InMemoryObjectStore::new();
        let remote = InMemoryRemote::new("mem://origin");
        let commit = seed_commit(&local, "hello").await;

        assert!(remote.push("master", None, commit, &local).await.unwrap());
        assert_eq!(remote.head("master").await.unwrap(), Some(commit));
        // Blob + tree + commit all arrived.
        assert_eq!(remote.object_count(), 3);
    }

    #[tokio::test]
    async fn stale_push_is_rejected() {
        let local = InMemoryObjectStore::new();
        let remote = InMemoryRemote::new("mem://origin");
        let c1 = seed_commit(&local, "one").await;
        let c2 = seed_commit(&local, "two").await;

        assert!(remote.push("master", None, c1, &local).await.unwrap());
        // Expected None no longer holds.
        assert!(!remote.push("master", None, c2, &local).await.unwrap());
        assert_eq!(remote.head("master").await.unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn fetch_all_is_idempotent() {
        let local = InMemoryObjectStore::new();
        let remote = InMemoryRemote::new("mem://origin");
        let commit = seed_commit(&local, "hello").await;
        remote.push("master", None, commit, &local).await.unwrap();

        let clone = InMemoryObjectStore::new();
        assert_eq!(remote.fetch_all(&clone).await.unwrap(), 3);
        assert_eq!(remote.fetch_all(&clone).await.unwrap(), 0);
        assert!(clone.exists(&commit).await.unwrap());
    }

    #[tokio::test]
    async fn copy_closure_prunes_shared_history() {
        let a = InMemoryObjectStore::new();
        let b = InMemoryObjectStore::new();
        let c1 = seed_commit(&a, "shared").await;
        copy_closure(&a, &b, &c1).await.unwrap();

        // A second commit sharing the first's tree copies only itself.
        let sig = Signature::now("Remote Test", "remote@example.com");
        let tree = carta_store::ancestry::read_commit(&a, &c1).await.unwrap().tree;
        let c2 = write_commit(
            &a,
            &Commit {
                tree,
                parents: vec![c1],
                author: sig.clone(),
                committer: sig,
                message: "follow-up".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(copy_closure(&a, &b, &c2).await.unwrap(), 1);
    }
}
