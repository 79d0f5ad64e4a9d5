//! Remote-backed branch tips.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use carta_refs::{BranchTip, RefResult};
use carta_store::ObjectStore;
use carta_types::ObjectId;

use crate::transport::RemoteTransport;

/// A [`BranchTip`] whose truth lives on a remote.
///
/// `load` asks the remote for its head; `compare_and_swap` pushes. From a
/// transaction's point of view this is indistinguishable from a local
/// branch: a rejected push reads as a lost compare-and-swap and the
/// finalize loop re-reads and merges. The one extra duty is keeping the
/// local clone current -- a rejected push immediately fetches, so the
/// retry's merge has the winning commit's objects on hand.
pub struct RemoteBranch {
    transport: Arc<dyn RemoteTransport>,
    cache: Arc<dyn ObjectStore>,
    branch: String,
}

impl RemoteBranch {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        cache: Arc<dyn ObjectStore>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            cache,
            branch: branch.into(),
        }
    }

    /// The local clone store this branch reads objects from.
    pub fn cache(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.cache)
    }
}

#[async_trait]
impl BranchTip for RemoteBranch {
    fn name(&self) -> &str {
        &self.branch
    }

    async fn load(&self) -> RefResult<Option<ObjectId>> {
        let head = self.transport.head(&self.branch).await?;
        if let Some(id) = head {
            // Keep the clone current on read: the caller is about to walk
            // history from this commit.
            let have = self
                .cache
                .exists(&id)
                .await
                .map_err(crate::error::RemoteError::Store)?;
            if !have {
                self.transport.fetch_all(&*self.cache).await?;
            }
        }
        Ok(head)
    }

    async fn compare_and_swap(
        &self,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> RefResult<bool> {
        let pushed = self
            .transport
            .push(&self.branch, expected, new, &*self.cache)
            .await?;
        if !pushed {
            // The remote moved past us. Pull its objects down now so the
            // caller's next reconcile can read the winning history.
            warn!(
                url = self.transport.url(),
                branch = %self.branch,
                "push rejected, fetching remote state"
            );
            self.transport.fetch_all(&*self.cache).await?;
        }
        Ok(pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use carta_change::{Change, CommitOptions, GetOptions};
    use carta_store::ancestry::read_commit;
    use carta_store::{InMemoryObjectStore, Signature};

    use crate::transport::InMemoryRemote;

    fn opts(message: &str) -> CommitOptions {
        CommitOptions::new(Signature::now("Remote Test", "remote@example.com"), message)
    }

    struct Client {
        store: Arc<dyn ObjectStore>,
        tip: Arc<dyn BranchTip>,
    }

    fn client(remote: &Arc<InMemoryRemote>) -> Client {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let transport: Arc<dyn RemoteTransport> = Arc::clone(remote) as _;
        let tip: Arc<dyn BranchTip> = Arc::new(RemoteBranch::new(
            transport,
            Arc::clone(&store),
            "master",
        ));
        Client { store, tip }
    }

    impl Client {
        async fn put(&self, path: &str, content: &str) -> ObjectId {
            let mut change = Change::open(Arc::clone(&self.store), Arc::clone(&self.tip))
                .await
                .unwrap();
            let mut h = change.get(path, GetOptions::UPSERT).await.unwrap();
            change.save(&mut h, content.as_bytes().to_vec()).await.unwrap();
            change.finalize(opts(&format!("put {path}"))).await.unwrap()
        }

        async fn sync(&self, remote: &InMemoryRemote) {
            remote.fetch_all(&*self.store).await.unwrap();
        }
    }

    #[tokio::test]
    async fn commit_lands_on_remote() {
        let remote = Arc::new(InMemoryRemote::new("mem://origin"));
        let a = client(&remote);

        let c1 = a.put("contents/post/1.json", "v1").await;
        assert_eq!(remote.head("master").await.unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn rejected_push_fetches_remote_objects() {
        let remote = Arc::new(InMemoryRemote::new("mem://origin"));
        let a = client(&remote);
        let b = client(&remote);

        let c1 = a.put("contents/post/1.json", "from a").await;

        // B never fetched, so a push expecting an unborn branch loses.
        let tip_b = &b.tip;
        let bogus = ObjectId::from_bytes(b"unpushed");
        assert!(!tip_b.compare_and_swap(None, bogus).await.unwrap());

        // The rejection pulled A's history into B's cache.
        assert!(b.store.exists(&c1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_remote_writers_converge_by_merging() {
        let remote = Arc::new(InMemoryRemote::new("mem://origin"));
        let a = client(&remote);
        let b = client(&remote);

        let c1 = a.put("contents/post/1.json", "v1").await;
        b.sync(&remote).await;

        // Both clients edit different paths from the same remote head.
        let mut change_a = Change::open(Arc::clone(&a.store), Arc::clone(&a.tip))
            .await
            .unwrap();
        let mut change_b = Change::open(Arc::clone(&b.store), Arc::clone(&b.tip))
            .await
            .unwrap();

        let mut ha = change_a
            .get("contents/post/a.json", GetOptions::CREATE)
            .await
            .unwrap();
        change_a.save(&mut ha, b"from a".to_vec()).await.unwrap();
        let ca = change_a.finalize(opts("a")).await.unwrap();

        let mut hb = change_b
            .get("contents/post/b.json", GetOptions::CREATE)
            .await
            .unwrap();
        change_b.save(&mut hb, b"from b".to_vec()).await.unwrap();
        // B's first push loses, fetches A's commit, and the retry merges.
        let cb = change_b.finalize(opts("b")).await.unwrap();

        let head = remote.head("master").await.unwrap().unwrap();
        assert_eq!(head, cb);
        let merged = read_commit(&*b.store, &head).await.unwrap();
        assert!(merged.is_merge());
        assert!(merged.parents.contains(&ca));
        let _ = c1;
    }
}
