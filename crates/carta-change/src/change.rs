//! The transactional write unit.
//!
//! A [`Change`] captures a parent snapshot, buffers path-level edits in a
//! copy-on-write overlay, and lands the result on a branch through a single
//! compare-and-swap. Contention is resolved by fast-forwarding or merging
//! against whatever head won, then retrying the swap with exponential
//! backoff. Only a content conflict is terminal.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use carta_overlay::MutableTree;
use carta_refs::BranchTip;
use carta_store::ancestry::{merge_base, read_commit, write_blob, write_commit};
use carta_store::{Blob, Commit, EntryMode, ObjectStore, Signature};
use carta_types::ObjectId;

use crate::error::{ChangeError, ChangeResult};
use crate::handle::{FileHandle, FileState, GetOptions};
use crate::merge::{merge_trees, MergeOutcome};

/// First retry delay after a lost compare-and-swap.
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
/// Cumulative sleep budget; once the next delay would exceed it, finalize
/// gives up with `FinalizeExhausted`.
const RETRY_BUDGET: Duration = Duration::from_secs(5);

/// Commit metadata supplied at finalize time.
#[derive(Clone, Debug)]
pub struct CommitOptions {
    pub author: Signature,
    /// Defaults to `author` when `None`.
    pub committer: Option<Signature>,
    pub message: String,
}

impl CommitOptions {
    /// Author-only metadata with the given message.
    pub fn new(author: Signature, message: impl Into<String>) -> Self {
        Self {
            author,
            committer: None,
            message: message.into(),
        }
    }
}

/// A transaction against one branch.
///
/// Opened at the branch's current head (or an explicit historical commit),
/// mutated through [`FileHandle`]s, and landed with [`finalize`](Self::finalize).
/// Between open and finalize nothing is visible to other readers of the
/// branch.
pub struct Change {
    store: Arc<dyn ObjectStore>,
    tip: Arc<dyn BranchTip>,
    parent: Option<ObjectId>,
    parent_tree: Option<ObjectId>,
    overlay: MutableTree,
}

impl Change {
    /// Open a transaction at the branch's current head.
    pub async fn open(store: Arc<dyn ObjectStore>, tip: Arc<dyn BranchTip>) -> ChangeResult<Self> {
        let head = tip.load().await?;
        Self::open_at(store, tip, head).await
    }

    /// Open a transaction anchored at an explicit commit (`None` for an
    /// empty snapshot). Used to resume from a historical version; the
    /// divergence is reconciled at finalize.
    pub async fn open_at(
        store: Arc<dyn ObjectStore>,
        tip: Arc<dyn BranchTip>,
        parent: Option<ObjectId>,
    ) -> ChangeResult<Self> {
        let parent_tree = match parent {
            Some(id) => Some(read_commit(&*store, &id).await?.tree),
            None => None,
        };
        let overlay = MutableTree::open(Arc::clone(&store), parent_tree).await?;
        Ok(Self {
            store,
            tip,
            parent,
            parent_tree,
            overlay,
        })
    }

    /// The commit this transaction is anchored at.
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Open a handle on `path` with the given intent flags.
    ///
    /// The handle reflects the overlay's current view, so a path staged
    /// earlier in the same transaction reads back its pending state.
    pub async fn get(&mut self, path: &str, opts: GetOptions) -> ChangeResult<FileHandle> {
        let state = self
            .overlay
            .entry_at_path(path)
            .await?
            .and_then(|view| match view {
                carta_overlay::EntryView::Persisted { id, mode } => {
                    Some(FileState::Persisted { id, mode })
                }
                // Directories have no handle representation.
                carta_overlay::EntryView::Overlay(_) => None,
            });
        Ok(FileHandle::new(path.to_string(), opts, state))
    }

    /// Read the content behind a handle.
    pub async fn read(&self, handle: &FileHandle) -> ChangeResult<Option<Vec<u8>>> {
        handle.read(&*self.store).await
    }

    /// Stage `bytes` at the handle's path, enforcing its intent flags.
    ///
    /// The body is written to the object store immediately (content
    /// addressing makes an abandoned blob harmless); the tree is not.
    pub async fn save(&mut self, handle: &mut FileHandle, bytes: Vec<u8>) -> ChangeResult<()> {
        handle.check_write()?;
        let id = write_blob(&*self.store, &Blob::new(bytes.clone())).await?;
        self.overlay
            .insert_path(handle.path(), id, EntryMode::Regular, true, true)
            .await?;
        handle.state = Some(FileState::Pending(bytes));
        Ok(())
    }

    /// Stage a deletion at the handle's path.
    pub async fn remove(&mut self, handle: &mut FileHandle) -> ChangeResult<()> {
        match handle.state {
            Some(FileState::Persisted { .. }) | Some(FileState::Pending(_)) => {}
            Some(FileState::Tombstone) | None => {
                return Err(ChangeError::NotFound {
                    path: handle.path().to_string(),
                });
            }
        }
        self.overlay.delete_path(handle.path()).await?;
        handle.state = Some(FileState::Tombstone);
        Ok(())
    }

    /// Serialize the overlay, commit, and land on the branch.
    ///
    /// A transaction whose serialized tree equals its parent's is a no-op
    /// and returns the parent id without creating anything. Otherwise the
    /// new commit is reconciled against the branch head: fast-forward when
    /// the head is our parent's line, a merge commit when it diverged, a
    /// [`ChangeError::Conflict`] when both sides changed the same paths.
    /// A lost compare-and-swap is retried with exponential backoff until
    /// the budget runs out.
    pub async fn finalize(self, opts: CommitOptions) -> ChangeResult<ObjectId> {
        let new_tree = match self.overlay.write(true).await? {
            Some(id) => id,
            // write(allow_empty = true) always yields a root.
            None => unreachable!("root serialization with allow_empty"),
        };

        // No-op: nothing changed relative to the parent snapshot.
        if let Some(parent) = self.parent {
            if self.parent_tree == Some(new_tree) {
                debug!(branch = self.tip.name(), "no-op finalize, reusing parent");
                return Ok(parent);
            }
        }

        let committer = opts.committer.clone().unwrap_or_else(|| opts.author.clone());
        let commit = Commit {
            tree: new_tree,
            parents: self.parent.into_iter().collect(),
            author: opts.author.clone(),
            committer: committer.clone(),
            message: opts.message.clone(),
        };
        let new_commit = write_commit(&*self.store, &commit).await?;

        let mut delay = INITIAL_BACKOFF;
        let mut slept = Duration::ZERO;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let head = self.tip.load().await?;
            let winning = match head {
                None => new_commit,
                Some(h) if h == new_commit => return Ok(new_commit),
                Some(h) => {
                    self.reconcile(h, new_commit, new_tree, &opts.author, &committer)
                        .await?
                }
            };
            // `winning == head` means the head already contains us.
            if Some(winning) == head {
                return Ok(winning);
            }

            if self.tip.compare_and_swap(head, winning).await? {
                debug!(
                    branch = self.tip.name(),
                    commit = %winning.short_hex(),
                    attempts,
                    "landed"
                );
                return Ok(winning);
            }

            if slept + delay > RETRY_BUDGET {
                return Err(ChangeError::FinalizeExhausted { attempts });
            }
            debug!(
                branch = self.tip.name(),
                attempts,
                delay_ms = delay.as_millis() as u64,
                "branch moved, backing off"
            );
            tokio::time::sleep(delay).await;
            slept += delay;
            delay *= 2;
        }
    }

    /// Decide what the branch should point at given a head that is not our
    /// new commit: the new commit itself (fast-forward), the head (it
    /// already contains us), or a fresh merge commit.
    async fn reconcile(
        &self,
        head: ObjectId,
        new_commit: ObjectId,
        new_tree: ObjectId,
        author: &Signature,
        committer: &Signature,
    ) -> ChangeResult<ObjectId> {
        let base = merge_base(&*self.store, &new_commit, &head).await?;
        match base {
            // Head is behind us: fast-forward.
            Some(b) if b == head => Ok(new_commit),
            // Head already incorporates us.
            Some(b) if b == new_commit => Ok(head),
            base => {
                let base_tree = match base {
                    Some(id) => Some(read_commit(&*self.store, &id).await?.tree),
                    None => None,
                };
                let head_tree = read_commit(&*self.store, &head).await?.tree;
                match merge_trees(&*self.store, base_tree, new_tree, head_tree).await? {
                    MergeOutcome::Conflicted(paths) => Err(ChangeError::Conflict { paths }),
                    MergeOutcome::Clean(tree) => {
                        let merge = Commit {
                            tree,
                            parents: vec![new_commit, head],
                            author: author.clone(),
                            committer: committer.clone(),
                            message: format!(
                                "Merge {} into {}",
                                new_commit.short_hex(),
                                self.tip.name()
                            ),
                        };
                        let id = write_commit(&*self.store, &merge).await?;
                        debug!(
                            branch = self.tip.name(),
                            merge = %id.short_hex(),
                            "created merge commit"
                        );
                        Ok(id)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use carta_refs::{InMemoryRefStore, LocalBranch, RefResult, RefStore};
    use carta_store::ancestry::{read_blob, read_tree};
    use carta_store::InMemoryObjectStore;

    fn author() -> Signature {
        Signature::now("Writer", "writer@example.com")
    }

    fn opts(message: &str) -> CommitOptions {
        CommitOptions::new(author(), message)
    }

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        tip: Arc<dyn BranchTip>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryObjectStore::new());
        let refs: Arc<dyn RefStore> = Arc::new(InMemoryRefStore::new());
        let tip: Arc<dyn BranchTip> =
            Arc::new(LocalBranch::new(refs, "master").unwrap());
        Fixture { store, tip }
    }

    impl Fixture {
        async fn change(&self) -> Change {
            Change::open(Arc::clone(&self.store) as Arc<dyn ObjectStore>, Arc::clone(&self.tip))
                .await
                .unwrap()
        }

        async fn put(&self, path: &str, content: &str) -> ObjectId {
            let mut change = self.change().await;
            let mut h = change.get(path, GetOptions::UPSERT).await.unwrap();
            change.save(&mut h, content.as_bytes().to_vec()).await.unwrap();
            change.finalize(opts(&format!("put {path}"))).await.unwrap()
        }

        async fn content_at(&self, commit: ObjectId, path: &str) -> Option<String> {
            let tree_id = read_commit(&*self.store, &commit).await.unwrap().tree;
            let mut current = read_tree(&*self.store, &tree_id).await.unwrap();
            let segments: Vec<&str> = path.split('/').collect();
            let (leaf, dirs) = segments.split_last().unwrap();
            for dir in dirs {
                let entry = current.get(dir)?;
                current = read_tree(&*self.store, &entry.object_id).await.unwrap();
            }
            let entry = current.get(leaf)?;
            let blob = read_blob(&*self.store, &entry.object_id).await.unwrap();
            Some(String::from_utf8(blob.data).unwrap())
        }
    }

    #[tokio::test]
    async fn create_read_back_within_transaction() {
        let fx = fixture();
        let mut change = fx.change().await;
        let mut h = change
            .get("contents/post/1.json", GetOptions::CREATE)
            .await
            .unwrap();
        assert!(!h.exists());
        change.save(&mut h, b"body".to_vec()).await.unwrap();
        assert!(h.exists());
        assert_eq!(change.read(&h).await.unwrap(), Some(b"body".to_vec()));
    }

    #[tokio::test]
    async fn finalize_lands_on_unborn_branch() {
        let fx = fixture();
        let c1 = fx.put("contents/post/1.json", "v1").await;
        assert_eq!(fx.tip.load().await.unwrap(), Some(c1));
        assert_eq!(
            fx.content_at(c1, "contents/post/1.json").await,
            Some("v1".into())
        );
        let commit = read_commit(&*fx.store, &c1).await.unwrap();
        assert!(commit.parents.is_empty());
    }

    #[tokio::test]
    async fn sequential_commits_chain() {
        let fx = fixture();
        let c1 = fx.put("contents/post/1.json", "v1").await;
        let c2 = fx.put("contents/post/1.json", "v2").await;
        assert_ne!(c1, c2);
        let commit = read_commit(&*fx.store, &c2).await.unwrap();
        assert_eq!(commit.parents, vec![c1]);
        assert_eq!(
            fx.content_at(c2, "contents/post/1.json").await,
            Some("v2".into())
        );
    }

    #[tokio::test]
    async fn noop_finalize_reuses_parent() {
        let fx = fixture();
        let c1 = fx.put("contents/post/1.json", "v1").await;

        // A transaction that saves the identical bytes serializes to the
        // identical tree.
        let mut change = fx.change().await;
        let mut h = change
            .get("contents/post/1.json", GetOptions::UPDATE)
            .await
            .unwrap();
        change.save(&mut h, b"v1".to_vec()).await.unwrap();
        let out = change.finalize(opts("identical")).await.unwrap();
        assert_eq!(out, c1);
        assert_eq!(fx.tip.load().await.unwrap(), Some(c1));
    }

    #[tokio::test]
    async fn empty_transaction_on_unborn_branch_creates_empty_commit() {
        let fx = fixture();
        let change = fx.change().await;
        let c = change.finalize(opts("init")).await.unwrap();
        let commit = read_commit(&*fx.store, &c).await.unwrap();
        let tree = read_tree(&*fx.store, &commit.tree).await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn create_only_rejects_existing_path() {
        let fx = fixture();
        fx.put("contents/post/1.json", "v1").await;
        let mut change = fx.change().await;
        let mut h = change
            .get("contents/post/1.json", GetOptions::CREATE)
            .await
            .unwrap();
        let err = change.save(&mut h, b"clobber".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChangeError::OverwriteRejected { .. }));
    }

    #[tokio::test]
    async fn remove_then_finalize_drops_path() {
        let fx = fixture();
        fx.put("contents/post/1.json", "v1").await;
        fx.put("contents/post/2.json", "v2").await;

        let mut change = fx.change().await;
        let mut h = change
            .get("contents/post/1.json", GetOptions::UPDATE)
            .await
            .unwrap();
        change.remove(&mut h).await.unwrap();
        assert!(!h.exists());
        let c = change.finalize(opts("delete 1")).await.unwrap();

        assert_eq!(fx.content_at(c, "contents/post/1.json").await, None);
        assert_eq!(
            fx.content_at(c, "contents/post/2.json").await,
            Some("v2".into())
        );
    }

    #[tokio::test]
    async fn remove_absent_path_fails() {
        let fx = fixture();
        fx.put("contents/post/1.json", "v1").await;
        let mut change = fx.change().await;
        let mut h = change
            .get("contents/post/9.json", GetOptions::UPDATE)
            .await
            .unwrap();
        let err = change.remove(&mut h).await.unwrap_err();
        assert!(matches!(err, ChangeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn divergent_disjoint_edits_merge() {
        let fx = fixture();
        let c1 = fx.put("contents/post/1.json", "v1").await;

        // Two transactions from the same head editing different paths.
        let mut a = fx.change().await;
        let mut b = fx.change().await;

        let mut ha = a.get("contents/post/a.json", GetOptions::CREATE).await.unwrap();
        a.save(&mut ha, b"from a".to_vec()).await.unwrap();
        let ca = a.finalize(opts("a")).await.unwrap();

        let mut hb = b.get("contents/post/b.json", GetOptions::CREATE).await.unwrap();
        b.save(&mut hb, b"from b".to_vec()).await.unwrap();
        let cb = b.finalize(opts("b")).await.unwrap();

        // The second finalize produced a merge commit on top of both lines.
        let head = fx.tip.load().await.unwrap().unwrap();
        assert_eq!(head, cb);
        let merged = read_commit(&*fx.store, &cb).await.unwrap();
        assert!(merged.is_merge());
        assert_eq!(merged.parents[1], ca);

        assert_eq!(
            fx.content_at(head, "contents/post/a.json").await,
            Some("from a".into())
        );
        assert_eq!(
            fx.content_at(head, "contents/post/b.json").await,
            Some("from b".into())
        );
        assert_eq!(
            fx.content_at(head, "contents/post/1.json").await,
            Some("v1".into())
        );
        let _ = c1;
    }

    #[tokio::test]
    async fn divergent_same_path_conflicts() {
        let fx = fixture();
        fx.put("contents/post/1.json", "v1").await;

        let mut a = fx.change().await;
        let mut b = fx.change().await;

        let mut ha = a.get("contents/post/1.json", GetOptions::UPDATE).await.unwrap();
        a.save(&mut ha, b"from a".to_vec()).await.unwrap();
        let ca = a.finalize(opts("a")).await.unwrap();

        let mut hb = b.get("contents/post/1.json", GetOptions::UPDATE).await.unwrap();
        b.save(&mut hb, b"from b".to_vec()).await.unwrap();
        let err = b.finalize(opts("b")).await.unwrap_err();

        let ChangeError::Conflict { paths } = err else {
            panic!("expected conflict")
        };
        assert_eq!(paths, vec!["contents/post/1.json".to_string()]);
        // The branch still points at the first writer's commit.
        assert_eq!(fx.tip.load().await.unwrap(), Some(ca));
    }

    #[tokio::test]
    async fn open_at_historical_commit_merges_forward() {
        let fx = fixture();
        let c1 = fx.put("contents/post/1.json", "v1").await;
        fx.put("contents/post/2.json", "v2").await;

        // Anchor at c1 and add a new path; the branch has since moved.
        let mut change = Change::open_at(
            Arc::clone(&fx.store) as Arc<dyn ObjectStore>,
            Arc::clone(&fx.tip),
            Some(c1),
        )
        .await
        .unwrap();
        let mut h = change
            .get("contents/post/3.json", GetOptions::CREATE)
            .await
            .unwrap();
        change.save(&mut h, b"v3".to_vec()).await.unwrap();
        let c = change.finalize(opts("from history")).await.unwrap();

        let head = fx.tip.load().await.unwrap().unwrap();
        assert_eq!(head, c);
        for (path, want) in [
            ("contents/post/1.json", "v1"),
            ("contents/post/2.json", "v2"),
            ("contents/post/3.json", "v3"),
        ] {
            assert_eq!(fx.content_at(head, path).await, Some(want.into()));
        }
    }

    // A tip whose compare-and-swap never succeeds, to drive the backoff
    // loop to exhaustion. Paused tokio time makes the sleeps instant.
    struct StuckTip;

    #[async_trait]
    impl BranchTip for StuckTip {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn load(&self) -> RefResult<Option<ObjectId>> {
            Ok(None)
        }

        async fn compare_and_swap(
            &self,
            _expected: Option<ObjectId>,
            _new: ObjectId,
        ) -> RefResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_exhausts_retry_budget() {
        let store = Arc::new(InMemoryObjectStore::new());
        let tip: Arc<dyn BranchTip> = Arc::new(StuckTip);
        let mut change = Change::open(Arc::clone(&store) as Arc<dyn ObjectStore>, tip)
            .await
            .unwrap();
        let mut h = change
            .get("contents/post/1.json", GetOptions::CREATE)
            .await
            .unwrap();
        change.save(&mut h, b"v1".to_vec()).await.unwrap();

        let err = change.finalize(opts("never lands")).await.unwrap_err();
        let ChangeError::FinalizeExhausted { attempts } = err else {
            panic!("expected exhaustion")
        };
        // 500ms + 1s + 2s sleeps fit the 5s budget; the 4s delay does not.
        assert_eq!(attempts, 4);
    }
}
