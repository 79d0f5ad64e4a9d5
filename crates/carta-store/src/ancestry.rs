//! Typed object access and commit-ancestry queries.
//!
//! The store itself is a pure key-value store; the helpers here decode
//! objects into their typed forms and walk the commit DAG. [`merge_base`]
//! is the most recent common ancestor used by the transactional write path
//! to decide between fast-forward and three-way merge.

use std::collections::{HashSet, VecDeque};

use carta_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, Commit, StoredObject, Tree};
use crate::traits::ObjectStore;

/// Read and decode a blob, requiring existence.
pub async fn read_blob(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Blob> {
    let obj = require(store, id).await?;
    Blob::from_stored_object(&obj)
}

/// Read and decode a tree, requiring existence.
pub async fn read_tree(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Tree> {
    let obj = require(store, id).await?;
    Tree::from_stored_object(&obj)
}

/// Read and decode a commit, requiring existence.
pub async fn read_commit(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Commit> {
    let obj = require(store, id).await?;
    Commit::from_stored_object(&obj)
}

/// Store a blob, returning its id.
pub async fn write_blob(store: &dyn ObjectStore, blob: &Blob) -> StoreResult<ObjectId> {
    store.write(&blob.to_stored_object()).await
}

/// Store a tree, returning its id.
pub async fn write_tree(store: &dyn ObjectStore, tree: &Tree) -> StoreResult<ObjectId> {
    store.write(&tree.to_stored_object()?).await
}

/// Store a commit, returning its id.
pub async fn write_commit(store: &dyn ObjectStore, commit: &Commit) -> StoreResult<ObjectId> {
    store.write(&commit.to_stored_object()?).await
}

async fn require(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<StoredObject> {
    store.read(id).await?.ok_or(StoreError::NotFound(*id))
}

/// Returns `true` if `ancestor` is reachable from `descendant` through
/// parent edges (a commit is considered its own ancestor).
pub async fn is_ancestor(
    store: &dyn ObjectStore,
    ancestor: &ObjectId,
    descendant: &ObjectId,
) -> StoreResult<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut visited = HashSet::new();
    visited.insert(*descendant);
    let mut queue = VecDeque::new();
    queue.push_back(*descendant);

    while let Some(current) = queue.pop_front() {
        let commit = read_commit(store, &current).await?;
        for parent in &commit.parents {
            if parent == ancestor {
                return Ok(true);
            }
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(false)
}

/// The most recent common ancestor of two commits.
///
/// Collects the full ancestor set of `a`, then walks `b`'s ancestry
/// breadth-first; the first commit found in both is the merge-base closest
/// to `b`. Returns `None` for disjoint histories.
pub async fn merge_base(
    store: &dyn ObjectStore,
    a: &ObjectId,
    b: &ObjectId,
) -> StoreResult<Option<ObjectId>> {
    let ancestors_a = ancestor_set(store, a).await?;

    let mut visited = HashSet::new();
    visited.insert(*b);
    let mut queue = VecDeque::new();
    queue.push_back(*b);

    while let Some(current) = queue.pop_front() {
        if ancestors_a.contains(&current) {
            return Ok(Some(current));
        }
        let commit = read_commit(store, &current).await?;
        for parent in &commit.parents {
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(None)
}

/// All ancestors of a commit, including the commit itself.
async fn ancestor_set(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<HashSet<ObjectId>> {
    let mut visited = HashSet::new();
    visited.insert(*id);
    let mut queue = VecDeque::new();
    queue.push_back(*id);

    while let Some(current) = queue.pop_front() {
        let commit = read_commit(store, &current).await?;
        for parent in &commit.parents {
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }
    Ok(visited)
}
