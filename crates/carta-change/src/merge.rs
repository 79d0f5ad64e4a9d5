//! Recursive three-way tree merge.
//!
//! Given a common base and two derived trees, produce a merged tree or the
//! sorted list of conflicting paths. The rules per name:
//!
//! - both sides agree (same id and mode, or both absent): take it
//! - only one side differs from the base: take that side's version
//! - both sides differ from the base and from each other: recurse if both
//!   are directories; merge document bodies key-by-key if both are regular
//!   files over a regular-file base; otherwise the path conflicts
//!
//! The body merge means two writers editing different top-level keys of
//! the same document both land. The same key changed differently on both
//! sides still conflicts, as do non-document bodies and delete-vs-edit.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use carta_store::ancestry::{read_blob, read_tree, write_blob, write_tree};
use carta_store::{Blob, EntryMode, ObjectStore, Tree, TreeEntry};
use carta_types::{Document, ObjectId};

use crate::error::ChangeResult;

/// Outcome of a three-way merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merged root tree.
    Clean(ObjectId),
    /// Paths both sides changed incompatibly, sorted.
    Conflicted(Vec<String>),
}

/// Merge `ours` and `theirs` against their common `base` tree.
///
/// `base` is `None` for disjoint histories, in which case every name both
/// sides touch differently conflicts.
pub async fn merge_trees(
    store: &dyn ObjectStore,
    base: Option<ObjectId>,
    ours: ObjectId,
    theirs: ObjectId,
) -> ChangeResult<MergeOutcome> {
    let mut conflicts = Vec::new();
    let merged = merge_dir(store, String::new(), base, Some(ours), Some(theirs), &mut conflicts)
        .await?;
    if !conflicts.is_empty() {
        conflicts.sort();
        return Ok(MergeOutcome::Conflicted(conflicts));
    }
    // A fully-empty merge still needs a root tree object.
    let root = match merged {
        Some(id) => id,
        None => write_tree(store, &Tree::empty()).await?,
    };
    Ok(MergeOutcome::Clean(root))
}

/// What one side of the merge has at a given name.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Side {
    id: ObjectId,
    mode: EntryMode,
}

impl Side {
    fn of(entry: Option<&TreeEntry>) -> Option<Self> {
        entry.map(|e| Side {
            id: e.object_id,
            mode: e.mode,
        })
    }

    fn is_directory(self) -> bool {
        self.mode.is_directory()
    }
}

fn merge_dir<'a>(
    store: &'a dyn ObjectStore,
    prefix: String,
    base: Option<ObjectId>,
    ours: Option<ObjectId>,
    theirs: Option<ObjectId>,
    conflicts: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = ChangeResult<Option<ObjectId>>> + Send + 'a>> {
    Box::pin(async move {
        // Trivial cases: one side absent or both identical.
        if ours == theirs {
            return Ok(ours);
        }

        let base_tree = load(store, base).await?;
        let our_tree = load(store, ours).await?;
        let their_tree = load(store, theirs).await?;

        let mut names = BTreeSet::new();
        for tree in [&base_tree, &our_tree, &their_tree] {
            names.extend(tree.entries.iter().map(|e| e.name.clone()));
        }

        let mut entries = Vec::new();
        for name in names {
            let b = Side::of(base_tree.get(&name));
            let o = Side::of(our_tree.get(&name));
            let t = Side::of(their_tree.get(&name));
            let path = join(&prefix, &name);

            let taken = if o == t {
                o
            } else if o == b {
                t
            } else if t == b {
                o
            } else {
                match (o, t) {
                    // Both sides replaced the name with a directory: merge
                    // the subtrees against the base subtree (if it was one).
                    (Some(od), Some(td)) if od.is_directory() && td.is_directory() => {
                        let sub_base = b.filter(|s| s.is_directory()).map(|s| s.id);
                        merge_dir(store, path, sub_base, Some(od.id), Some(td.id), conflicts)
                            .await?
                            .map(|id| Side {
                                id,
                                mode: EntryMode::Directory,
                            })
                    }
                    // Both sides rewrote the same file: try a key-level
                    // merge of the document bodies against the base body.
                    (Some(of), Some(tf)) if !of.is_directory() && !tf.is_directory() => {
                        let merged = match b.filter(|s| !s.is_directory()) {
                            Some(bf) => merge_bodies(store, bf.id, of.id, tf.id).await?,
                            None => None,
                        };
                        match merged {
                            Some(id) => Some(Side {
                                id,
                                mode: EntryMode::Regular,
                            }),
                            None => {
                                conflicts.push(path);
                                continue;
                            }
                        }
                    }
                    _ => {
                        conflicts.push(path);
                        continue;
                    }
                }
            };

            if let Some(side) = taken {
                entries.push(TreeEntry::new(side.mode, name, side.id));
            }
        }

        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(write_tree(store, &Tree::new(entries)).await?))
    })
}

/// Merge two document bodies derived from the same base blob, one top-level
/// key at a time.
///
/// Returns the merged blob id, or `None` when the bodies cannot be merged:
/// not valid documents, disagreeing embedded identities, or the same key
/// changed differently on both sides.
async fn merge_bodies(
    store: &dyn ObjectStore,
    base: ObjectId,
    ours: ObjectId,
    theirs: ObjectId,
) -> ChangeResult<Option<ObjectId>> {
    let base_blob = read_blob(store, &base).await?;
    let our_blob = read_blob(store, &ours).await?;
    let their_blob = read_blob(store, &theirs).await?;

    let Ok((base_doc, _)) = Document::decode(&base_blob.data) else {
        return Ok(None);
    };
    let Ok((our_doc, our_identity)) = Document::decode(&our_blob.data) else {
        return Ok(None);
    };
    let Ok((their_doc, their_identity)) = Document::decode(&their_blob.data) else {
        return Ok(None);
    };
    if our_identity != their_identity {
        return Ok(None);
    }

    let Some(merged) = Document::three_way_merge(&base_doc, &our_doc, &their_doc) else {
        return Ok(None);
    };

    let bytes = match &our_identity {
        Some((doc_type, id)) => merged.to_card_bytes(doc_type, id),
        None => merged.to_canonical_bytes(),
    };
    let Ok(bytes) = bytes else {
        return Ok(None);
    };
    Ok(Some(write_blob(store, &Blob::new(bytes)).await?))
}

async fn load(store: &dyn ObjectStore, id: Option<ObjectId>) -> ChangeResult<Tree> {
    Ok(match id {
        Some(id) => read_tree(store, &id).await?,
        None => Tree::empty(),
    })
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
