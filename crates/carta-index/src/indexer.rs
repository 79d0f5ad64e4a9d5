//! Incremental index passes.
//!
//! An index pass compares the branch head against the snapshot the sink
//! last absorbed and emits exactly the difference. Content addressing does
//! the heavy lifting: a subtree whose object id is unchanged is skipped
//! without being read, so a pass over a large store touches only the
//! commits' actual delta. With no usable previous snapshot the pass
//! degrades to a full rebuild.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use carta_refs::BranchTip;
use carta_store::ancestry::{read_blob, read_commit, read_tree};
use carta_store::{ObjectStore, StoreError, Tree};
use carta_types::{Collection, DocPath, Document, ObjectId};

use crate::error::IndexResult;
use crate::sink::{IndexSink, IndexedDocument};

/// What the sink persists between passes: the commit it has absorbed.
///
/// A null commit (unborn branch) or a commit the store no longer resolves
/// both trigger a full rebuild on the next pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub commit: ObjectId,
}

/// A caller's guess at which documents changed. Hints only reorder
/// emission (hinted saves go first); the diff decides what is emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocHint {
    pub doc_type: String,
    pub id: String,
}

/// Entry point: binds a store and a branch.
pub struct Indexer {
    store: Arc<dyn ObjectStore>,
    tip: Arc<dyn BranchTip>,
}

impl Indexer {
    pub fn new(store: Arc<dyn ObjectStore>, tip: Arc<dyn BranchTip>) -> Self {
        Self { store, tip }
    }

    /// Capture the branch head once; everything in the returned [`Updater`]
    /// works against that snapshot.
    pub async fn begin_update(&self) -> IndexResult<Updater> {
        let head = self.tip.load().await?;
        Ok(Updater {
            store: Arc::clone(&self.store),
            head,
            categories: None,
        })
    }
}

/// One index pass pinned to a head snapshot.
pub struct Updater {
    store: Arc<dyn ObjectStore>,
    head: Option<ObjectId>,
    categories: Option<Vec<Collection>>,
}

impl Updater {
    /// Restrict the pass to the given top-level categories.
    pub fn with_categories(mut self, categories: Vec<Collection>) -> Self {
        self.categories = Some(categories);
        self
    }

    /// The captured head commit, `None` for an unborn branch.
    pub fn head(&self) -> Option<ObjectId> {
        self.head
    }

    /// Decode every document under `schema/` at the captured head.
    pub async fn schema(&self) -> IndexResult<Vec<IndexedDocument>> {
        let Some(head) = self.head else {
            return Ok(Vec::new());
        };
        let root_id = read_commit(&*self.store, &head).await?.tree;
        let root = read_tree(&*self.store, &root_id).await?;
        let mut out = Vec::new();
        if let Some(entry) = root.get(Collection::Schema.category()) {
            if entry.mode.is_directory() {
                let mut deletes = Vec::new();
                self.diff_nodes(
                    Collection::Schema.category().to_string(),
                    None,
                    Some(entry.object_id),
                    &mut out,
                    &mut deletes,
                )
                .await?;
            }
        }
        Ok(out)
    }

    /// Diff the head against `previous` and feed the difference to `sink`.
    ///
    /// Returns the meta the sink should persist for the next pass. A
    /// missing or unresolvable `previous` commit triggers
    /// `sink.begin_replace()` followed by saves for everything reachable.
    pub async fn update_content(
        &self,
        previous: Option<IndexMeta>,
        hints: &[DocHint],
        sink: &dyn IndexSink,
    ) -> IndexResult<IndexMeta> {
        let Some(head) = self.head else {
            // Unborn branch: nothing to index, but the sink still resets.
            sink.begin_replace().await?;
            return Ok(IndexMeta {
                commit: ObjectId::null(),
            });
        };

        let new_root_id = read_commit(&*self.store, &head).await?.tree;
        let old_root_id = match previous {
            Some(meta) if !meta.commit.is_null() => {
                match read_commit(&*self.store, &meta.commit).await {
                    Ok(commit) => Some(commit.tree),
                    Err(StoreError::NotFound(_)) => {
                        debug!(commit = %meta.commit.short_hex(), "previous commit gone, full rebuild");
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            _ => None,
        };
        let full = old_root_id.is_none();

        let new_root = read_tree(&*self.store, &new_root_id).await?;
        let old_root = match old_root_id {
            Some(id) => read_tree(&*self.store, &id).await?,
            None => Tree::empty(),
        };

        let mut saves = Vec::new();
        let mut deletes = Vec::new();

        let mut categories = BTreeSet::new();
        categories.extend(old_root.entries.iter().map(|e| e.name.clone()));
        categories.extend(new_root.entries.iter().map(|e| e.name.clone()));

        for category in categories {
            let Some(collection) = Collection::from_category(&category) else {
                continue;
            };
            if let Some(filter) = &self.categories {
                if !filter.contains(&collection) {
                    continue;
                }
            }
            let old = old_root
                .get(&category)
                .filter(|e| e.mode.is_directory())
                .map(|e| e.object_id);
            let new = new_root
                .get(&category)
                .filter(|e| e.mode.is_directory())
                .map(|e| e.object_id);
            self.diff_nodes(category, old, new, &mut saves, &mut deletes)
                .await?;
        }

        if full {
            sink.begin_replace().await?;
        }

        // Hints move their saves to the front of the batch; everything else
        // keeps diff order.
        let (hinted, rest): (Vec<_>, Vec<_>) = saves.into_iter().partition(|d| {
            hints
                .iter()
                .any(|h| h.doc_type == d.doc_type && h.id == d.id)
        });
        let save_count = hinted.len() + rest.len();
        for doc in hinted.into_iter().chain(rest) {
            sink.save(doc).await?;
        }
        for (collection, doc_type, id) in &deletes {
            sink.delete(*collection, doc_type, id).await?;
        }

        debug!(
            head = %head.short_hex(),
            full,
            saves = save_count,
            deletes = deletes.len(),
            "index pass complete"
        );
        Ok(IndexMeta { commit: head })
    }

    /// Recursive tree diff. Identical object ids prune the entire subtree;
    /// removed subtrees are torn down depth-first before their siblings'
    /// file deletions.
    fn diff_nodes<'a>(
        &'a self,
        prefix: String,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
        saves: &'a mut Vec<IndexedDocument>,
        deletes: &'a mut Vec<(Collection, String, String)>,
    ) -> Pin<Box<dyn Future<Output = IndexResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if old == new {
                return Ok(());
            }
            let old_tree = self.load(old).await?;
            let new_tree = self.load(new).await?;

            // Names gone from the new tree: subtrees first, then files.
            for entry in &old_tree.entries {
                if new_tree.get(&entry.name).is_some() {
                    continue;
                }
                let path = format!("{prefix}/{}", entry.name);
                if entry.mode.is_directory() {
                    self.diff_nodes(path, Some(entry.object_id), None, saves, deletes)
                        .await?;
                } else {
                    push_delete(&path, deletes);
                }
            }

            // Added or changed names.
            for entry in &new_tree.entries {
                let before = old_tree.get(&entry.name);
                if let Some(b) = before {
                    if b.object_id == entry.object_id && b.mode == entry.mode {
                        // Content-addressed prune: identical subtree or file.
                        continue;
                    }
                }
                let path = format!("{prefix}/{}", entry.name);
                if entry.mode.is_directory() {
                    // A file replaced by a directory loses the file.
                    let old_sub = match before {
                        Some(b) if b.mode.is_directory() => Some(b.object_id),
                        Some(_) => {
                            push_delete(&path, deletes);
                            None
                        }
                        None => None,
                    };
                    self.diff_nodes(path, old_sub, Some(entry.object_id), saves, deletes)
                        .await?;
                } else {
                    // A directory replaced by a file loses its contents.
                    if let Some(b) = before {
                        if b.mode.is_directory() {
                            self.diff_nodes(
                                path.clone(),
                                Some(b.object_id),
                                None,
                                saves,
                                deletes,
                            )
                            .await?;
                        }
                    }
                    self.push_save(&path, &entry.object_id, saves).await?;
                }
            }
            Ok(())
        })
    }

    async fn load(&self, id: Option<ObjectId>) -> IndexResult<Tree> {
        Ok(match id {
            Some(id) => read_tree(&*self.store, &id).await?,
            None => Tree::empty(),
        })
    }

    /// Decode the blob at `path` into a save, skipping anything that does
    /// not parse as a document.
    async fn push_save(
        &self,
        path: &str,
        blob_id: &ObjectId,
        saves: &mut Vec<IndexedDocument>,
    ) -> IndexResult<()> {
        let Ok(parsed) = DocPath::parse(path) else {
            warn!(path, "unindexable path, skipping");
            return Ok(());
        };
        let blob = read_blob(&*self.store, blob_id).await?;
        match Document::decode(&blob.data) {
            Ok((document, embedded)) => {
                // Cards carry their real type in the body.
                let doc_type = embedded
                    .map(|(t, _)| t)
                    .unwrap_or(parsed.doc_type);
                saves.push(IndexedDocument {
                    collection: parsed.collection,
                    doc_type,
                    id: parsed.id,
                    document,
                });
            }
            Err(_) => warn!(path, "malformed document, skipping"),
        }
        Ok(())
    }
}

fn push_delete(path: &str, deletes: &mut Vec<(Collection, String, String)>) {
    match DocPath::parse(path) {
        Ok(parsed) => deletes.push((parsed.collection, parsed.doc_type, parsed.id)),
        Err(_) => warn!(path, "unindexable path, skipping delete"),
    }
}
