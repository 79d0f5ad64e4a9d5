use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use carta_store::{read_tree, write_tree, EntryMode, ObjectStore, Tree, TreeEntry};
use carta_types::ObjectId;

use crate::error::{OverlayError, OverlayResult};

/// Stable handle to an overlay node in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// The overlay's view of a named entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryView {
    /// A persisted object: a document leaf or an untouched base subtree.
    Persisted { id: ObjectId, mode: EntryMode },
    /// A sub-overlay materialized by this transaction.
    Overlay(NodeId),
}

impl EntryView {
    /// Returns `true` if this entry can be descended into.
    fn is_directory_like(&self) -> bool {
        match self {
            Self::Persisted { mode, .. } => mode.is_directory(),
            Self::Overlay(_) => true,
        }
    }
}

/// A recorded mutation for one name.
#[derive(Clone, Copy, Debug)]
enum Slot {
    /// The entry is deleted. Omitted from the rebuilt tree.
    Tombstone,
    /// The entry now points at this object.
    Leaf { id: ObjectId, mode: EntryMode },
    /// The entry is a sub-overlay with its own mutations.
    Subtree(NodeId),
}

/// One directory's overlay: an optional immutable base plus a mutation map.
struct OverlayNode {
    /// The base tree and its id, if this directory exists in the snapshot.
    base: Option<(ObjectId, Tree)>,
    /// Mutations recorded against this directory, keyed by entry name.
    edits: BTreeMap<String, Slot>,
    /// Memoized lookups, including "absent", so repeated lookups are O(1).
    cache: BTreeMap<String, Option<EntryView>>,
}

impl OverlayNode {
    fn new(base: Option<(ObjectId, Tree)>) -> Self {
        Self {
            base,
            edits: BTreeMap::new(),
            cache: BTreeMap::new(),
        }
    }
}

/// An in-memory, copy-on-write view of a tree.
///
/// Transient: exists only for the duration of a transaction. All reads
/// consult the mutation map first and fall back to the base tree; all
/// mutations are record-only until [`write`](MutableTree::write).
pub struct MutableTree {
    store: Arc<dyn ObjectStore>,
    nodes: Vec<OverlayNode>,
}

impl MutableTree {
    const ROOT: NodeId = NodeId(0);

    /// Open an overlay over the tree identified by `base`, or over nothing
    /// (an empty snapshot) when `base` is `None`.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        base: Option<ObjectId>,
    ) -> OverlayResult<Self> {
        let root = match base {
            Some(id) => {
                let tree = read_tree(&*store, &id).await?;
                OverlayNode::new(Some((id, tree)))
            }
            None => OverlayNode::new(None),
        };
        Ok(Self {
            store,
            nodes: vec![root],
        })
    }

    /// The root node handle.
    pub fn root(&self) -> NodeId {
        Self::ROOT
    }

    /// Returns `true` if no mutations have been recorded anywhere.
    pub fn is_clean(&self) -> bool {
        self.nodes.iter().all(|n| n.edits.is_empty())
    }

    // -----------------------------------------------------------------
    // Name-level operations
    // -----------------------------------------------------------------

    /// The overlay's view of `name` within `node`: mutation map first, base
    /// tree second. The result (including absence) is cached.
    pub fn entry_by_name(&mut self, node: NodeId, name: &str) -> Option<EntryView> {
        if let Some(cached) = self.nodes[node.0].cache.get(name) {
            return *cached;
        }
        let n = &self.nodes[node.0];
        let view = match n.edits.get(name) {
            Some(Slot::Tombstone) => None,
            Some(Slot::Leaf { id, mode }) => Some(EntryView::Persisted {
                id: *id,
                mode: *mode,
            }),
            Some(Slot::Subtree(child)) => Some(EntryView::Overlay(*child)),
            None => n.base.as_ref().and_then(|(_, tree)| {
                tree.get(name).map(|e| EntryView::Persisted {
                    id: e.object_id,
                    mode: e.mode,
                })
            }),
        };
        self.nodes[node.0].cache.insert(name.to_string(), view);
        view
    }

    /// Record that `name` now points at `id` with `mode`.
    pub fn insert(&mut self, node: NodeId, name: &str, id: ObjectId, mode: EntryMode) {
        let view = EntryView::Persisted { id, mode };
        let n = &mut self.nodes[node.0];
        n.edits.insert(name.to_string(), Slot::Leaf { id, mode });
        n.cache.insert(name.to_string(), Some(view));
    }

    /// Record that `name` is deleted.
    pub fn remove(&mut self, node: NodeId, name: &str) {
        let n = &mut self.nodes[node.0];
        n.edits.insert(name.to_string(), Slot::Tombstone);
        n.cache.insert(name.to_string(), None);
    }

    // -----------------------------------------------------------------
    // Path-level operations
    // -----------------------------------------------------------------

    /// Walk the intermediate segments of `path`, lazily materializing
    /// sub-overlays, and return the parent node plus the leaf name.
    ///
    /// A missing segment fails with `NotFound` unless `allow_create`; a
    /// segment that exists but is not directory-like fails with
    /// `NotDirectory` either way.
    pub async fn traverse(
        &mut self,
        path: &str,
        allow_create: bool,
    ) -> OverlayResult<(NodeId, String)> {
        let segments = split_path(path)?;
        let (leaf, dirs) = segments.split_last().expect("split_path yields >= 1");

        let mut current = Self::ROOT;
        for (depth, segment) in dirs.iter().enumerate() {
            let here = || segments[..=depth].join("/");
            current = match self.entry_by_name(current, segment) {
                Some(view) if !view.is_directory_like() => {
                    return Err(OverlayError::NotDirectory { path: here() });
                }
                Some(EntryView::Overlay(child)) => child,
                Some(EntryView::Persisted { id, .. }) => {
                    // First touch of a base subtree: load it and swap in a
                    // sub-overlay so further edits accumulate in memory.
                    let tree = read_tree(&*self.store, &id).await?;
                    let child = self.push_node(OverlayNode::new(Some((id, tree))));
                    self.link_subtree(current, segment, child);
                    child
                }
                None if allow_create => {
                    let child = self.push_node(OverlayNode::new(None));
                    self.link_subtree(current, segment, child);
                    child
                }
                None => {
                    return Err(OverlayError::NotFound { path: here() });
                }
            };
        }
        Ok((current, leaf.to_string()))
    }

    /// The overlay's view of a full path, without creating anything.
    pub async fn entry_at_path(&mut self, path: &str) -> OverlayResult<Option<EntryView>> {
        match self.traverse(path, false).await {
            Ok((parent, leaf)) => Ok(self.entry_by_name(parent, &leaf)),
            Err(OverlayError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Point `path` at `id`, enforcing the create/update flags.
    ///
    /// Refuses to silently overwrite an existing entry unless
    /// `allow_update`, and refuses to create a missing one unless
    /// `allow_create`.
    pub async fn insert_path(
        &mut self,
        path: &str,
        id: ObjectId,
        mode: EntryMode,
        allow_create: bool,
        allow_update: bool,
    ) -> OverlayResult<()> {
        let (parent, leaf) = self.traverse(path, allow_create).await?;
        match self.entry_by_name(parent, &leaf) {
            Some(_) if !allow_update => {
                return Err(OverlayError::OverwriteRejected {
                    path: path.to_string(),
                });
            }
            None if !allow_create => {
                return Err(OverlayError::NotFound {
                    path: path.to_string(),
                });
            }
            _ => {}
        }
        debug!(path, id = %id.short_hex(), "overlay insert");
        self.insert(parent, &leaf, id, mode);
        Ok(())
    }

    /// Tombstone `path`. Fails with `NotFound` if nothing exists there.
    pub async fn delete_path(&mut self, path: &str) -> OverlayResult<()> {
        let (parent, leaf) = self.traverse(path, false).await?;
        if self.entry_by_name(parent, &leaf).is_none() {
            return Err(OverlayError::NotFound {
                path: path.to_string(),
            });
        }
        debug!(path, "overlay delete");
        self.remove(parent, &leaf);
        Ok(())
    }

    /// Replace the object at an existing `path` (update-only).
    pub async fn patch_path(&mut self, path: &str, id: ObjectId) -> OverlayResult<()> {
        self.insert_path(path, id, EntryMode::Regular, false, true)
            .await
    }

    // -----------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------

    /// Serialize the overlay into real tree objects, bottom-up.
    ///
    /// Any node with no mutations returns its base id unchanged -- whole
    /// untouched subtrees are never rebuilt. Tombstoned entries are
    /// omitted; a sub-overlay that ends up empty is dropped from its
    /// parent. A root that ends up empty yields `None` unless
    /// `allow_empty`.
    pub async fn write(&self, allow_empty: bool) -> OverlayResult<Option<ObjectId>> {
        self.write_node(Self::ROOT, allow_empty).await
    }

    fn write_node<'a>(
        &'a self,
        node: NodeId,
        allow_empty: bool,
    ) -> Pin<Box<dyn Future<Output = OverlayResult<Option<ObjectId>>> + Send + 'a>> {
        Box::pin(async move {
            let n = &self.nodes[node.0];

            // No-op prune: an untouched node keeps its base id and nothing
            // beneath it is visited.
            if n.edits.is_empty() {
                return match &n.base {
                    Some((base_id, _)) => Ok(Some(*base_id)),
                    None if allow_empty => {
                        Ok(Some(write_tree(&*self.store, &Tree::empty()).await?))
                    }
                    None => Ok(None),
                };
            }

            let mut entries: BTreeMap<String, TreeEntry> = n
                .base
                .as_ref()
                .map(|(_, tree)| {
                    tree.entries
                        .iter()
                        .map(|e| (e.name.clone(), e.clone()))
                        .collect()
                })
                .unwrap_or_default();

            for (name, slot) in &n.edits {
                match slot {
                    Slot::Tombstone => {
                        entries.remove(name);
                    }
                    Slot::Leaf { id, mode } => {
                        entries.insert(name.clone(), TreeEntry::new(*mode, name.clone(), *id));
                    }
                    Slot::Subtree(child) => match self.write_node(*child, false).await? {
                        Some(id) => {
                            entries.insert(
                                name.clone(),
                                TreeEntry::new(EntryMode::Directory, name.clone(), id),
                            );
                        }
                        // The subtree dissolved to nothing.
                        None => {
                            entries.remove(name);
                        }
                    },
                }
            }

            if entries.is_empty() && !allow_empty {
                return Ok(None);
            }
            let tree = Tree::new(entries.into_values().collect());
            Ok(Some(write_tree(&*self.store, &tree).await?))
        })
    }

    // -----------------------------------------------------------------
    // Arena plumbing
    // -----------------------------------------------------------------

    fn push_node(&mut self, node: OverlayNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn link_subtree(&mut self, parent: NodeId, name: &str, child: NodeId) {
        let p = &mut self.nodes[parent.0];
        p.edits.insert(name.to_string(), Slot::Subtree(child));
        p.cache
            .insert(name.to_string(), Some(EntryView::Overlay(child)));
    }
}

impl std::fmt::Debug for MutableTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableTree")
            .field("nodes", &self.nodes.len())
            .field("clean", &self.is_clean())
            .finish()
    }
}

fn split_path(path: &str) -> OverlayResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    if path.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(OverlayError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carta_store::{write_blob, Blob, InMemoryObjectStore};

    async fn store_with_blob(content: &[u8]) -> (Arc<InMemoryObjectStore>, ObjectId) {
        let store = Arc::new(InMemoryObjectStore::new());
        let id = write_blob(&*store, &Blob::new(content.to_vec()))
            .await
            .unwrap();
        (store, id)
    }

    /// Build a persisted snapshot with `contents/post/1.json` in it.
    async fn seeded_overlay() -> (Arc<InMemoryObjectStore>, ObjectId) {
        let (store, blob) = store_with_blob(b"{\"attributes\":{}}").await;
        let mut overlay = MutableTree::open(Arc::clone(&store) as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        overlay
            .insert_path("contents/post/1.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();
        let root = overlay.write(true).await.unwrap().unwrap();
        (store, root)
    }

    #[tokio::test]
    async fn empty_overlay_write_with_allow_empty() {
        let store = Arc::new(InMemoryObjectStore::new());
        let overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        let id = overlay.write(true).await.unwrap();
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn empty_overlay_write_without_allow_empty() {
        let store = Arc::new(InMemoryObjectStore::new());
        let overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        assert!(overlay.write(false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn noop_overlay_returns_base_id() {
        let (store, root) = seeded_overlay().await;
        let overlay = MutableTree::open(store as Arc<dyn ObjectStore>, Some(root))
            .await
            .unwrap();
        // No mutations: the base id comes back unchanged.
        assert_eq!(overlay.write(true).await.unwrap(), Some(root));
    }

    #[tokio::test]
    async fn insert_and_lookup_deep_path() {
        let (store, blob) = store_with_blob(b"body").await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        overlay
            .insert_path("contents/post/1.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();

        let view = overlay.entry_at_path("contents/post/1.json").await.unwrap();
        assert_eq!(
            view,
            Some(EntryView::Persisted {
                id: blob,
                mode: EntryMode::Regular
            })
        );
    }

    #[tokio::test]
    async fn lookup_caches_absence() {
        let (store, root) = seeded_overlay().await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, Some(root))
            .await
            .unwrap();
        let node = overlay.root();
        assert!(overlay.entry_by_name(node, "missing").is_none());
        // Cached, including absence.
        assert!(overlay.nodes[0].cache.contains_key("missing"));
        assert!(overlay.entry_by_name(node, "missing").is_none());
    }

    #[tokio::test]
    async fn traverse_without_create_fails_on_missing_dir() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        let err = overlay.traverse("a/b/c.json", false).await.unwrap_err();
        assert!(matches!(err, OverlayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn traverse_fails_through_a_file() {
        let (store, blob) = store_with_blob(b"x").await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        overlay
            .insert_path("a/file.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();
        let err = overlay
            .traverse("a/file.json/nested.json", true)
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::NotDirectory { .. }));
    }

    #[tokio::test]
    async fn create_must_not_clobber() {
        let (store, root) = seeded_overlay().await;
        let (_, blob2) = store_with_blob(b"other").await;
        let store: Arc<dyn ObjectStore> = store;
        let mut overlay = MutableTree::open(store, Some(root)).await.unwrap();

        let err = overlay
            .insert_path("contents/post/1.json", blob2, EntryMode::Regular, true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::OverwriteRejected { .. }));
    }

    #[tokio::test]
    async fn patch_requires_existing_path() {
        let (store, blob) = store_with_blob(b"x").await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        let err = overlay.patch_path("a/b.json", blob).await.unwrap_err();
        assert!(matches!(err, OverlayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn patch_replaces_existing_leaf() {
        let (store, root) = seeded_overlay().await;
        let new_blob = write_blob(&*store, &Blob::new(b"updated".to_vec()))
            .await
            .unwrap();
        let mut overlay = MutableTree::open(Arc::clone(&store) as Arc<dyn ObjectStore>, Some(root))
            .await
            .unwrap();
        overlay
            .patch_path("contents/post/1.json", new_blob)
            .await
            .unwrap();
        let view = overlay.entry_at_path("contents/post/1.json").await.unwrap();
        assert_eq!(
            view,
            Some(EntryView::Persisted {
                id: new_blob,
                mode: EntryMode::Regular
            })
        );
    }

    #[tokio::test]
    async fn delete_missing_path_fails() {
        let (store, root) = seeded_overlay().await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, Some(root))
            .await
            .unwrap();
        let err = overlay
            .delete_path("contents/post/2.json")
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_then_write_omits_entry() {
        let (store, root) = seeded_overlay().await;
        let mut overlay = MutableTree::open(Arc::clone(&store) as Arc<dyn ObjectStore>, Some(root))
            .await
            .unwrap();
        overlay.delete_path("contents/post/1.json").await.unwrap();
        let new_root = overlay.write(true).await.unwrap().unwrap();
        assert_ne!(new_root, root);

        // The whole contents/post chain dissolved with its only entry.
        let tree = read_tree(&*store, &new_root).await.unwrap();
        assert!(tree.get("contents").is_none());
    }

    #[tokio::test]
    async fn untouched_sibling_subtree_keeps_its_id() {
        let (store, blob) = store_with_blob(b"body").await;
        let store: Arc<dyn ObjectStore> = store;

        // Snapshot with two sibling categories.
        let mut overlay = MutableTree::open(Arc::clone(&store), None).await.unwrap();
        overlay
            .insert_path("contents/post/1.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();
        overlay
            .insert_path("schema/content-types/posts.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();
        let root = overlay.write(true).await.unwrap().unwrap();
        let tree = read_tree(&*store, &root).await.unwrap();
        let schema_id = tree.get("schema").unwrap().object_id;

        // Edit only under contents/.
        let mut overlay = MutableTree::open(Arc::clone(&store), Some(root)).await.unwrap();
        overlay.delete_path("contents/post/1.json").await.unwrap();
        let new_root = overlay.write(true).await.unwrap().unwrap();

        let new_tree = read_tree(&*store, &new_root).await.unwrap();
        // schema/ was never rebuilt: identical id.
        assert_eq!(new_tree.get("schema").unwrap().object_id, schema_id);
    }

    #[tokio::test]
    async fn write_is_repeatable() {
        let (store, blob) = store_with_blob(b"body").await;
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        overlay
            .insert_path("cards/c1.json", blob, EntryMode::Regular, true, false)
            .await
            .unwrap();
        let id1 = overlay.write(true).await.unwrap();
        let id2 = overlay.write(true).await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn invalid_paths_rejected() {
        let store = Arc::new(InMemoryObjectStore::new());
        let mut overlay = MutableTree::open(store as Arc<dyn ObjectStore>, None)
            .await
            .unwrap();
        for path in ["", "a//b", "/leading", "trailing/"] {
            let err = overlay.traverse(path, true).await.unwrap_err();
            assert!(matches!(err, OverlayError::InvalidPath { .. }), "{path}");
        }
    }
}
