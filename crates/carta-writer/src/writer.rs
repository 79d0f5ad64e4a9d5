//! Document CRUD over transactions.
//!
//! [`DocumentWriter`] turns logical create/update/delete requests into
//! [`Change`]s. Concurrency is optimistic: updates and deletes anchor at
//! the commit named by the caller's version token, and the finalize-time
//! merge reconciles against whatever the branch points at now. The version
//! token is simply the landed commit id in hex -- opaque to callers, who
//! only ever round-trip it.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;
use tracing::debug;

use carta_change::{Change, CommitOptions, FileHandle, GetOptions};
use carta_refs::BranchTip;
use carta_store::ancestry::read_commit;
use carta_store::{ObjectStore, Signature, StoreError};
use carta_types::{Collection, Document, ObjectId};

use crate::error::{WriterError, WriterResult};

/// Byte length of generated document ids (hex-encoded to twice this).
const GENERATED_ID_BYTES: usize = 20;

/// Maps logical document operations onto transactions against one branch.
pub struct DocumentWriter {
    store: Arc<dyn ObjectStore>,
    tip: Arc<dyn BranchTip>,
    author_name: String,
    author_email: String,
}

/// What a prepared change will do at finalize.
#[derive(Debug)]
enum Action {
    Save(Document),
    Delete,
}

/// A prepared but unlanded document operation.
///
/// Consumed exactly once by [`finalize`](PendingChange::finalize). Dropping
/// it abandons the operation; nothing was written to the branch.
pub struct PendingChange {
    collection: Collection,
    doc_type: String,
    id: String,
    /// The document as it existed at the anchor commit, if any.
    pub original: Option<Document>,
    action: Action,
    change: Change,
    handle: FileHandle,
    author: Signature,
}

// The underlying transaction has no Debug form, so the derive is off the
// table; show the document identity and the staged action instead.
impl fmt::Debug for PendingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChange")
            .field("collection", &self.collection)
            .field("doc_type", &self.doc_type)
            .field("id", &self.id)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// The landed result of a document operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRecord {
    pub collection: Collection,
    pub doc_type: String,
    pub id: String,
    pub document: Document,
    /// Opaque version token: the landed commit id in hex. Callers pass it
    /// back on the next update or delete of this document.
    pub version: String,
}

impl DocumentWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tip: Arc<dyn BranchTip>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tip,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    fn signature(&self) -> Signature {
        Signature::now(self.author_name.clone(), self.author_email.clone())
    }

    /// Prepare a create at the branch's current head.
    ///
    /// When `id` is `None` a 20-byte random hex id is generated,
    /// regenerated while the path is already occupied. An explicit `id`
    /// that is occupied fails with `IdInUse`.
    pub async fn prepare_create(
        &self,
        collection: Collection,
        doc_type: &str,
        id: Option<&str>,
        document: Document,
    ) -> WriterResult<PendingChange> {
        let mut change =
            Change::open(Arc::clone(&self.store), Arc::clone(&self.tip)).await?;

        let (id, handle) = match id {
            Some(id) => {
                let path = collection.path_for(doc_type, id);
                let handle = change.get(&path, GetOptions::CREATE).await?;
                if handle.exists() {
                    return Err(WriterError::IdInUse { path });
                }
                (id.to_string(), handle)
            }
            None => loop {
                let id = generated_id();
                let path = collection.path_for(doc_type, &id);
                let handle = change.get(&path, GetOptions::CREATE).await?;
                if !handle.exists() {
                    break (id, handle);
                }
                // Occupied: 160 bits of randomness collided, roll again.
            },
        };

        debug!(collection = %collection, doc_type, id, "prepared create");
        Ok(PendingChange {
            collection,
            doc_type: doc_type.to_string(),
            id,
            original: None,
            action: Action::Save(document),
            change,
            handle,
            author: self.signature(),
        })
    }

    /// Prepare an update anchored at the commit named by `version`.
    ///
    /// The proposed document is the shallow section merge of the stored
    /// document at that commit and `document`.
    pub async fn prepare_update(
        &self,
        collection: Collection,
        doc_type: &str,
        id: &str,
        version: &str,
        document: Document,
    ) -> WriterResult<PendingChange> {
        let (change, handle, original) =
            self.open_at_version(collection, doc_type, id, version).await?;

        let mut proposed = original.clone();
        proposed.merge_from(&document);

        debug!(collection = %collection, doc_type, id, version, "prepared update");
        Ok(PendingChange {
            collection,
            doc_type: doc_type.to_string(),
            id: id.to_string(),
            original: Some(original),
            action: Action::Save(proposed),
            change,
            handle,
            author: self.signature(),
        })
    }

    /// Prepare a delete anchored at the commit named by `version`.
    pub async fn prepare_delete(
        &self,
        collection: Collection,
        doc_type: &str,
        id: &str,
        version: &str,
    ) -> WriterResult<PendingChange> {
        let (change, handle, original) =
            self.open_at_version(collection, doc_type, id, version).await?;

        debug!(collection = %collection, doc_type, id, version, "prepared delete");
        Ok(PendingChange {
            collection,
            doc_type: doc_type.to_string(),
            id: id.to_string(),
            original: Some(original),
            action: Action::Delete,
            change,
            handle,
            author: self.signature(),
        })
    }

    /// Resolve a version token, open a transaction at that commit, and
    /// load the document it must contain.
    async fn open_at_version(
        &self,
        collection: Collection,
        doc_type: &str,
        id: &str,
        version: &str,
    ) -> WriterResult<(Change, FileHandle, Document)> {
        let anchor = ObjectId::from_hex(version).map_err(|_| WriterError::VersionMismatch {
            token: version.to_string(),
        })?;
        match read_commit(&*self.store, &anchor).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(WriterError::VersionMismatch {
                    token: version.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut change = Change::open_at(
            Arc::clone(&self.store),
            Arc::clone(&self.tip),
            Some(anchor),
        )
        .await?;

        let path = collection.path_for(doc_type, id);
        let handle = change.get(&path, GetOptions::UPDATE).await?;
        let bytes = change
            .read(&handle)
            .await?
            .ok_or(WriterError::NotFound { path })?;
        let (original, _) = Document::decode(&bytes)?;
        Ok((change, handle, original))
    }
}

impl PendingChange {
    /// The document about to be written, or the original for a delete.
    pub fn proposed(&self) -> Option<&Document> {
        match &self.action {
            Action::Save(doc) => Some(doc),
            Action::Delete => None,
        }
    }

    /// Land the prepared operation and return the resulting record.
    pub async fn finalize(mut self, message: impl Into<String>) -> WriterResult<DocumentRecord> {
        let document = match self.action {
            Action::Save(doc) => {
                let bytes = match self.collection {
                    // Card bodies embed their identity; everything else
                    // derives it from the path.
                    Collection::Cards => doc.to_card_bytes(&self.doc_type, &self.id)?,
                    _ => doc.to_canonical_bytes()?,
                };
                self.change.save(&mut self.handle, bytes).await?;
                doc
            }
            Action::Delete => {
                self.change.remove(&mut self.handle).await?;
                self.original.clone().unwrap_or_default()
            }
        };

        let commit = self
            .change
            .finalize(CommitOptions::new(self.author, message))
            .await?;

        Ok(DocumentRecord {
            collection: self.collection,
            doc_type: self.doc_type,
            id: self.id,
            document,
            version: commit.to_hex(),
        })
    }
}

fn generated_id() -> String {
    let mut bytes = [0u8; GENERATED_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
