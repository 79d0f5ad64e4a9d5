//! The index sink boundary.
//!
//! The indexer never talks to a search backend directly; it emits saves and
//! deletes into an [`IndexSink`]. Backends are free to batch, translate, or
//! drop emissions as long as they apply them in order.

use async_trait::async_trait;

use carta_types::{Collection, Document};

use crate::error::IndexResult;

/// A document as handed to the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedDocument {
    pub collection: Collection,
    pub doc_type: String,
    pub id: String,
    pub document: Document,
}

/// Receiver for index emissions, applied in call order.
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// The pass is a full rebuild: drop everything previously indexed.
    async fn begin_replace(&self) -> IndexResult<()>;

    /// Create or update one document.
    async fn save(&self, doc: IndexedDocument) -> IndexResult<()>;

    /// Remove one document.
    async fn delete(&self, collection: Collection, doc_type: &str, id: &str) -> IndexResult<()>;
}

/// One recorded sink call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Replaced,
    Saved(IndexedDocument),
    Deleted(Collection, String, String),
}

/// Records every emission, for asserting on indexer passes.
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event, in emission order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("lock poisoned").clone()
    }

    /// The saved documents, in emission order.
    pub fn saves(&self) -> Vec<IndexedDocument> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Saved(doc) => Some(doc),
                _ => None,
            })
            .collect()
    }

    /// The deleted identities, in emission order.
    pub fn deletes(&self) -> Vec<(Collection, String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Deleted(c, t, i) => Some((c, t, i)),
                _ => None,
            })
            .collect()
    }

    /// Whether the pass started with a full replace.
    pub fn replaced(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, SinkEvent::Replaced))
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().expect("lock poisoned").clear();
    }
}

#[async_trait]
impl IndexSink for RecordingSink {
    async fn begin_replace(&self) -> IndexResult<()> {
        self.events
            .lock()
            .expect("lock poisoned")
            .push(SinkEvent::Replaced);
        Ok(())
    }

    async fn save(&self, doc: IndexedDocument) -> IndexResult<()> {
        self.events
            .lock()
            .expect("lock poisoned")
            .push(SinkEvent::Saved(doc));
        Ok(())
    }

    async fn delete(&self, collection: Collection, doc_type: &str, id: &str) -> IndexResult<()> {
        self.events.lock().expect("lock poisoned").push(SinkEvent::Deleted(
            collection,
            doc_type.to_string(),
            id.to_string(),
        ));
        Ok(())
    }
}
