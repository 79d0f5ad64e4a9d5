//! Incremental index feeding for Carta.
//!
//! The indexer diffs the branch head against the snapshot the search
//! backend last absorbed and emits exactly the difference through the
//! [`IndexSink`] boundary. Unchanged subtrees are pruned by object id and
//! never read; a missing or unresolvable previous snapshot degrades to a
//! full rebuild. Malformed documents are skipped, never fatal.

pub mod error;
pub mod indexer;
pub mod sink;

pub use error::{IndexError, IndexResult};
pub use indexer::{DocHint, IndexMeta, Indexer, Updater};
pub use sink::{IndexSink, IndexedDocument, RecordingSink, SinkEvent};
