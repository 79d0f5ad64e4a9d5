//! Content-addressed object storage for Carta.
//!
//! Every piece of persisted state -- document bodies, directory listings,
//! history -- is stored as an immutable object identified by its BLAKE3 hash
//! (domain-separated by object kind).
//!
//! # Object Types
//!
//! - [`Blob`] -- raw content (a document's serialized body)
//! - [`Tree`] -- ordered directory listing mapping names to object references
//! - [`Commit`] -- a snapshot: tree reference, parent commits, identities,
//!   message
//!
//! # Storage Backends
//!
//! All backends implement the async [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written (content-addressing guarantees this).
//! 2. `Ok(None)` on read means "not found"; `Err` means I/O or corruption --
//!    the two are never conflated.
//! 3. Concurrent reads are always safe (objects are immutable).
//! 4. The store never interprets object contents -- it is a pure key-value
//!    store; the typed helpers in [`ancestry`] do the decoding.

pub mod ancestry;
pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use ancestry::{
    is_ancestor, merge_base, read_blob, read_commit, read_tree, write_blob, write_commit,
    write_tree,
};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use object::{Blob, Commit, EntryMode, ObjectKind, Signature, StoredObject, Tree, TreeEntry};
pub use traits::ObjectStore;
