//! Copy-on-write mutable tree overlay.
//!
//! A [`MutableTree`] is an in-memory view of an immutable [`Tree`] that
//! accepts path-based inserts, deletes, and patches without touching the
//! underlying objects. Nothing is written until [`MutableTree::write`]
//! serializes the touched paths bottom-up -- and any subtree with no
//! mutations is skipped entirely, returning its base id unchanged. A
//! transaction can therefore make many scattered edits across a deep
//! hierarchy and pay the tree-rebuilding cost exactly once, only for the
//! paths actually touched.
//!
//! Overlay nodes live in an arena and are addressed by [`NodeId`], so
//! replacing or tearing down a subtree mid-transaction never fights deep
//! ownership chains.

pub mod error;
pub mod tree;

pub use error::{OverlayError, OverlayResult};
pub use tree::{EntryView, MutableTree, NodeId};
