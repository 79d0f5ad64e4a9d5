//! Branch reference management for Carta.
//!
//! A branch is a named, mutable pointer to a commit -- the sole mutable
//! indirection in the data model and the single serialization point for
//! concurrent writers. Every landing attempt goes through the atomic
//! [`RefStore::compare_and_swap`] primitive; no caller ever observes a
//! half-updated pointer, and no ref is ever read-modify-written without a
//! subsequent conflict check.

pub mod error;
pub mod memory;
pub mod names;
pub mod traits;

pub use error::{RefError, RefResult};
pub use memory::InMemoryRefStore;
pub use names::validate_branch_name;
pub use traits::{BranchTip, LocalBranch, RefStore};
