//! Transactional writes for Carta.
//!
//! A [`Change`] is the unit of write: open it at a branch head, stage edits
//! through [`FileHandle`]s, and [`finalize`](Change::finalize) to land a
//! commit. Finalize reconciles with whatever the branch points at by the
//! time it runs -- fast-forwarding, merging divergent histories with a
//! recursive three-way tree merge, or surfacing a [`ChangeError::Conflict`]
//! when both sides touched the same paths. Contention on the branch pointer
//! itself is absorbed by an exponential-backoff retry loop.

pub mod change;
pub mod error;
pub mod handle;
pub mod merge;

pub use change::{Change, CommitOptions};
pub use error::{ChangeError, ChangeResult};
pub use handle::{FileHandle, FileState, GetOptions};
pub use merge::{merge_trees, MergeOutcome};
