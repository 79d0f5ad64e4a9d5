//! Per-path file handles.
//!
//! A [`FileHandle`] is a transaction's view of a single path. It carries
//! the intent flags the path was opened with and the staged state, which is
//! exactly one of: still the persisted leaf, a pending in-memory body, or a
//! tombstone. The explicit [`FileState`] enum keeps every combination of
//! "exists / staged / deleted" spelled out instead of encoded in nullable
//! fields.

use carta_store::ancestry::read_blob;
use carta_store::{EntryMode, ObjectStore};
use carta_types::ObjectId;

use crate::error::{ChangeError, ChangeResult};

/// Intent flags for opening a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetOptions {
    /// The write may create the path if it does not exist.
    pub allow_create: bool,
    /// The write may replace the path if it already exists.
    pub allow_update: bool,
}

impl GetOptions {
    /// Create-only: fails if the path already exists.
    pub const CREATE: Self = Self {
        allow_create: true,
        allow_update: false,
    };

    /// Update-only: fails if the path does not exist.
    pub const UPDATE: Self = Self {
        allow_create: false,
        allow_update: true,
    };

    /// Create or update.
    pub const UPSERT: Self = Self {
        allow_create: true,
        allow_update: true,
    };
}

/// What a handle currently stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileState {
    /// The persisted leaf from the parent snapshot, untouched.
    Persisted { id: ObjectId, mode: EntryMode },
    /// A staged body not yet serialized into a tree.
    Pending(Vec<u8>),
    /// Staged deletion.
    Tombstone,
}

/// A transaction's view of one path.
///
/// Handles are created by [`Change::get`](crate::Change::get) and passed
/// back to the change's mutation methods, which enforce the intent flags
/// recorded here.
#[derive(Clone, Debug)]
pub struct FileHandle {
    path: String,
    allow_create: bool,
    allow_update: bool,
    /// `None` means nothing exists at this path yet.
    pub(crate) state: Option<FileState>,
}

impl FileHandle {
    pub(crate) fn new(path: String, opts: GetOptions, state: Option<FileState>) -> Self {
        Self {
            path,
            allow_create: opts.allow_create,
            allow_update: opts.allow_update,
            state,
        }
    }

    /// The path this handle refers to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `true` if the handle currently resolves to content
    /// (persisted or pending, not tombstoned or absent).
    pub fn exists(&self) -> bool {
        matches!(
            self.state,
            Some(FileState::Persisted { .. }) | Some(FileState::Pending(_))
        )
    }

    /// The staged or persisted content, `None` if absent or tombstoned.
    ///
    /// A pending body is served from memory; a persisted leaf is fetched
    /// from the store.
    pub async fn read(&self, store: &dyn ObjectStore) -> ChangeResult<Option<Vec<u8>>> {
        match &self.state {
            Some(FileState::Pending(bytes)) => Ok(Some(bytes.clone())),
            Some(FileState::Persisted { id, .. }) => {
                Ok(Some(read_blob(store, id).await?.data))
            }
            Some(FileState::Tombstone) | None => Ok(None),
        }
    }

    /// Check the intent flags against the current state before a write.
    pub(crate) fn check_write(&self) -> ChangeResult<()> {
        match &self.state {
            Some(FileState::Persisted { .. }) | Some(FileState::Pending(_))
                if !self.allow_update =>
            {
                Err(ChangeError::OverwriteRejected {
                    path: self.path.clone(),
                })
            }
            // Re-creating over a tombstone or filling an absent path both
            // require create intent.
            Some(FileState::Tombstone) | None if !self.allow_create => {
                Err(ChangeError::NotFound {
                    path: self.path.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}
