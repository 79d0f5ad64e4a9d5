//! The [`RefStore`] and [`BranchTip`] traits.
//!
//! `RefStore` is the storage interface for named references; `BranchTip` is
//! the write-side view of a single branch that the transactional write path
//! lands commits through. Both are async: backends may be in-memory, on
//! disk, or remote.

use std::sync::Arc;

use async_trait::async_trait;

use carta_types::ObjectId;

use crate::error::RefResult;

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`). The namespace
/// follows a hierarchical layout: `refs/heads/*` for branches,
/// `refs/remotes/{remote}/*` for remote tracking refs.
///
/// `compare_and_swap` is the only mutation the write path uses: it must be
/// atomic, so that of any number of concurrent writers racing to move the
/// same ref, exactly one per round succeeds.
#[async_trait]
pub trait RefStore: Send + Sync {
    /// Read a ref by its canonical name (e.g. "refs/heads/master").
    ///
    /// Returns `Ok(None)` if the ref does not exist.
    async fn read_ref(&self, name: &str) -> RefResult<Option<ObjectId>>;

    /// Write (create or update) a ref unconditionally.
    async fn write_ref(&self, name: &str, target: ObjectId) -> RefResult<()>;

    /// Atomically update a ref from `expected` to `new`.
    ///
    /// Returns `Ok(true)` if the ref still matched `expected` (with `None`
    /// meaning "must not exist") and was updated; `Ok(false)` if it had
    /// moved. `Ok(false)` is the signal the finalize retry loop converges
    /// on.
    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> RefResult<bool>;

    /// Delete a ref by canonical name.
    ///
    /// Returns `Ok(true)` if the ref existed and was deleted.
    async fn delete_ref(&self, name: &str) -> RefResult<bool>;

    /// List all refs whose canonical name starts with `prefix`, sorted.
    ///
    /// Pass `""` to list all refs. Pass `"refs/heads/"` for branches only.
    async fn list_refs(&self, prefix: &str) -> RefResult<Vec<(String, ObjectId)>>;
}

/// The write-side view of one branch.
///
/// `load` reads the current head; `compare_and_swap` attempts to land a new
/// head. Local branches resolve against a [`RefStore`]; remote-backed
/// branches push. Either way the semantics are identical from the
/// transaction's point of view.
#[async_trait]
pub trait BranchTip: Send + Sync {
    /// A human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Read the current head commit, `None` for an unborn branch.
    async fn load(&self) -> RefResult<Option<ObjectId>>;

    /// Attempt to move the branch from `expected` to `new`.
    ///
    /// Returns `Ok(false)` when the branch has moved past `expected` in the
    /// meantime; the caller re-reads and retries.
    async fn compare_and_swap(
        &self,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> RefResult<bool>;
}

/// A [`BranchTip`] resolved against a local [`RefStore`] under
/// `refs/heads/<name>`.
pub struct LocalBranch {
    refs: Arc<dyn RefStore>,
    name: String,
    canonical: String,
}

impl LocalBranch {
    /// Create a tip for `name`, validating the branch name.
    pub fn new(refs: Arc<dyn RefStore>, name: impl Into<String>) -> RefResult<Self> {
        let name = name.into();
        crate::names::validate_branch_name(&name)?;
        let canonical = format!("refs/heads/{name}");
        Ok(Self {
            refs,
            name,
            canonical,
        })
    }
}

#[async_trait]
impl BranchTip for LocalBranch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> RefResult<Option<ObjectId>> {
        self.refs.read_ref(&self.canonical).await
    }

    async fn compare_and_swap(
        &self,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> RefResult<bool> {
        self.refs
            .compare_and_swap(&self.canonical, expected, new)
            .await
    }
}
