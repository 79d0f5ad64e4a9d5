//! Remote repository boundary for Carta.
//!
//! A remote is reached through a [`RemoteTransport`] (head, fetch-all,
//! push); [`RemoteBranch`] adapts one remote branch to the same
//! [`BranchTip`](carta_refs::BranchTip) surface transactions land through
//! locally, fetching the remote's objects whenever a push loses or the head
//! moves. [`CloneCache`] keeps one opened clone per URL, and
//! [`InMemoryRemote`] simulates the hosted side for tests.

pub mod branch;
pub mod clone_cache;
pub mod config;
pub mod error;
pub mod transport;

pub use branch::RemoteBranch;
pub use clone_cache::{CloneCache, CloneState};
pub use config::RemoteConfig;
pub use error::{RemoteError, RemoteResult};
pub use transport::{copy_closure, InMemoryRemote, RemoteTransport};
