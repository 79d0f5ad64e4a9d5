//! Document CRUD for Carta.
//!
//! [`DocumentWriter`] maps logical create/update/delete requests onto
//! branch transactions. Every mutation round-trips an opaque version token
//! (the landed commit id); a stale token anchors the operation at history
//! and the transactional merge decides whether it still applies. Errors
//! carry an HTTP-style status via [`WriterError::status`].

pub mod error;
pub mod writer;

pub use error::{WriterError, WriterResult};
pub use writer::{DocumentRecord, DocumentWriter, PendingChange};
