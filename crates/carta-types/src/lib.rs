//! Foundation types for the Carta versioned document store.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace:
//!
//! - [`ObjectId`] -- content-addressed identifier for blobs, trees, and
//!   commits
//! - [`Document`] -- a JSON document body (attributes + relationships) with
//!   a canonical byte form
//! - [`Collection`] -- the mapping between logical documents and tree paths

pub mod document;
pub mod error;
pub mod object;

pub use document::{Collection, DocPath, Document};
pub use error::TypeError;
pub use object::ObjectId;
