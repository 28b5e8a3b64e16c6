//! Foundation types for ovl.
//!
//! Every other ovl crate depends on `ovl-types`. It deliberately stays small:
//! the only shared vocabulary across the store, the refs and the merge engine
//! is the content-addressed [`ObjectId`].
//!
//! # Key Types
//!
//! - [`ObjectId`] — Content-addressed identifier (BLAKE3 hash) of a blob, tree or commit
//! - [`TypeError`] — Parse failures for identifiers

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::ObjectId;
