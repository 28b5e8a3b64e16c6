//! Reference management for ovl.
//!
//! Branches are the human-readable entry points into the object store: a
//! branch maps a name to exactly one commit at any time, and reassignment is
//! its only mutation.
//!
//! # Modules
//!
//! - [`error`] — Error types for ref operations
//! - [`types`] — The [`Ref`] type
//! - [`traits`] — The [`RefStore`] trait defining the storage interface
//! - [`names`] — Branch name validation
//! - [`memory`] — In-memory [`InMemoryRefStore`] for tests
//! - [`fs`] — On-disk [`FsRefStore`] (`refs/heads/<name>` files)

pub mod error;
pub mod fs;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use fs::FsRefStore;
pub use memory::InMemoryRefStore;
pub use names::validate_branch_name;
pub use traits::RefStore;
pub use types::{branch_ref_name, Ref, HEADS_PREFIX};
