//! The ovl tree store.
//!
//! Ties an object store and a ref store together behind the [`TreeStore`]
//! trait: transactional writes of directory trees and commits, branch
//! resolution, and checkout into a directory in either plain union mode or
//! overlay mode, where whiteout entries delete lower-layer content.
//!
//! # Modules
//!
//! - [`repo`] — [`Repo`], the on-disk and in-memory implementation
//! - [`traits`] — the [`TreeStore`] trait
//! - [`transaction`] — [`Transaction`] and its stats
//! - [`mtree`] — [`MutableTree`], the tree builder
//! - [`checkout`] — [`CheckoutMode`] and [`CheckoutStats`]
//! - [`whiteout`] — whiteout entry names
//! - [`config`] — [`RepoConfig`]
//! - [`lock`] — the single-writer lock

pub mod checkout;
pub mod config;
pub mod error;
mod ingest;
pub mod lock;
pub mod mtree;
pub mod repo;
pub mod traits;
pub mod transaction;
pub mod whiteout;

pub use checkout::{CheckoutMode, CheckoutStats};
pub use config::{RepoConfig, RepoMode};
pub use error::{BoxError, RepoError, RepoResult};
pub use mtree::{MtreeEntry, MutableTree};
pub use repo::Repo;
pub use traits::TreeStore;
pub use transaction::{Transaction, TransactionStats};
pub use whiteout::{whiteout_name, Whiteout, OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
