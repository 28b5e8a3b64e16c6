//! Error types for tree store operations.
//!
//! The first six variants are the failure kinds callers are expected to
//! branch on. Each carries a short message and keeps the lower-level cause
//! as its `source` for diagnostics.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed lower-level cause attached to a [`RepoError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the tree store.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A transaction could not be started, committed or aborted.
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Directory contents could not be ingested into a tree builder.
    #[error("tree write error: {message}")]
    TreeWrite {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A tree builder could not be frozen into tree objects.
    #[error("tree finalize error: {message}")]
    MtreeFinalize {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A commit object could not be written.
    #[error("commit write error: {message}")]
    CommitWrite {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A branch name or commit id did not resolve to a commit.
    #[error("cannot resolve {rev}: {message}")]
    RefResolution {
        rev: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A commit could not be materialized into a target directory.
    #[error("checkout error: {message}")]
    Checkout {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The path does not hold a repository.
    #[error("not a repository: {0}")]
    NotARepository(PathBuf),

    /// A repository already exists at the path.
    #[error("repository already exists: {0}")]
    AlreadyExists(PathBuf),

    /// The repository configuration is unreadable or invalid.
    #[error("invalid repository config: {0}")]
    Config(String),

    /// Object store failure outside of any of the operations above.
    #[error("store error: {0}")]
    Store(#[from] ovl_store::StoreError),

    /// Ref store failure outside of any of the operations above.
    #[error("ref error: {0}")]
    Ref(#[from] ovl_refs::RefError),

    /// I/O error outside of any of the operations above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! constructors {
    ($($fn_name:ident, $fn_with:ident => $variant:ident;)*) => {
        impl RepoError {
            $(
                #[doc = concat!("A [`RepoError::", stringify!($variant), "`] without a cause.")]
                pub fn $fn_name(message: impl Into<String>) -> Self {
                    Self::$variant { message: message.into(), source: None }
                }

                #[doc = concat!("A [`RepoError::", stringify!($variant), "`] wrapping `source`.")]
                pub fn $fn_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
                    Self::$variant { message: message.into(), source: Some(source.into()) }
                }
            )*
        }
    };
}

constructors! {
    transaction, transaction_with => Transaction;
    tree_write, tree_write_with => TreeWrite;
    mtree_finalize, mtree_finalize_with => MtreeFinalize;
    commit_write, commit_write_with => CommitWrite;
    checkout, checkout_with => Checkout;
}

impl RepoError {
    /// A [`RepoError::RefResolution`] for `rev`.
    pub fn unresolved(rev: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RefResolution {
            rev: rev.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Result alias for tree store operations.
pub type RepoResult<T> = Result<T, RepoError>;
