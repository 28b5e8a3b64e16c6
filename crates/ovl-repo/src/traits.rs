//! The [`TreeStore`] trait: the write and checkout surface the merge engine
//! drives.

use std::path::Path;

use ovl_types::ObjectId;

use crate::checkout::{CheckoutMode, CheckoutStats};
use crate::error::RepoResult;
use crate::mtree::MutableTree;
use crate::transaction::{Transaction, TransactionStats};

/// A content-addressed store of trees and commits with named branches.
///
/// Writes happen inside a [`Transaction`]. Objects written in a transaction
/// may be persisted before it commits, but branch moves become visible only
/// when [`commit_transaction`](Self::commit_transaction) succeeds. At most
/// one transaction is open per store at a time.
pub trait TreeStore {
    /// Open a write transaction. Fails with `RepoError::Transaction` if one
    /// is already open.
    fn begin_transaction(&self) -> RepoResult<Transaction>;

    /// A fresh, empty tree builder.
    fn new_tree_builder(&self) -> MutableTree {
        MutableTree::new()
    }

    /// Record the contents of `dir` into `tree`, layering over whatever the
    /// builder already holds.
    fn write_directory_into(
        &self,
        txn: &mut Transaction,
        dir: &Path,
        tree: &mut MutableTree,
    ) -> RepoResult<()>;

    /// Write out the builder's trees; returns the root tree id.
    fn finalize_tree(&self, txn: &mut Transaction, tree: &MutableTree) -> RepoResult<ObjectId>;

    /// Write a commit of `root` and return its id.
    fn write_commit(
        &self,
        txn: &mut Transaction,
        parent: Option<ObjectId>,
        subject: Option<&str>,
        body: Option<&str>,
        root: ObjectId,
    ) -> RepoResult<ObjectId>;

    /// Stage `branch` to point at `commit` when the transaction commits.
    fn set_branch(&self, txn: &mut Transaction, branch: &str, commit: ObjectId) -> RepoResult<()>;

    /// Apply staged branch moves and release the writer lock.
    fn commit_transaction(&self, txn: Transaction) -> RepoResult<TransactionStats>;

    /// Discard staged branch moves and release the writer lock.
    fn abort_transaction(&self, txn: Transaction) -> RepoResult<()>;

    /// Resolve a branch name or full commit id to a commit id.
    fn resolve_rev(&self, rev: &str) -> RepoResult<ObjectId>;

    /// Materialize `commit` into the existing directory `target`.
    fn checkout(
        &self,
        commit: &ObjectId,
        target: &Path,
        mode: CheckoutMode,
    ) -> RepoResult<CheckoutStats>;
}

impl<T: TreeStore + ?Sized> TreeStore for &T {
    fn begin_transaction(&self) -> RepoResult<Transaction> {
        (**self).begin_transaction()
    }

    fn new_tree_builder(&self) -> MutableTree {
        (**self).new_tree_builder()
    }

    fn write_directory_into(
        &self,
        txn: &mut Transaction,
        dir: &Path,
        tree: &mut MutableTree,
    ) -> RepoResult<()> {
        (**self).write_directory_into(txn, dir, tree)
    }

    fn finalize_tree(&self, txn: &mut Transaction, tree: &MutableTree) -> RepoResult<ObjectId> {
        (**self).finalize_tree(txn, tree)
    }

    fn write_commit(
        &self,
        txn: &mut Transaction,
        parent: Option<ObjectId>,
        subject: Option<&str>,
        body: Option<&str>,
        root: ObjectId,
    ) -> RepoResult<ObjectId> {
        (**self).write_commit(txn, parent, subject, body, root)
    }

    fn set_branch(&self, txn: &mut Transaction, branch: &str, commit: ObjectId) -> RepoResult<()> {
        (**self).set_branch(txn, branch, commit)
    }

    fn commit_transaction(&self, txn: Transaction) -> RepoResult<TransactionStats> {
        (**self).commit_transaction(txn)
    }

    fn abort_transaction(&self, txn: Transaction) -> RepoResult<()> {
        (**self).abort_transaction(txn)
    }

    fn resolve_rev(&self, rev: &str) -> RepoResult<ObjectId> {
        (**self).resolve_rev(rev)
    }

    fn checkout(
        &self,
        commit: &ObjectId,
        target: &Path,
        mode: CheckoutMode,
    ) -> RepoResult<CheckoutStats> {
        (**self).checkout(commit, target, mode)
    }
}
