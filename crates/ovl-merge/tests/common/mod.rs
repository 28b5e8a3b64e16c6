//! Shared fixtures for merge integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use ovl_merge::UnionMerger;
use ovl_repo::{
    CheckoutMode, CheckoutStats, MutableTree, Repo, RepoConfig, RepoError, RepoResult,
    Transaction, TransactionStats, TreeStore,
};
use ovl_store::{EntryMode, ObjectStore};
use ovl_types::ObjectId;

/// A repository on disk plus a storage directory for scratch checkouts.
pub struct Workspace {
    pub root: tempfile::TempDir,
    pub repo: Repo,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("storage")).unwrap();
        let repo = Repo::create(&root.path().join("repo"), RepoConfig::default()).unwrap();
        Self { root, repo }
    }

    pub fn storage(&self) -> std::path::PathBuf {
        self.root.path().join("storage")
    }

    pub fn repo_path(&self) -> std::path::PathBuf {
        self.root.path().join("repo")
    }

    pub fn scratch(&self) -> std::path::PathBuf {
        self.storage().join("tmp_chkout_rootfs")
    }

    pub fn merger(&self) -> UnionMerger<&Repo> {
        UnionMerger::new(&self.repo, self.storage())
    }

    /// Commit a directory built from `files` as the `base` branch.
    pub fn commit_base(&self, files: &[(&str, &str)]) -> ObjectId {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), files);
        self.merger()
            .commit_directory(dir.path(), "base", None, None)
            .unwrap()
    }

    /// Root tree id of the commit `rev` resolves to.
    pub fn tree_of(&self, rev: &str) -> ObjectId {
        let commit = self.repo.resolve_rev(rev).unwrap();
        self.repo.read_commit(&commit).unwrap().tree
    }

    /// Every path in `rev` with its mode and, for leaves, content.
    pub fn listing(&self, rev: &str) -> BTreeMap<String, Node> {
        let commit = self.repo.resolve_rev(rev).unwrap();
        self.repo
            .walk(&commit)
            .unwrap()
            .into_iter()
            .map(|(path, entry)| {
                let node = match entry.mode {
                    EntryMode::Directory => Node::Dir,
                    EntryMode::Symlink => Node::Symlink(blob_text(&self.repo, &entry.object_id)),
                    _ => Node::File(blob_text(&self.repo, &entry.object_id)),
                };
                (path, node)
            })
            .collect()
    }
}

fn blob_text(repo: &Repo, id: &ObjectId) -> String {
    let object = repo.objects().read_required(id).unwrap();
    String::from_utf8(ovl_store::Blob::from_stored_object(&object).unwrap().data).unwrap()
}

/// What a path holds, for comparing trees and directories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Dir,
    File(String),
    Symlink(String),
}

/// Create files (and their parent directories) under `dir`. A path ending
/// in `/` creates an empty directory; content starting with `->` makes a
/// symlink; content starting with `#!` makes an executable.
pub fn populate(dir: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = dir.join(path.trim_end_matches('/'));
        if path.ends_with('/') {
            fs::create_dir_all(&full).unwrap();
            continue;
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        if let Some(target) = content.strip_prefix("->") {
            std::os::unix::fs::symlink(target, &full).unwrap();
        } else {
            fs::write(&full, content).unwrap();
            if content.starts_with("#!") {
                fs::set_permissions(&full, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
    }
}

/// A directory holding `files`.
pub fn edits(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path(), files);
    dir
}

/// Everything under `dir`, keyed by relative path.
pub fn snapshot(dir: &Path) -> BTreeMap<String, Node> {
    let mut out = BTreeMap::new();
    snapshot_into(dir, dir, &mut out);
    out
}

fn snapshot_into(root: &Path, dir: &Path, out: &mut BTreeMap<String, Node>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
        let file_type = fs::symlink_metadata(&path).unwrap().file_type();
        if file_type.is_dir() {
            out.insert(rel, Node::Dir);
            snapshot_into(root, &path, out);
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).unwrap();
            out.insert(rel, Node::Symlink(target.to_string_lossy().into_owned()));
        } else {
            out.insert(rel, Node::File(fs::read_to_string(&path).unwrap()));
        }
    }
}

/// Tree store operations a [`FaultyStore`] can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Begin,
    WriteDirectory,
    Finalize,
    WriteCommit,
    SetBranch,
    CommitTransaction,
    ResolveRev,
    Checkout,
}

/// Delegates to a [`Repo`], failing the `nth` call (1-based) of one
/// operation.
pub struct FaultyStore<'a> {
    inner: &'a Repo,
    fail: Option<(Op, usize)>,
    calls: RefCell<HashMap<Op, usize>>,
}

impl<'a> FaultyStore<'a> {
    pub fn new(inner: &'a Repo, op: Op, nth: usize) -> Self {
        Self {
            inner,
            fail: Some((op, nth)),
            calls: RefCell::new(HashMap::new()),
        }
    }

    pub fn passthrough(inner: &'a Repo) -> Self {
        Self {
            inner,
            fail: None,
            calls: RefCell::new(HashMap::new()),
        }
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.borrow().get(&op).copied().unwrap_or(0)
    }

    /// Count the call and report whether it should fail.
    fn trip(&self, op: Op) -> bool {
        let mut calls = self.calls.borrow_mut();
        let count = calls.entry(op).or_insert(0);
        *count += 1;
        self.fail == Some((op, *count))
    }
}

impl TreeStore for FaultyStore<'_> {
    fn begin_transaction(&self) -> RepoResult<Transaction> {
        if self.trip(Op::Begin) {
            return Err(RepoError::transaction("injected: begin"));
        }
        self.inner.begin_transaction()
    }

    fn new_tree_builder(&self) -> MutableTree {
        self.inner.new_tree_builder()
    }

    fn write_directory_into(
        &self,
        txn: &mut Transaction,
        dir: &Path,
        tree: &mut MutableTree,
    ) -> RepoResult<()> {
        if self.trip(Op::WriteDirectory) {
            return Err(RepoError::tree_write("injected: write directory"));
        }
        self.inner.write_directory_into(txn, dir, tree)
    }

    fn finalize_tree(&self, txn: &mut Transaction, tree: &MutableTree) -> RepoResult<ObjectId> {
        if self.trip(Op::Finalize) {
            return Err(RepoError::mtree_finalize("injected: finalize"));
        }
        self.inner.finalize_tree(txn, tree)
    }

    fn write_commit(
        &self,
        txn: &mut Transaction,
        parent: Option<ObjectId>,
        subject: Option<&str>,
        body: Option<&str>,
        root: ObjectId,
    ) -> RepoResult<ObjectId> {
        if self.trip(Op::WriteCommit) {
            return Err(RepoError::commit_write("injected: write commit"));
        }
        self.inner.write_commit(txn, parent, subject, body, root)
    }

    fn set_branch(&self, txn: &mut Transaction, branch: &str, commit: ObjectId) -> RepoResult<()> {
        if self.trip(Op::SetBranch) {
            return Err(RepoError::transaction("injected: set branch"));
        }
        self.inner.set_branch(txn, branch, commit)
    }

    fn commit_transaction(&self, txn: Transaction) -> RepoResult<TransactionStats> {
        if self.trip(Op::CommitTransaction) {
            self.inner.abort_transaction(txn)?;
            return Err(RepoError::transaction("injected: commit transaction"));
        }
        self.inner.commit_transaction(txn)
    }

    fn abort_transaction(&self, txn: Transaction) -> RepoResult<()> {
        self.inner.abort_transaction(txn)
    }

    fn resolve_rev(&self, rev: &str) -> RepoResult<ObjectId> {
        if self.trip(Op::ResolveRev) {
            return Err(RepoError::unresolved(rev, "injected"));
        }
        self.inner.resolve_rev(rev)
    }

    fn checkout(
        &self,
        commit: &ObjectId,
        target: &Path,
        mode: CheckoutMode,
    ) -> RepoResult<CheckoutStats> {
        if self.trip(Op::Checkout) {
            return Err(RepoError::checkout("injected: checkout"));
        }
        self.inner.checkout(commit, target, mode)
    }
}
