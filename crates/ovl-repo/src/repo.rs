use std::fs;
use std::path::{Path, PathBuf};

use ovl_refs::{
    branch_ref_name, validate_branch_name, FsRefStore, InMemoryRefStore, Ref, RefStore,
    HEADS_PREFIX,
};
use ovl_store::{
    CommitObject, FsObjectStore, InMemoryObjectStore, ObjectKind, ObjectStore, Tree, TreeEntry,
};
use ovl_types::ObjectId;
use tracing::{debug, info};

use crate::checkout::{Checkout, CheckoutMode, CheckoutStats};
use crate::config::RepoConfig;
use crate::error::{RepoError, RepoResult};
use crate::ingest::ingest_dir;
use crate::lock::WriterSlot;
use crate::mtree::MutableTree;
use crate::traits::TreeStore;
use crate::transaction::{Transaction, TransactionStats};

/// Name of the config file inside a repository.
pub const CONFIG_FILE: &str = "config";
/// Name of the object directory inside a repository.
pub const OBJECTS_DIR: &str = "objects";
/// Name of the writer lock file inside a repository.
pub const LOCK_FILE: &str = "transaction.lock";

/// A repository: an object store, a ref store and a writer lock.
///
/// ```text
/// <path>/config            TOML RepoConfig
/// <path>/objects/ab/cdef…  loose objects
/// <path>/refs/heads/<br>   branch tips
/// <path>/transaction.lock  present while a transaction is open
/// ```
pub struct Repo {
    path: Option<PathBuf>,
    config: RepoConfig,
    objects: Box<dyn ObjectStore>,
    refs: Box<dyn RefStore>,
    writer: WriterSlot,
}

impl Repo {
    /// Create a new repository at `path`.
    pub fn create(path: &Path, config: RepoConfig) -> RepoResult<Self> {
        let config_path = path.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(RepoError::AlreadyExists(path.to_path_buf()));
        }
        fs::create_dir_all(path)?;
        config.save(&config_path)?;
        info!(path = %path.display(), mode = ?config.mode, "repository created");
        Self::open(path)
    }

    /// Open an existing repository.
    pub fn open(path: &Path) -> RepoResult<Self> {
        let config_path = path.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(RepoError::NotARepository(path.to_path_buf()));
        }
        let config = RepoConfig::load(&config_path)?;
        let objects = FsObjectStore::open(&path.join(OBJECTS_DIR), config.compression())?;
        let refs = FsRefStore::open(path)?;
        debug!(path = %path.display(), "repository opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            objects: Box::new(objects),
            refs: Box::new(refs),
            writer: WriterSlot::File(path.join(LOCK_FILE)),
            config,
        })
    }

    /// A repository held entirely in memory.
    pub fn in_memory() -> Self {
        Self::in_memory_with(RepoConfig::default())
    }

    /// An in-memory repository with the given config.
    pub fn in_memory_with(config: RepoConfig) -> Self {
        Self {
            path: None,
            config,
            objects: Box::new(InMemoryObjectStore::new()),
            refs: Box::new(InMemoryRefStore::new()),
            writer: WriterSlot::memory(),
        }
    }

    /// The repository directory; `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    /// Read a commit object.
    pub fn read_commit(&self, id: &ObjectId) -> RepoResult<CommitObject> {
        let object = self.objects.read_required(id)?;
        Ok(CommitObject::from_stored_object(&object)?)
    }

    /// Read a tree object.
    pub fn read_tree(&self, id: &ObjectId) -> RepoResult<Tree> {
        let object = self.objects.read_required(id)?;
        Ok(Tree::from_stored_object(&object)?)
    }

    /// Branches and their tips, sorted by name.
    pub fn branches(&self) -> RepoResult<Vec<Ref>> {
        Ok(self
            .refs
            .branches()?
            .into_iter()
            .map(|(_, reference)| reference)
            .collect())
    }

    /// Entries of the directory at `path` (slash separated, relative to the
    /// root) in `commit`. A path naming a non-directory yields that entry.
    pub fn ls(&self, commit: &ObjectId, path: &str) -> RepoResult<Vec<TreeEntry>> {
        let mut tree = self.read_tree(&self.read_commit(commit)?.tree)?;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let entry = tree.get(component).cloned().ok_or_else(|| {
                RepoError::unresolved(path, format!("no entry {component:?}"))
            })?;
            if !entry.mode.is_dir() {
                if components.peek().is_some() {
                    return Err(RepoError::unresolved(
                        path,
                        format!("{component:?} is not a directory"),
                    ));
                }
                return Ok(vec![entry]);
            }
            tree = self.read_tree(&entry.object_id)?;
        }
        Ok(tree.entries)
    }

    /// Every path in `commit`, depth first in name order, with its entry.
    pub fn walk(&self, commit: &ObjectId) -> RepoResult<Vec<(String, TreeEntry)>> {
        let mut out = Vec::new();
        let root = self.read_commit(commit)?.tree;
        self.walk_tree(&root, "", &mut out)?;
        Ok(out)
    }

    fn walk_tree(
        &self,
        id: &ObjectId,
        prefix: &str,
        out: &mut Vec<(String, TreeEntry)>,
    ) -> RepoResult<()> {
        for entry in self.read_tree(id)?.entries {
            let path = format!("{prefix}{}", entry.name);
            let subtree = entry.mode.is_dir().then_some(entry.object_id);
            out.push((path.clone(), entry));
            if let Some(subtree) = subtree {
                self.walk_tree(&subtree, &format!("{path}/"), out)?;
            }
        }
        Ok(())
    }

    fn object_kind(&self, id: &ObjectId) -> RepoResult<Option<ObjectKind>> {
        Ok(self.objects.read(id)?.map(|object| object.kind))
    }
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TreeStore for Repo {
    fn begin_transaction(&self) -> RepoResult<Transaction> {
        let lock = self.writer.acquire()?;
        debug!("transaction started");
        Ok(Transaction::new(lock))
    }

    fn write_directory_into(
        &self,
        txn: &mut Transaction,
        dir: &Path,
        tree: &mut MutableTree,
    ) -> RepoResult<()> {
        ingest_dir(self.objects(), txn, dir, tree)?;
        debug!(dir = %dir.display(), entries = tree.len(), "directory recorded");
        Ok(())
    }

    fn finalize_tree(&self, txn: &mut Transaction, tree: &MutableTree) -> RepoResult<ObjectId> {
        let id = tree.write(self.objects(), txn, self.config.reject_case_collisions)?;
        debug!(tree = %id.short_hex(), "tree finalized");
        Ok(id)
    }

    fn write_commit(
        &self,
        txn: &mut Transaction,
        parent: Option<ObjectId>,
        subject: Option<&str>,
        body: Option<&str>,
        root: ObjectId,
    ) -> RepoResult<ObjectId> {
        let wrap = |e: RepoError| RepoError::commit_write_with("cannot inspect commit inputs", e);
        if self.object_kind(&root).map_err(wrap)? != Some(ObjectKind::Tree) {
            return Err(RepoError::commit_write(format!(
                "root {} is not a stored tree",
                root.short_hex()
            )));
        }
        if let Some(parent) = parent {
            if self.object_kind(&parent).map_err(wrap)? != Some(ObjectKind::Commit) {
                return Err(RepoError::commit_write(format!(
                    "parent {} is not a stored commit",
                    parent.short_hex()
                )));
            }
        }

        let commit = CommitObject {
            tree: root,
            parent,
            subject: subject.map(str::to_string),
            body: body.map(str::to_string),
            timestamp: chrono::Utc::now().timestamp(),
        };
        let object = commit
            .to_stored_object()
            .map_err(|e| RepoError::commit_write_with("cannot encode commit", e))?;
        let id = txn
            .write_object(self.objects(), &object)
            .map_err(|e| RepoError::commit_write_with("cannot store commit", e))?;
        debug!(commit = %id.short_hex(), tree = %root.short_hex(), "commit written");
        Ok(id)
    }

    fn set_branch(&self, txn: &mut Transaction, branch: &str, commit: ObjectId) -> RepoResult<()> {
        validate_branch_name(branch).map_err(|e| {
            RepoError::transaction_with(format!("cannot stage branch {branch:?}"), e)
        })?;
        if self.object_kind(&commit)? != Some(ObjectKind::Commit) {
            return Err(RepoError::transaction(format!(
                "cannot stage branch {branch:?}: {} is not a stored commit",
                commit.short_hex()
            )));
        }
        txn.stage_ref(branch, commit);
        Ok(())
    }

    fn commit_transaction(&self, txn: Transaction) -> RepoResult<TransactionStats> {
        let (lock, staged, mut stats) = txn.finish();
        for (branch, commit) in &staged {
            self.refs
                .write_ref(&branch_ref_name(branch), &Ref::branch(branch, *commit))
                .map_err(|e| {
                    RepoError::transaction_with(format!("cannot update branch {branch:?}"), e)
                })?;
            stats.refs_updated += 1;
            debug!(branch = %branch, commit = %commit.short_hex(), "branch updated");
        }
        if let Some(lock) = lock {
            lock.release()?;
        }
        info!(
            objects = stats.objects_written,
            content_objects = stats.content_objects_written,
            content_bytes = stats.content_bytes_written,
            refs = stats.refs_updated,
            "transaction committed"
        );
        Ok(stats)
    }

    fn abort_transaction(&self, txn: Transaction) -> RepoResult<()> {
        let (lock, staged, _) = txn.finish();
        if let Some(lock) = lock {
            lock.release()?;
        }
        debug!(discarded_refs = staged.len(), "transaction aborted");
        Ok(())
    }

    fn resolve_rev(&self, rev: &str) -> RepoResult<ObjectId> {
        let branch = rev.strip_prefix(HEADS_PREFIX).unwrap_or(rev);
        if validate_branch_name(branch).is_ok() {
            let found = self.refs.read_ref(&branch_ref_name(branch)).map_err(|e| {
                RepoError::RefResolution {
                    rev: rev.to_string(),
                    message: "cannot read branch".into(),
                    source: Some(e.into()),
                }
            })?;
            if let Some(reference) = found {
                return Ok(reference.target);
            }
        }

        if ObjectId::looks_like_hex(rev) {
            let id = ObjectId::from_hex(rev).map_err(|e| RepoError::RefResolution {
                rev: rev.to_string(),
                message: "malformed commit id".into(),
                source: Some(e.into()),
            })?;
            let kind = self.object_kind(&id).map_err(|e| RepoError::RefResolution {
                rev: rev.to_string(),
                message: "cannot read object".into(),
                source: Some(e.into()),
            })?;
            return match kind {
                Some(ObjectKind::Commit) => Ok(id),
                Some(kind) => Err(RepoError::unresolved(rev, format!("object is a {kind}"))),
                None => Err(RepoError::unresolved(rev, "no such commit")),
            };
        }

        Err(RepoError::unresolved(rev, "no such branch"))
    }

    fn checkout(
        &self,
        commit: &ObjectId,
        target: &Path,
        mode: CheckoutMode,
    ) -> RepoResult<CheckoutStats> {
        let root = self
            .read_commit(commit)
            .map_err(|e| {
                RepoError::checkout_with(format!("cannot read commit {}", commit.short_hex()), e)
            })?
            .tree;
        let stats = Checkout::new(self.objects(), mode).run(&root, target)?;
        info!(
            commit = %commit.short_hex(),
            target = %target.display(),
            ?mode,
            files = stats.files_written,
            dirs = stats.dirs_created,
            whiteouts = stats.whiteouts_applied,
            "checkout complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovl_store::{Blob, EntryMode};

    fn commit_dir(repo: &Repo, dir: &Path, branch: &str) -> ObjectId {
        let mut txn = repo.begin_transaction().unwrap();
        let mut tree = repo.new_tree_builder();
        repo.write_directory_into(&mut txn, dir, &mut tree).unwrap();
        let root = repo.finalize_tree(&mut txn, &tree).unwrap();
        let commit = repo
            .write_commit(&mut txn, None, Some("subject"), None, root)
            .unwrap();
        repo.set_branch(&mut txn, branch, commit).unwrap();
        repo.commit_transaction(txn).unwrap();
        commit
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/hostname"), b"device\n").unwrap();
        fs::write(dir.path().join("README"), b"readme").unwrap();
        dir
    }

    #[test]
    fn create_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo");
        Repo::create(&path, RepoConfig::bare()).unwrap();
        assert!(path.join(CONFIG_FILE).is_file());
        assert!(path.join("refs/heads").is_dir());

        let repo = Repo::open(&path).unwrap();
        assert_eq!(repo.config(), &RepoConfig::bare());
        assert_eq!(repo.path(), Some(path.as_path()));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        Repo::create(dir.path(), RepoConfig::default()).unwrap();
        assert!(matches!(
            Repo::create(dir.path(), RepoConfig::default()),
            Err(RepoError::AlreadyExists(_))
        ));
    }

    #[test]
    fn open_non_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Repo::open(dir.path()),
            Err(RepoError::NotARepository(_))
        ));
    }

    #[test]
    fn commit_and_resolve_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::create(&dir.path().join("repo"), RepoConfig::default()).unwrap();
        let src = sample_dir();
        let commit = commit_dir(&repo, src.path(), "base");

        assert_eq!(repo.resolve_rev("base").unwrap(), commit);
        assert_eq!(repo.resolve_rev("refs/heads/base").unwrap(), commit);
        assert_eq!(repo.resolve_rev(&commit.to_hex()).unwrap(), commit);

        let object = repo.read_commit(&commit).unwrap();
        assert_eq!(object.subject.as_deref(), Some("subject"));
        assert_eq!(object.parent, None);

        let reopened = Repo::open(repo.path().unwrap()).unwrap();
        assert_eq!(reopened.resolve_rev("base").unwrap(), commit);
        assert!(!repo.path().unwrap().join(LOCK_FILE).exists());
    }

    #[test]
    fn unknown_rev_fails_to_resolve() {
        let repo = Repo::in_memory();
        let src = sample_dir();
        let commit = commit_dir(&repo, src.path(), "base");
        let tree = repo.read_commit(&commit).unwrap().tree;

        let unknown = ObjectId::from_bytes(b"x").to_hex();
        let tree = tree.to_hex();
        for rev in ["missing", "bad..name", unknown.as_str(), tree.as_str()] {
            assert!(
                matches!(repo.resolve_rev(rev), Err(RepoError::RefResolution { .. })),
                "{rev}"
            );
        }
        assert!(repo.resolve_rev(&commit.short_hex()).is_err());
    }

    #[test]
    fn second_transaction_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repo::create(dir.path(), RepoConfig::default()).unwrap();
        let txn = repo.begin_transaction().unwrap();
        assert!(matches!(
            repo.begin_transaction(),
            Err(RepoError::Transaction { .. })
        ));
        repo.abort_transaction(txn).unwrap();
        repo.begin_transaction().unwrap();
    }

    #[test]
    fn branch_is_invisible_until_commit() {
        let repo = Repo::in_memory();
        let src = sample_dir();
        let mut txn = repo.begin_transaction().unwrap();
        let mut tree = repo.new_tree_builder();
        repo.write_directory_into(&mut txn, src.path(), &mut tree).unwrap();
        let root = repo.finalize_tree(&mut txn, &tree).unwrap();
        let commit = repo.write_commit(&mut txn, None, None, None, root).unwrap();
        repo.set_branch(&mut txn, "main", commit).unwrap();

        assert!(repo.resolve_rev("main").is_err());
        let stats = repo.commit_transaction(txn).unwrap();
        assert_eq!(repo.resolve_rev("main").unwrap(), commit);
        assert_eq!(stats.refs_updated, 1);
        assert_eq!(stats.content_objects_written, 2);
    }

    #[test]
    fn abort_and_drop_discard_branch_moves() {
        let repo = Repo::in_memory();
        let src = sample_dir();
        let first = commit_dir(&repo, src.path(), "main");

        let mut txn = repo.begin_transaction().unwrap();
        let root = repo.finalize_tree(&mut txn, &MutableTree::new()).unwrap();
        let other = repo.write_commit(&mut txn, None, None, None, root).unwrap();
        repo.set_branch(&mut txn, "main", other).unwrap();
        repo.abort_transaction(txn).unwrap();
        assert_eq!(repo.resolve_rev("main").unwrap(), first);

        let mut txn = repo.begin_transaction().unwrap();
        repo.set_branch(&mut txn, "main", other).unwrap();
        drop(txn);
        assert_eq!(repo.resolve_rev("main").unwrap(), first);
    }

    #[test]
    fn write_commit_checks_inputs() {
        let repo = Repo::in_memory();
        let mut txn = repo.begin_transaction().unwrap();
        let blob = repo
            .objects()
            .write(&Blob::new(b"not a tree".to_vec()).to_stored_object())
            .unwrap();
        assert!(matches!(
            repo.write_commit(&mut txn, None, None, None, blob),
            Err(RepoError::CommitWrite { .. })
        ));

        let root = repo.finalize_tree(&mut txn, &MutableTree::new()).unwrap();
        assert!(matches!(
            repo.write_commit(&mut txn, Some(root), None, None, root),
            Err(RepoError::CommitWrite { .. })
        ));
        let first = repo.write_commit(&mut txn, None, None, None, root).unwrap();
        let second = repo
            .write_commit(&mut txn, Some(first), Some("s"), Some("b"), root)
            .unwrap();
        let object = repo.read_commit(&second).unwrap();
        assert_eq!(object.parent, Some(first));
        assert_eq!(object.body.as_deref(), Some("b"));
    }

    #[test]
    fn set_branch_rejects_bad_names_and_non_commits() {
        let repo = Repo::in_memory();
        let mut txn = repo.begin_transaction().unwrap();
        let root = repo.finalize_tree(&mut txn, &MutableTree::new()).unwrap();
        let commit = repo.write_commit(&mut txn, None, None, None, root).unwrap();
        assert!(repo.set_branch(&mut txn, "bad name", commit).is_err());
        assert!(repo.set_branch(&mut txn, "tree", root).is_err());
        assert!(txn.staged_refs().is_empty());
    }

    #[test]
    fn checkout_round_trips_directory() {
        let repo = Repo::in_memory_with(RepoConfig::bare());
        let src = sample_dir();
        let commit = commit_dir(&repo, src.path(), "base");
        let out = tempfile::tempdir().unwrap();

        let stats = repo.checkout(&commit, out.path(), CheckoutMode::Union).unwrap();
        assert_eq!(stats.files_written, 2);
        assert_eq!(stats.dirs_created, 1);
        assert_eq!(fs::read(out.path().join("etc/hostname")).unwrap(), b"device\n");
    }

    #[test]
    fn ls_and_walk() {
        let repo = Repo::in_memory();
        let src = sample_dir();
        let commit = commit_dir(&repo, src.path(), "base");

        let root: Vec<_> = repo.ls(&commit, "").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(root, ["README", "etc"]);
        let etc = repo.ls(&commit, "/etc").unwrap();
        assert_eq!(etc.len(), 1);
        assert_eq!(etc[0].mode, EntryMode::Regular);
        assert_eq!(repo.ls(&commit, "etc/hostname").unwrap()[0].name, "hostname");
        assert!(repo.ls(&commit, "etc/hostname/x").is_err());
        assert!(repo.ls(&commit, "nope").is_err());

        let paths: Vec<_> = repo.walk(&commit).unwrap().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["README", "etc", "etc/hostname"]);
    }

    #[test]
    fn same_content_same_tree_id() {
        let repo = Repo::in_memory();
        let a = sample_dir();
        let b = sample_dir();
        let first = commit_dir(&repo, a.path(), "a");
        let second = commit_dir(&repo, b.path(), "b");
        assert_eq!(
            repo.read_commit(&first).unwrap().tree,
            repo.read_commit(&second).unwrap().tree
        );
    }
}
