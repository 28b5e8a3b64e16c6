//! In-memory tree builder.
//!
//! A [`MutableTree`] accumulates directory contents across any number of
//! ingestions. Later content wins: a file replaces whatever had its name, a
//! directory merges into an existing directory and replaces a file.
//! Finalizing writes one tree object per directory, bottom-up.

use std::collections::{BTreeMap, HashMap};

use ovl_store::{EntryMode, ObjectStore, Tree, TreeEntry};
use ovl_types::ObjectId;

use crate::error::{RepoError, RepoResult};
use crate::transaction::Transaction;

/// One entry of a [`MutableTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MtreeEntry {
    /// A regular file, executable or symlink already stored as a blob.
    Leaf { mode: EntryMode, object_id: ObjectId },
    /// A subdirectory still being built.
    Dir(MutableTree),
}

/// A directory under construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutableTree {
    entries: BTreeMap<String, MtreeEntry>,
}

impl MutableTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to a stored blob, replacing any previous entry.
    ///
    /// `mode` must not be [`EntryMode::Directory`]; use
    /// [`ensure_dir`](Self::ensure_dir) for that.
    pub fn replace_leaf(&mut self, name: &str, mode: EntryMode, object_id: ObjectId) {
        debug_assert!(!mode.is_dir());
        self.entries
            .insert(name.to_string(), MtreeEntry::Leaf { mode, object_id });
    }

    /// The subdirectory `name`, created empty if absent or if a leaf held
    /// the name.
    pub fn ensure_dir(&mut self, name: &str) -> &mut MutableTree {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| MtreeEntry::Dir(MutableTree::new()));
        if let MtreeEntry::Leaf { .. } = entry {
            *entry = MtreeEntry::Dir(MutableTree::new());
        }
        match entry {
            MtreeEntry::Dir(dir) => dir,
            MtreeEntry::Leaf { .. } => unreachable!("leaf replaced by directory above"),
        }
    }

    pub fn get(&self, name: &str) -> Option<&MtreeEntry> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<MtreeEntry> {
        self.entries.remove(name)
    }

    /// Entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &MtreeEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write this directory and everything under it; returns the root tree id.
    pub(crate) fn write(
        &self,
        store: &dyn ObjectStore,
        txn: &mut Transaction,
        reject_case_collisions: bool,
    ) -> RepoResult<ObjectId> {
        self.write_at(store, txn, reject_case_collisions, "")
    }

    fn write_at(
        &self,
        store: &dyn ObjectStore,
        txn: &mut Transaction,
        reject_case_collisions: bool,
        path: &str,
    ) -> RepoResult<ObjectId> {
        if reject_case_collisions {
            self.check_case_collisions(path)?;
        }
        let mut entries = Vec::with_capacity(self.entries.len());
        for (name, entry) in &self.entries {
            validate_entry_name(name).map_err(|reason| {
                RepoError::mtree_finalize(format!("invalid name {name:?} in /{path}: {reason}"))
            })?;
            let tree_entry = match entry {
                MtreeEntry::Leaf { mode, object_id } => TreeEntry::new(*mode, name, *object_id),
                MtreeEntry::Dir(dir) => {
                    let child = join(path, name);
                    let id = dir.write_at(store, txn, reject_case_collisions, &child)?;
                    TreeEntry::new(EntryMode::Directory, name, id)
                }
            };
            entries.push(tree_entry);
        }

        let tree = Tree::new(entries).to_stored_object().map_err(|e| {
            RepoError::mtree_finalize_with(format!("cannot encode tree /{path}"), e)
        })?;
        txn.write_object(store, &tree)
            .map_err(|e| RepoError::mtree_finalize_with(format!("cannot write tree /{path}"), e))
    }

    fn check_case_collisions(&self, path: &str) -> RepoResult<()> {
        let mut seen: HashMap<String, &str> = HashMap::new();
        for name in self.entries.keys() {
            if let Some(other) = seen.insert(name.to_ascii_lowercase(), name) {
                return Err(RepoError::mtree_finalize(format!(
                    "names {other:?} and {name:?} in /{path} differ only in case"
                )));
            }
        }
        Ok(())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}/{name}")
    }
}

/// Check that `name` can be a single directory entry.
pub fn validate_entry_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name == "." || name == ".." {
        return Err("reserved name");
    }
    if name.contains('/') {
        return Err("contains '/'");
    }
    if name.contains('\0') {
        return Err("contains NUL");
    }
    Ok(())
}
