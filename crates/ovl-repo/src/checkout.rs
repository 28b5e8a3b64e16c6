//! Materializing trees into a directory.

use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use ovl_store::{Blob, EntryMode, ObjectStore, Tree, TreeEntry};
use ovl_types::ObjectId;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::trace;

use crate::error::{RepoError, RepoResult};
use crate::whiteout::Whiteout;

/// How a checkout treats what is already in the target directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckoutMode {
    /// Merge into the target. Files replace files, directories merge, and
    /// whiteout entries are written out like any other file.
    Union,
    /// As [`Union`](Self::Union), but whiteout entries delete their targets
    /// and are not written.
    OverlayWhiteouts,
}

impl CheckoutMode {
    pub fn processes_whiteouts(self) -> bool {
        matches!(self, Self::OverlayWhiteouts)
    }
}

/// Counters reported by a checkout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckoutStats {
    /// Regular files, executables and symlinks written.
    pub files_written: u64,
    /// Directories created (existing ones merged into are not counted).
    pub dirs_created: u64,
    /// Whiteout entries acted on.
    pub whiteouts_applied: u64,
}

pub(crate) struct Checkout<'a> {
    store: &'a dyn ObjectStore,
    mode: CheckoutMode,
    stats: CheckoutStats,
}

impl<'a> Checkout<'a> {
    pub(crate) fn new(store: &'a dyn ObjectStore, mode: CheckoutMode) -> Self {
        Self {
            store,
            mode,
            stats: CheckoutStats::default(),
        }
    }

    /// Write the tree `root` into the existing directory `target`.
    pub(crate) fn run(mut self, root: &ObjectId, target: &Path) -> RepoResult<CheckoutStats> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(RepoError::checkout(format!(
                    "target {} is not a directory",
                    target.display()
                )))
            }
            Err(e) => {
                return Err(RepoError::checkout_with(
                    format!("target {} is not accessible", target.display()),
                    e,
                ))
            }
        }
        self.tree(root, target)?;
        Ok(self.stats)
    }

    fn tree(&mut self, id: &ObjectId, dest: &Path) -> RepoResult<()> {
        let tree = self.read_tree(id)?;

        // Whiteouts first, so they only ever remove lower-layer content.
        if self.mode.processes_whiteouts() {
            for entry in &tree.entries {
                match Whiteout::parse(&entry.name) {
                    Some(Whiteout::Opaque) => {
                        clear_dir(dest)?;
                        self.stats.whiteouts_applied += 1;
                    }
                    Some(Whiteout::Remove(name)) => {
                        remove_path(&dest.join(name))?;
                        self.stats.whiteouts_applied += 1;
                    }
                    None => {}
                }
            }
        }

        for entry in &tree.entries {
            if self.mode.processes_whiteouts() && Whiteout::parse(&entry.name).is_some() {
                continue;
            }
            self.entry(entry, &dest.join(&entry.name))?;
        }
        Ok(())
    }

    fn entry(&mut self, entry: &TreeEntry, path: &Path) -> RepoResult<()> {
        match entry.mode {
            EntryMode::Directory => {
                self.ensure_dir(path)?;
                self.tree(&entry.object_id, path)
            }
            EntryMode::Symlink => {
                let target = self.read_blob(&entry.object_id)?;
                clear_leaf_slot(path)?;
                symlink(OsStr::from_bytes(&target), path).map_err(|e| {
                    RepoError::checkout_with(format!("cannot create symlink {}", path.display()), e)
                })?;
                self.stats.files_written += 1;
                trace!(path = %path.display(), "symlink written");
                Ok(())
            }
            EntryMode::Regular | EntryMode::Executable => {
                let data = self.read_blob(&entry.object_id)?;
                clear_leaf_slot(path)?;
                write_file(path, &data, entry.mode.permissions()).map_err(|e| {
                    RepoError::checkout_with(format!("cannot write {}", path.display()), e)
                })?;
                self.stats.files_written += 1;
                trace!(path = %path.display(), "file written");
                Ok(())
            }
        }
    }

    fn ensure_dir(&mut self, path: &Path) -> RepoResult<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(RepoError::checkout(format!(
                "cannot replace non-directory {} with a directory",
                path.display()
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(path)
                    .and_then(|()| {
                        fs::set_permissions(
                            path,
                            fs::Permissions::from_mode(EntryMode::Directory.permissions()),
                        )
                    })
                    .map_err(|e| {
                        RepoError::checkout_with(
                            format!("cannot create directory {}", path.display()),
                            e,
                        )
                    })?;
                self.stats.dirs_created += 1;
                Ok(())
            }
            Err(e) => Err(RepoError::checkout_with(
                format!("cannot stat {}", path.display()),
                e,
            )),
        }
    }

    fn read_tree(&self, id: &ObjectId) -> RepoResult<Tree> {
        let object = self.store.read_required(id).map_err(|e| {
            RepoError::checkout_with(format!("cannot read tree {}", id.short_hex()), e)
        })?;
        Tree::from_stored_object(&object).map_err(|e| {
            RepoError::checkout_with(format!("object {} is not a tree", id.short_hex()), e)
        })
    }

    fn read_blob(&self, id: &ObjectId) -> RepoResult<Vec<u8>> {
        let object = self.store.read_required(id).map_err(|e| {
            RepoError::checkout_with(format!("cannot read blob {}", id.short_hex()), e)
        })?;
        Blob::from_stored_object(&object)
            .map(|blob| blob.data)
            .map_err(|e| {
                RepoError::checkout_with(format!("object {} is not a blob", id.short_hex()), e)
            })
    }
}

/// Make room for a file or symlink at `path`. An existing directory there
/// is a type clash.
fn clear_leaf_slot(path: &Path) -> RepoResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(RepoError::checkout(format!(
            "cannot replace directory {} with a file",
            path.display()
        ))),
        Ok(_) => fs::remove_file(path).map_err(|e| {
            RepoError::checkout_with(format!("cannot replace {}", path.display()), e)
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepoError::checkout_with(
            format!("cannot stat {}", path.display()),
            e,
        )),
    }
}

/// Delete whatever is at `path`, recursively. Absent paths are fine.
fn remove_path(path: &Path) -> RepoResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| {
        RepoError::checkout_with(format!("cannot apply whiteout to {}", path.display()), e)
    })?;
    trace!(path = %path.display(), "whiteout applied");
    Ok(())
}

fn clear_dir(dir: &Path) -> RepoResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        RepoError::checkout_with(format!("cannot read {}", dir.display()), e)
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            RepoError::checkout_with(format!("cannot list {}", dir.display()), e)
        })?;
        remove_path(&entry.path())?;
    }
    Ok(())
}

fn write_file(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("checkout path has no parent"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
