//! Recording a directory on disk into a [`MutableTree`].

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use ovl_store::{Blob, EntryMode, ObjectStore};
use ovl_types::ObjectId;
use tracing::trace;

use crate::error::{RepoError, RepoResult};
use crate::mtree::MutableTree;
use crate::transaction::Transaction;

/// Recursively store the contents of `dir` and add them to `tree`.
///
/// Regular files are stored as blobs, executable when any execute bit is
/// set. Symlinks are stored unresolved, with the link target as the blob.
/// Other file types and non-UTF-8 names are rejected.
pub(crate) fn ingest_dir(
    store: &dyn ObjectStore,
    txn: &mut Transaction,
    dir: &Path,
    tree: &mut MutableTree,
) -> RepoResult<()> {
    let read_dir = fs::read_dir(dir).map_err(|e| {
        RepoError::tree_write_with(format!("cannot read directory {}", dir.display()), e)
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|e| {
            RepoError::tree_write_with(format!("cannot list {}", dir.display()), e)
        })?;
        let path = entry.path();
        let name = entry.file_name().into_string().map_err(|raw| {
            RepoError::tree_write(format!(
                "file name {raw:?} in {} is not valid UTF-8",
                dir.display()
            ))
        })?;
        let meta = fs::symlink_metadata(&path).map_err(|e| {
            RepoError::tree_write_with(format!("cannot stat {}", path.display()), e)
        })?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            ingest_dir(store, txn, &path, tree.ensure_dir(&name))?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(|e| {
                RepoError::tree_write_with(format!("cannot read link {}", path.display()), e)
            })?;
            let blob = Blob::new(target.as_os_str().as_bytes().to_vec());
            let id = store_blob(store, txn, &path, &blob)?;
            tree.replace_leaf(&name, EntryMode::Symlink, id);
        } else if file_type.is_file() {
            let data = fs::read(&path).map_err(|e| {
                RepoError::tree_write_with(format!("cannot read {}", path.display()), e)
            })?;
            let mode = if meta.permissions().mode() & 0o111 != 0 {
                EntryMode::Executable
            } else {
                EntryMode::Regular
            };
            let id = store_blob(store, txn, &path, &Blob::new(data))?;
            tree.replace_leaf(&name, mode, id);
        } else {
            return Err(RepoError::tree_write(format!(
                "unsupported file type at {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn store_blob(
    store: &dyn ObjectStore,
    txn: &mut Transaction,
    path: &Path,
    blob: &Blob,
) -> RepoResult<ObjectId> {
    let id = txn.write_object(store, &blob.to_stored_object()).map_err(|e| {
        RepoError::tree_write_with(format!("cannot store {}", path.display()), e)
    })?;
    trace!(path = %path.display(), id = %id.short_hex(), "stored");
    Ok(id)
}
