//! Filesystem-backed reference store.
//!
//! Each branch is a file at `<root>/refs/heads/<name>` containing the hex
//! commit id and a trailing newline. Updates are written to a temporary file
//! in the same directory and renamed over the old ref.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ovl_types::ObjectId;
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{RefError, Result};
use crate::names::validate_branch_name;
use crate::traits::RefStore;
use crate::types::{Ref, HEADS_PREFIX};

/// On-disk implementation of [`RefStore`].
#[derive(Debug)]
pub struct FsRefStore {
    root: PathBuf,
}

impl FsRefStore {
    /// Open a ref store rooted at a repository directory, creating
    /// `refs/heads/` if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(HEADS_PREFIX))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn branch_of(name: &str) -> Result<&str> {
        let branch = name.strip_prefix(HEADS_PREFIX).ok_or_else(|| RefError::NotFound {
            name: name.to_string(),
        })?;
        validate_branch_name(branch)?;
        Ok(branch)
    }
}

impl RefStore for FsRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<Ref>> {
        let branch = match Self::branch_of(name) {
            Ok(branch) => branch,
            Err(RefError::NotFound { .. }) | Err(RefError::InvalidBranchName { .. }) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let path = self.ref_path(name);
        // A directory here means `name` is a prefix of other branches, not a
        // branch itself.
        if path.is_dir() {
            return Ok(None);
        }
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let target: ObjectId = contents.parse().map_err(|e| RefError::Corrupt {
            name: name.to_string(),
            reason: format!("{e}"),
        })?;
        Ok(Some(Ref::branch(branch, target)))
    }

    fn write_ref(&self, name: &str, reference: &Ref) -> Result<()> {
        Self::branch_of(name)?;
        validate_branch_name(&reference.name)?;

        let path = self.ref_path(name);
        let dir = path
            .parent()
            .ok_or_else(|| RefError::Io(io::Error::other("ref path has no parent")))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{}", reference.target)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| RefError::Io(e.error))?;

        debug!(name, target = %reference.target.short_hex(), "ref updated");
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Ref)>> {
        let refs_dir = self.root.join("refs");
        let mut result = Vec::new();
        for entry in WalkDir::new(&refs_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| RefError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let Some(name) = rel.to_str().map(|s| s.replace('\\', "/")) else {
                continue;
            };
            // Leftover temp files from an interrupted write are not refs.
            if !name.starts_with(prefix) || Self::branch_of(&name).is_err() {
                continue;
            }
            if let Some(reference) = self.read_ref(&name)? {
                result.push((name, reference));
            }
        }
        result.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        let target = ObjectId::from_bytes(b"commit");
        store
            .write_ref("refs/heads/isolated_changes", &Ref::branch("isolated_changes", target))
            .unwrap();

        let on_disk = fs::read_to_string(dir.path().join("refs/heads/isolated_changes")).unwrap();
        assert_eq!(on_disk, format!("{target}\n"));

        let read = store.read_ref("refs/heads/isolated_changes").unwrap().unwrap();
        assert_eq!(read.target, target);
        assert_eq!(read.name, "isolated_changes");
    }

    #[test]
    fn missing_ref_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        assert!(store.read_ref("refs/heads/nope").unwrap().is_none());
        assert!(store.read_ref("not/a/ref").unwrap().is_none());
    }

    #[test]
    fn nested_branch_prefix_is_not_a_branch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        store
            .write_ref("refs/heads/torizon/custom", &Ref::branch("torizon/custom", ObjectId::from_bytes(b"c")))
            .unwrap();
        assert!(store.read_ref("refs/heads/torizon").unwrap().is_none());
    }

    #[test]
    fn corrupt_ref_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("refs/heads/broken"), "not a hash\n").unwrap();
        assert!(matches!(
            store.read_ref("refs/heads/broken"),
            Err(RefError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_names_outside_heads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        let r = Ref::branch("main", ObjectId::from_bytes(b"c"));
        assert!(store.write_ref("config", &r).is_err());
        assert!(!dir.path().join("config").exists());
    }

    #[test]
    fn list_refs_walks_nested_branches() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRefStore::open(dir.path()).unwrap();
        for name in ["base", "torizon/custom", "isolated_changes"] {
            store
                .write_ref(&format!("refs/heads/{name}"), &Ref::branch(name, ObjectId::from_bytes(name.as_bytes())))
                .unwrap();
        }
        let names: Vec<String> = store.branches().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "refs/heads/base",
                "refs/heads/isolated_changes",
                "refs/heads/torizon/custom"
            ]
        );
    }
}
