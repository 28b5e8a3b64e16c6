//! The disposable directory a merge is assembled in.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ErrorKind, MergeError, MergeResult};

/// An exclusively owned, freshly created directory, removed on drop.
///
/// Creation removes whatever already sits at the path, so leftovers from a
/// crashed run never leak into a new merge.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// Purge and create `<parent>/<name>`. `parent` must exist.
    pub fn create(parent: &Path, name: &str) -> MergeResult<Self> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(MergeError::new(
                ErrorKind::Merge,
                format!("invalid scratch directory name {name:?}"),
            ));
        }
        let path = parent.join(name);
        let stale = purge(&path)
            .map_err(|e| scratch_error("cannot remove stale scratch directory", &path, e))?;
        if stale {
            debug!(path = %path.display(), "stale scratch directory removed");
        }
        fs::create_dir(&path)
            .map_err(|e| scratch_error("cannot create scratch directory", &path, e))?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting failure.
    pub fn remove(mut self) -> MergeResult<()> {
        self.removed = true;
        purge(&self.path)
            .map(|_| ())
            .map_err(|e| scratch_error("cannot remove scratch directory", &self.path, e))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = purge(&self.path) {
            warn!(path = %self.path.display(), error = %e, "cannot remove scratch directory");
        }
    }
}

/// Remove `path` whatever it is. Returns whether anything was there.
fn purge(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map(|()| true),
        Ok(_) => fs::remove_file(path).map(|()| true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn scratch_error(message: &str, path: &Path, err: io::Error) -> MergeError {
    MergeError::new(ErrorKind::Merge, message)
        .with_detail(format!("{}: {err}", path.display()))
        .with_source(err)
}
