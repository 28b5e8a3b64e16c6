//! Overlay commit-merge engine.
//!
//! Folds a directory of local edits, including whiteout deletion markers,
//! back into a content-addressed history of filesystem trees:
//!
//! 1. commit the edits to an isolated branch;
//! 2. check the base commit out into a fresh scratch directory (union mode);
//! 3. check the isolated branch out on top, applying whiteouts;
//! 4. commit the scratch directory under the final branch.
//!
//! The scratch directory never outlives the call, and a failed step leaves
//! no branch pointing at a partial commit.
//!
//! ```no_run
//! use std::path::Path;
//!
//! let commit = ovl_merge::union_changes(
//!     Path::new("/work/storage"),
//!     Path::new("/work/storage/changes"),
//!     Path::new("/work/storage/repo"),
//!     "custom",
//! )?;
//! println!("{commit}");
//! # Ok::<(), ovl_merge::MergeError>(())
//! ```

pub mod config;
pub mod error;
pub mod scratch;
pub mod union;

use std::path::Path;

use ovl_repo::Repo;
use ovl_types::ObjectId;

pub use config::MergeConfig;
pub use error::{ErrorKind, MergeError, MergeResult};
pub use scratch::ScratchDir;
pub use union::{commit_directory, UnionMerger};

/// Merge `edits_dir` onto the `base` branch of the repository at
/// `store_location`, committing the result as `final_branch`.
///
/// The scratch directory is created inside `storage_dir`, which must exist
/// and must not be used by another merge at the same time.
pub fn union_changes(
    storage_dir: &Path,
    edits_dir: &Path,
    store_location: &Path,
    final_branch: &str,
) -> MergeResult<ObjectId> {
    union_changes_with(
        storage_dir,
        &[edits_dir],
        store_location,
        final_branch,
        MergeConfig::default(),
    )
}

/// [`union_changes`] with several edit layers and explicit configuration.
pub fn union_changes_with<P: AsRef<Path>>(
    storage_dir: &Path,
    layers: &[P],
    store_location: &Path,
    final_branch: &str,
    config: MergeConfig,
) -> MergeResult<ObjectId> {
    let repo = Repo::open(store_location).map_err(|e| {
        MergeError::from_repo(
            format!("cannot open repository {}", store_location.display()),
            e,
        )
    })?;
    let base_ref = config.base_ref.clone();
    UnionMerger::new(&repo, storage_dir)
        .with_config(config)
        .merge_layers(&base_ref, layers, final_branch, |_| {})
}
