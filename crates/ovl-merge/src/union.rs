//! Folding edit directories onto a base commit.

use std::path::{Path, PathBuf};

use ovl_repo::{CheckoutMode, Transaction, TreeStore};
use ovl_types::ObjectId;
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::{ErrorKind, MergeError, MergeResult};
use crate::scratch::ScratchDir;

/// Merges edit directories onto a base commit through a scratch checkout.
///
/// Each merge commits the edits to the isolated branch, checks the base out
/// into `<storage_dir>/<scratch_name>` in union mode, overlays the isolated
/// branch with whiteouts applied, and commits the result under the final
/// branch. The scratch directory is removed on every exit path.
#[derive(Debug)]
pub struct UnionMerger<S> {
    store: S,
    storage_dir: PathBuf,
    config: MergeConfig,
}

impl<S: TreeStore> UnionMerger<S> {
    /// A merger with default branch names, assembling merges under
    /// `storage_dir`.
    pub fn new(store: S, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            storage_dir: storage_dir.into(),
            config: MergeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Commit the contents of `dir` under `branch`; see [`commit_directory`].
    pub fn commit_directory(
        &self,
        dir: &Path,
        branch: &str,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> MergeResult<ObjectId> {
        commit_directory(&self.store, dir, branch, subject, body)
    }

    /// Merge one edits directory onto `base_ref`; returns the commit now at
    /// `final_branch`.
    pub fn merge(
        &self,
        base_ref: &str,
        edits_dir: &Path,
        final_branch: &str,
    ) -> MergeResult<ObjectId> {
        self.merge_layers(base_ref, &[edits_dir], final_branch, |_| {})
    }

    /// Merge several edit directories onto `base_ref`, in order, so later
    /// layers win. `pre_apply` runs before each layer is committed and
    /// overlaid.
    pub fn merge_layers<P, F>(
        &self,
        base_ref: &str,
        layers: &[P],
        final_branch: &str,
        mut pre_apply: F,
    ) -> MergeResult<ObjectId>
    where
        P: AsRef<Path>,
        F: FnMut(&Path),
    {
        let Some((first, rest)) = layers.split_first() else {
            return Err(MergeError::new(
                ErrorKind::Merge,
                "no changes directories to merge",
            ));
        };
        if !self.storage_dir.is_dir() {
            return Err(MergeError::new(
                ErrorKind::Merge,
                format!(
                    "storage directory {} does not exist",
                    self.storage_dir.display()
                ),
            ));
        }

        pre_apply(first.as_ref());
        self.commit_layer(first.as_ref())?;

        let scratch = ScratchDir::create(&self.storage_dir, &self.config.scratch_name)?;
        self.checkout_base(base_ref, scratch.path())?;
        self.overlay_isolated(scratch.path())?;

        for layer in rest {
            pre_apply(layer.as_ref());
            self.commit_layer(layer.as_ref())?;
            self.overlay_isolated(scratch.path())?;
        }

        let commit = self.commit_directory(
            scratch.path(),
            final_branch,
            self.config.subject.as_deref(),
            self.config.body.as_deref(),
        )?;
        scratch.remove()?;

        info!(
            base = base_ref,
            branch = final_branch,
            layers = layers.len(),
            commit = %commit,
            "merge complete"
        );
        Ok(commit)
    }

    fn commit_layer(&self, layer: &Path) -> MergeResult<ObjectId> {
        info!(layer = %layer.display(), "applying changes");
        self.commit_directory(layer, &self.config.isolated_branch, None, None)
            .map_err(|e| prefix(e, "cannot commit changes"))
    }

    fn checkout_base(&self, base_ref: &str, scratch: &Path) -> MergeResult<()> {
        let base = self
            .store
            .resolve_rev(base_ref)
            .map_err(|e| MergeError::from_repo(format!("cannot resolve base {base_ref}"), e))?;
        debug!(base = base_ref, commit = %base.short_hex(), "checking out base");
        self.store
            .checkout(&base, scratch, CheckoutMode::Union)
            .map_err(|e| MergeError::from_repo("cannot check out base tree", e))?;
        Ok(())
    }

    fn overlay_isolated(&self, scratch: &Path) -> MergeResult<()> {
        let branch = &self.config.isolated_branch;
        let changes = self
            .store
            .resolve_rev(branch)
            .map_err(|e| MergeError::from_repo(format!("cannot resolve {branch}"), e))?;
        debug!(branch = %branch, commit = %changes.short_hex(), "overlaying changes");
        self.store
            .checkout(&changes, scratch, CheckoutMode::OverlayWhiteouts)
            .map_err(|e| MergeError::from_repo("cannot check out changes", e))?;
        Ok(())
    }
}

/// Commit the contents of `dir` as a new root commit and point `branch` at
/// it, all in one transaction.
///
/// A failure after the transaction opens aborts it before the error is
/// returned, so `branch` is either untouched or names the new commit.
pub fn commit_directory<S: TreeStore + ?Sized>(
    store: &S,
    dir: &Path,
    branch: &str,
    subject: Option<&str>,
    body: Option<&str>,
) -> MergeResult<ObjectId> {
    debug!(dir = %dir.display(), branch, "committing directory");
    let mut txn = store
        .begin_transaction()
        .map_err(|e| MergeError::from_repo("cannot start transaction", e))?;

    let commit = match stage_commit(store, &mut txn, dir, branch, subject, body) {
        Ok(commit) => commit,
        Err(err) => {
            if let Err(abort) = store.abort_transaction(txn) {
                warn!(error = %abort, "cannot abort transaction");
            }
            return Err(err);
        }
    };

    let stats = store
        .commit_transaction(txn)
        .map_err(|e| MergeError::from_repo("cannot commit transaction", e))?;
    debug!(
        branch,
        commit = %commit.short_hex(),
        content_bytes = stats.content_bytes_written,
        content_objects = stats.content_objects_written,
        "transaction committed"
    );
    Ok(commit)
}

fn stage_commit<S: TreeStore + ?Sized>(
    store: &S,
    txn: &mut Transaction,
    dir: &Path,
    branch: &str,
    subject: Option<&str>,
    body: Option<&str>,
) -> MergeResult<ObjectId> {
    let mut tree = store.new_tree_builder();
    store
        .write_directory_into(txn, dir, &mut tree)
        .map_err(|e| MergeError::from_repo(format!("cannot add {} to commit", dir.display()), e))?;
    let root = store
        .finalize_tree(txn, &tree)
        .map_err(|e| MergeError::from_repo("cannot write tree", e))?;
    let commit = store
        .write_commit(txn, None, subject, body, root)
        .map_err(|e| MergeError::from_repo("cannot write commit", e))?;
    store
        .set_branch(txn, branch, commit)
        .map_err(|e| MergeError::from_repo(format!("cannot set branch {branch}"), e))?;
    Ok(commit)
}

fn prefix(err: MergeError, context: &str) -> MergeError {
    let detail = match err.detail() {
        Some(detail) => format!("{}: {detail}", err.message()),
        None => err.message().to_string(),
    };
    MergeError::new(err.kind(), context)
        .with_detail(detail)
        .with_source(err)
}
