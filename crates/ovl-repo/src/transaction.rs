use std::collections::BTreeMap;

use ovl_store::{ObjectKind, ObjectStore, StoreResult, StoredObject};
use ovl_types::ObjectId;
use tracing::warn;

use crate::lock::WriterLock;

/// Counters reported when a transaction commits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// New blobs written.
    pub content_objects_written: u64,
    /// Uncompressed bytes of those blobs.
    pub content_bytes_written: u64,
    /// All new objects written, blobs included.
    pub objects_written: u64,
    /// Branches moved on commit.
    pub refs_updated: u64,
}

/// An open write transaction.
///
/// Objects written during the transaction go straight to the object store;
/// they are unreachable until a branch names them, so an aborted transaction
/// leaves only garbage behind. Branch moves are staged here and applied by
/// `commit_transaction`. Dropping an open transaction aborts it.
#[derive(Debug)]
pub struct Transaction {
    lock: Option<WriterLock>,
    staged: BTreeMap<String, ObjectId>,
    stats: TransactionStats,
}

impl Transaction {
    pub(crate) fn new(lock: WriterLock) -> Self {
        Self {
            lock: Some(lock),
            staged: BTreeMap::new(),
            stats: TransactionStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> TransactionStats {
        self.stats
    }

    /// Branch moves that commit will apply, keyed by branch name.
    pub fn staged_refs(&self) -> &BTreeMap<String, ObjectId> {
        &self.staged
    }

    /// Write an object, counting it if it was not already stored.
    pub(crate) fn write_object(
        &mut self,
        store: &dyn ObjectStore,
        object: &StoredObject,
    ) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if store.exists(&id)? {
            return Ok(id);
        }
        store.write(object)?;
        self.stats.objects_written += 1;
        if object.kind == ObjectKind::Blob {
            self.stats.content_objects_written += 1;
            self.stats.content_bytes_written += object.size;
        }
        Ok(id)
    }

    pub(crate) fn stage_ref(&mut self, branch: &str, commit: ObjectId) {
        self.staged.insert(branch.to_string(), commit);
    }

    /// Hand back the lock and staged refs, leaving the transaction finished.
    pub(crate) fn finish(
        mut self,
    ) -> (Option<WriterLock>, BTreeMap<String, ObjectId>, TransactionStats) {
        let lock = self.lock.take();
        let staged = std::mem::take(&mut self.staged);
        (lock, staged, self.stats)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.lock.take().is_some() {
            warn!(
                staged_refs = self.staged.len(),
                objects_written = self.stats.objects_written,
                "transaction dropped while open; aborting"
            );
        }
    }
}
