//! The [`RefStore`] trait defining the reference storage interface.
//!
//! Any backend (in-memory, filesystem) implements this trait to provide
//! branch management.

use crate::error::Result;
use crate::types::{Ref, HEADS_PREFIX};

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`) and provide atomic
/// read/write operations on individual refs: a reader sees either the old or
/// the new target, never a torn value. Canonical names follow the
/// `refs/heads/*` layout.
pub trait RefStore: Send + Sync {
    /// Read a ref by its canonical name (e.g. "refs/heads/main").
    ///
    /// Returns `Ok(None)` if the ref does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<Ref>>;

    /// Write (create or update) a ref at the given canonical name.
    fn write_ref(&self, name: &str, reference: &Ref) -> Result<()>;

    /// List all refs whose canonical name starts with `prefix`, sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Ref)>>;

    /// List all branch refs.
    fn branches(&self) -> Result<Vec<(String, Ref)>> {
        self.list_refs(HEADS_PREFIX)
    }
}
