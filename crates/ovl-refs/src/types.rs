//! Core reference types.

use serde::{Deserialize, Serialize};
use ovl_types::ObjectId;

/// Namespace under which branches live.
pub const HEADS_PREFIX: &str = "refs/heads/";

/// Canonical name of a branch (e.g. `"main"` -> `"refs/heads/main"`).
pub fn branch_ref_name(branch: &str) -> String {
    format!("{HEADS_PREFIX}{branch}")
}

/// A branch: a mutable, named pointer to a commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Short branch name (e.g. `"isolated_changes"`, `"feature/auth"`).
    pub name: String,
    /// The commit the branch currently points at.
    pub target: ObjectId,
}

impl Ref {
    /// Create a branch ref.
    pub fn branch(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Returns the canonical name for this ref (e.g. "refs/heads/main").
    pub fn canonical_name(&self) -> String {
        branch_ref_name(&self.name)
    }
}
