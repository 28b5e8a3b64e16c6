use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MergeError, MergeResult};

/// Branch names and commit metadata used by a merge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Rev the edits are layered onto.
    pub base_ref: String,
    /// Branch each edit layer is committed to before being overlaid.
    pub isolated_branch: String,
    /// Name of the scratch directory inside the storage directory.
    pub scratch_name: String,
    /// Subject of the final commit.
    pub subject: Option<String>,
    /// Body of the final commit.
    pub body: Option<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            base_ref: "base".into(),
            isolated_branch: "isolated_changes".into(),
            scratch_name: "tmp_chkout_rootfs".into(),
            subject: None,
            body: None,
        }
    }
}

impl MergeConfig {
    pub fn from_toml_str(text: &str) -> MergeResult<Self> {
        toml::from_str(text).map_err(|e| {
            MergeError::new(ErrorKind::Merge, "invalid merge config")
                .with_detail(e.to_string())
                .with_source(e)
        })
    }

    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = base_ref.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}
