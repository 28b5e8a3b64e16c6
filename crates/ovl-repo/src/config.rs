//! On-disk repository configuration (`<repo>/config`, TOML).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// Current repository format version.
pub const REPO_FORMAT_VERSION: u32 = 1;

/// How objects are laid out on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoMode {
    /// zstd-compressed objects. Suited to storing and shipping images.
    #[default]
    Archive,
    /// Uncompressed objects.
    Bare,
}

/// Repository configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Format version. Only [`REPO_FORMAT_VERSION`] is understood.
    pub version: u32,
    /// Object layout.
    pub mode: RepoMode,
    /// zstd level used in [`RepoMode::Archive`].
    pub compression_level: i32,
    /// Refuse to finalize a directory holding two names that differ only in
    /// ASCII case. Useful when checkouts land on case-insensitive filesystems.
    pub reject_case_collisions: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            version: REPO_FORMAT_VERSION,
            mode: RepoMode::Archive,
            compression_level: 3,
            reject_case_collisions: false,
        }
    }
}

impl RepoConfig {
    /// A configuration storing uncompressed objects.
    pub fn bare() -> Self {
        Self {
            mode: RepoMode::Bare,
            ..Default::default()
        }
    }

    /// The zstd level handed to the object store, if any.
    pub fn compression(&self) -> Option<i32> {
        match self.mode {
            RepoMode::Archive => Some(self.compression_level),
            RepoMode::Bare => None,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| RepoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as TOML.
    pub fn to_toml_string(&self) -> RepoResult<String> {
        toml::to_string_pretty(self).map_err(|e| RepoError::Config(e.to_string()))
    }

    /// Load from a file.
    pub fn load(path: &Path) -> RepoResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Write to a file.
    pub fn save(&self, path: &Path) -> RepoResult<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    fn validate(&self) -> RepoResult<()> {
        if self.version != REPO_FORMAT_VERSION {
            return Err(RepoError::Config(format!(
                "unsupported repository version {} (expected {REPO_FORMAT_VERSION})",
                self.version
            )));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(RepoError::Config(format!(
                "compression_level {} out of range 1..=22",
                self.compression_level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_archive_level_3() {
        let config = RepoConfig::default();
        assert_eq!(config.mode, RepoMode::Archive);
        assert_eq!(config.compression(), Some(3));
        assert!(!config.reject_case_collisions);
    }

    #[test]
    fn bare_has_no_compression() {
        assert_eq!(RepoConfig::bare().compression(), None);
    }

    #[test]
    fn toml_round_trip() {
        let config = RepoConfig {
            reject_case_collisions: true,
            ..RepoConfig::bare()
        };
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("mode = \"bare\""));
        assert_eq!(RepoConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = RepoConfig::from_toml_str("mode = \"bare\"\n").unwrap();
        assert_eq!(config.version, REPO_FORMAT_VERSION);
        assert_eq!(config.mode, RepoMode::Bare);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = RepoConfig::from_toml_str("version = 7\n").unwrap_err();
        assert!(matches!(err, RepoError::Config(msg) if msg.contains("version 7")));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(RepoConfig::from_toml_str("colour = \"blue\"\n").is_err());
    }

    #[test]
    fn bad_compression_level_is_rejected() {
        assert!(RepoConfig::from_toml_str("compression_level = 0\n").is_err());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        RepoConfig::default().save(&path).unwrap();
        assert_eq!(RepoConfig::load(&path).unwrap(), RepoConfig::default());
    }
}
