//! Overlay whiteout markers.
//!
//! An entry named `.wh.<name>` deletes `<name>` from the directory it sits
//! in; an entry named `.wh..wh..opq` deletes everything that directory held
//! before the overlay. The markers themselves are never materialized by an
//! overlay checkout.

/// Prefix of a whiteout entry.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Name of the opaque-directory marker.
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// A parsed whiteout entry name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whiteout<'a> {
    /// Remove the named sibling.
    Remove(&'a str),
    /// Remove every pre-existing entry of the directory.
    Opaque,
}

impl<'a> Whiteout<'a> {
    /// Classify an entry name. Returns `None` for ordinary entries.
    ///
    /// `.wh.`, `.wh..` and `.wh...` would name the directory itself or its
    /// parent and are treated as ordinary entries.
    pub fn parse(name: &'a str) -> Option<Self> {
        if name == OPAQUE_WHITEOUT {
            return Some(Self::Opaque);
        }
        let target = name.strip_prefix(WHITEOUT_PREFIX)?;
        match target {
            "" | "." | ".." => None,
            target => Some(Self::Remove(target)),
        }
    }
}

/// The whiteout entry name that deletes `name`.
pub fn whiteout_name(name: &str) -> String {
    format!("{WHITEOUT_PREFIX}{name}")
}
