//! Loose-object store on the local filesystem.
//!
//! Layout: `<root>/<first 2 hex>/<remaining 62 hex>`. Each file holds a
//! one-byte [`ObjectKind`] tag followed by the object body. With compression
//! enabled the whole file is a zstd frame.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ovl_types::ObjectId;
use tempfile::NamedTempFile;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::traits::ObjectStore;

/// Filesystem-backed [`ObjectStore`].
///
/// Objects are written to a temporary file next to their final location and
/// renamed into place, so a concurrent reader sees either nothing or the
/// complete object. Every read re-hashes the content.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    compression: Option<i32>,
}

impl FsObjectStore {
    /// Open (or create) an object directory.
    ///
    /// `compression` is a zstd level; `None` stores objects uncompressed.
    pub fn open(root: &Path, compression: Option<i32>) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            compression,
        })
    }

    /// The object directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    fn encode(&self, object: &StoredObject) -> StoreResult<Vec<u8>> {
        let mut raw = Vec::with_capacity(object.data.len() + 1);
        raw.push(object.kind.tag());
        raw.extend_from_slice(&object.data);
        match self.compression {
            Some(level) => Ok(zstd::encode_all(raw.as_slice(), level)?),
            None => Ok(raw),
        }
    }

    fn decode(&self, id: &ObjectId, bytes: Vec<u8>) -> StoreResult<StoredObject> {
        let raw = match self.compression {
            Some(_) => zstd::decode_all(bytes.as_slice())?,
            None => bytes,
        };
        let (tag, body) = raw.split_first().ok_or_else(|| StoreError::CorruptObject {
            id: *id,
            reason: "empty object file".into(),
        })?;
        let kind = ObjectKind::from_tag(*tag).ok_or_else(|| StoreError::CorruptObject {
            id: *id,
            reason: format!("unknown kind tag {tag:#04x}"),
        })?;
        let object = StoredObject::new(kind, body.to_vec());
        let computed = object.compute_id();
        if computed != *id {
            return Err(StoreError::HashMismatch { id: *id, computed });
        }
        Ok(object)
    }
}

impl ObjectStore for FsObjectStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        match fs::read(self.object_path(id)) {
            Ok(bytes) => self.decode(id, bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        let path = self.object_path(&id);
        if path.try_exists()? {
            return Ok(id);
        }
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(io::Error::other("object path has no parent")))?;
        fs::create_dir_all(dir)?;

        let encoded = self.encode(object)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        trace!(id = %id.short_hex(), kind = %object.kind, size = object.size, "object written");
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.object_path(id).try_exists()?)
    }
}
