// SPDX-License-Identifier: Apache-2.0
//! Single-file snapshot store.
//!
//! Container layout (all integers big-endian):
//!
//! ```text
//! [ magic : b"WTKV" ]
//! [ version : 0x01 ]
//! [ record_count : u32 ]
//! [ key_len : u32 ][ key ][ value_len : u32 ][ value ]  × record_count
//! ```
//!
//! Records are written in ascending key order and the reader rejects files
//! that violate it, so a snapshot has exactly one valid byte representation
//! for a given record set. The whole file is loaded on open; the database
//! this store carries is bounded by the fingerprint corpus, not by scan
//! volume.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{KvStore, MemoryStore, StoreError};

const MAGIC: &[u8; 4] = b"WTKV";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4;

/// File-backed [`KvStore`] holding one immutable snapshot per file.
///
/// `open` reads and validates an existing snapshot; `create` starts an empty
/// store that [`persist`](FileStore::persist) writes atomically (temp file in
/// the same directory, then rename). Mutations between persists live only in
/// memory.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Create an empty store that will persist to `path`.
    ///
    /// Nothing touches the filesystem until [`persist`](FileStore::persist).
    pub fn create<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            inner: MemoryStore::new(),
        }
    }

    /// Open and validate an existing snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read and
    /// [`StoreError::Corrupt`] if the container format is violated (bad
    /// magic, unsupported version, truncated frame, misordered keys,
    /// trailing bytes).
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let bytes = std::fs::read(&path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let inner = Self::decode(&path, &bytes)?;
        Ok(Self { path, inner })
    }

    /// Path this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current record set to disk atomically.
    ///
    /// The snapshot is assembled in a sibling temp file and renamed over the
    /// target, so readers never observe a half-written database.
    pub fn persist(&self) -> Result<(), StoreError> {
        let bytes = self.encode();
        let tmp = self.path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            path: self.path.display().to_string(),
            source,
        };
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let records = self.inner.records();
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&u32::try_from(records.len()).unwrap_or(u32::MAX).to_be_bytes());
        for (key, value) in records {
            out.extend_from_slice(&u32::try_from(key.len()).unwrap_or(u32::MAX).to_be_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(&u32::try_from(value.len()).unwrap_or(u32::MAX).to_be_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<MemoryStore, StoreError> {
        let corrupt = |offset: usize, reason: &str| StoreError::Corrupt {
            path: path.display().to_string(),
            offset,
            reason: reason.to_string(),
        };
        if bytes.len() < HEADER_LEN {
            return Err(corrupt(bytes.len(), "truncated header"));
        }
        if &bytes[0..4] != MAGIC {
            return Err(corrupt(0, "bad magic"));
        }
        if bytes[4] != VERSION {
            return Err(corrupt(4, "unsupported version"));
        }
        let count = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;

        let mut store = MemoryStore::new();
        let mut offset = HEADER_LEN;
        let mut previous_key: Option<Vec<u8>> = None;
        for _ in 0..count {
            let key = Self::frame(bytes, &mut offset).ok_or_else(|| {
                corrupt(offset, "truncated key frame")
            })?;
            let value = Self::frame(bytes, &mut offset).ok_or_else(|| {
                corrupt(offset, "truncated value frame")
            })?;
            if let Some(prev) = &previous_key {
                if prev.as_slice() >= key {
                    return Err(corrupt(offset, "keys out of order"));
                }
            }
            previous_key = Some(key.to_vec());
            store.insert_owned(key.to_vec(), Arc::from(value));
        }
        if offset != bytes.len() {
            return Err(corrupt(offset, "trailing bytes after last record"));
        }
        Ok(store)
    }

    /// Read one `u32`-length-prefixed frame, advancing `offset` past it.
    fn frame<'a>(bytes: &'a [u8], offset: &mut usize) -> Option<&'a [u8]> {
        let len_end = offset.checked_add(4)?;
        if bytes.len() < len_end {
            return None;
        }
        let len = u32::from_be_bytes([
            bytes[*offset],
            bytes[*offset + 1],
            bytes[*offset + 2],
            bytes[*offset + 3],
        ]) as usize;
        let end = len_end.checked_add(len)?;
        if bytes.len() < end {
            return None;
        }
        let frame = &bytes[len_end..end];
        *offset = end;
        Some(frame)
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.inner.put(key, value);
    }

    fn has(&self, key: &[u8]) -> bool {
        self.inner.has(key)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        self.inner.iter()
    }
}
