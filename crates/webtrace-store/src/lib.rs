// SPDX-License-Identifier: Apache-2.0
//! Ordered byte-keyed record store for webtrace databases.
//!
//! `webtrace-store` provides the [`KvStore`] trait the analytical engine
//! writes its fingerprint database through, plus two implementations:
//! [`MemoryStore`] for the builder and tests, and [`FileStore`] for the
//! single-file on-disk snapshot the CLI ships.
//!
//! # Ordering Invariant
//!
//! Iteration yields records in ascending byte order of their keys, for every
//! implementation. The engine itself only performs point lookups, but the
//! ordering contract keeps snapshots byte-for-byte reproducible and makes
//! external inspection tools trivial.
//!
//! # Absence Semantics
//!
//! [`get`](KvStore::get) returns `None` for missing keys — this is **not** an
//! error. The database is a lookup table: scanned checksums that no known
//! release ever shipped are expected to miss. Error variants are reserved for
//! container-level corruption and I/O failures.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying file could not be read or written.
    #[error("[STORE_IO] {path}: {source}")]
    Io {
        /// Path of the store file involved in the failed operation.
        path: String,
        /// The propagated I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The store file does not carry the expected container format.
    #[error("[STORE_CORRUPT] {path}: {reason} at offset {offset}")]
    Corrupt {
        /// Path of the rejected store file.
        path: String,
        /// Byte offset at which validation failed.
        offset: usize,
        /// Human-readable description of the violation.
        reason: String,
    },
}

/// Ordered byte-keyed record store.
///
/// Implementations map opaque byte keys to opaque byte values. The trait is
/// synchronous and object-safe; the detection phase treats any store as
/// read-only.
pub trait KvStore {
    /// Retrieve a value by key. Returns `None` if absent — absence is not an
    /// error.
    fn get(&self, key: &[u8]) -> Option<Arc<[u8]>>;

    /// Insert or replace a record.
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Check existence without retrieving.
    fn has(&self, key: &[u8]) -> bool;

    /// Number of records stored.
    fn len(&self) -> usize;

    /// Returns `true` if no records are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all records in ascending key order.
    fn iter(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_>;
}
