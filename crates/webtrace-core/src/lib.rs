// SPDX-License-Identifier: Apache-2.0
//! webtrace-core: fingerprint database build and app-version detection.
//!
//! The engine identifies which web applications (and which versions) are
//! installed on a scanned filesystem by comparing SHA-256 fingerprints
//! against a database built from known releases. It runs in two phases:
//!
//! 1. **Build (offline).** [`ingest::Corpus`] rows become a
//!    [`graph::BipartiteGraph`]; the [`definer`] prunes it to discriminating
//!    checksums per app-version; [`database`] coalesces identical releases
//!    and serialises the [`codec`] record families into an ordered
//!    byte-keyed store.
//! 2. **Detection (online).** [`detect`] matches scanned observations
//!    against the store, applies the coverage bound, resolves the
//!    depends-on graph, folds in implications, infers installation roots
//!    and nests plugins/themes under their cores; [`report`] renders the
//!    result.
//!
//! Filesystem walking and hashing, archive fetching and the persistent
//! store live outside this crate — the contracts are the tuple streams
//! parsed by [`ingest`] and the byte layouts defined in [`codec`].
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
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]

pub mod codec;
pub mod database;
pub mod definer;
pub mod detect;
pub mod graph;
pub mod ident;
pub mod ingest;
pub mod report;
pub mod similarity;

/// Record codecs for the two database families.
pub use codec::{AppVersionRecord, ChecksumRecord, CodecError, BARRIER};
/// Offline pipeline: pruning outcome to persisted records.
pub use database::{build_database, read_implications, BuildError, BuildSummary, Implications};
/// BFS pruner and its configuration.
pub use definer::{define, DefineOutcome, DefinerConfig, DEFAULT_SUFFICIENT_CHECKSUMS};
/// Online detection pass, result types and nesting.
pub use detect::{
    detect, nest, DetectedApp, Detection, DetectError, DetectorConfig, DiscardedApp, Placement,
    TreeNode, DEFAULT_COVERAGE_BOUND,
};
/// The bipartite app-version ↔ checksum relation.
pub use graph::{BipartiteGraph, GraphError};
/// Identity types: digests, dense ids, app-versions.
pub use ident::{AppVersion, AvId, ChecksumDigest, DigestParseError, Sha256};
/// Scanner tuple-stream parsers.
pub use ingest::{Corpus, Observations, ScanRecord};
/// Report rendering (text and JSON).
pub use report::{render_json, render_text};
/// Sibling-version overlap diagnostic.
pub use similarity::similarity_matrix;
