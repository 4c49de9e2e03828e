// SPDX-License-Identifier: Apache-2.0
//! Parsers for the two tab-separated tuple streams the scanner produces.
//!
//! The build phase consumes corpus records (`app \t version \t hex_sha256`
//! with an optional `\t path \t depth` tail); the detection phase consumes
//! observation lines (`hex_sha256 \t path`). Malformed lines are skipped with
//! a warning naming the line number — bad input is never fatal at this layer.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::path::PathBuf;

use tracing::warn;

use crate::ident::{AppVersion, ChecksumDigest, DigestParseError};

/// One parsed corpus record.
///
/// The short input form carries only the first three fields; the long form
/// adds the file path and its depth below the app-version's installation
/// root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// Application name.
    pub app: String,
    /// Release version string.
    pub version: String,
    /// SHA-256 fingerprint of the file.
    pub digest: ChecksumDigest,
    /// Absolute path of the file in the source corpus (long form only).
    pub path: Option<PathBuf>,
    /// Path components between the file and the installation root (long form
    /// only).
    pub depth: Option<u8>,
}

/// Why a corpus or observation line was rejected.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// The line does not split into 3 or 5 (corpus) / 2 (observation) fields.
    #[error("expected {expected} tab-separated fields, got {got}")]
    FieldCount {
        /// Accepted field counts for this stream.
        expected: &'static str,
        /// Observed field count.
        got: usize,
    },
    /// A field that must be non-empty was empty.
    #[error("empty field {0}")]
    EmptyField(&'static str),
    /// A field contained an interior NUL, which the database encoding cannot
    /// carry.
    #[error("field {0} contains a NUL byte")]
    InteriorNul(&'static str),
    /// The digest field did not parse.
    #[error("{0}")]
    Digest(#[from] DigestParseError),
    /// The depth field did not parse as an unsigned byte.
    #[error("depth not in 0..=255: {0}")]
    Depth(String),
}

fn parse_corpus_line(line: &str) -> Result<ScanRecord, LineError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 && fields.len() != 5 {
        return Err(LineError::FieldCount {
            expected: "3 or 5",
            got: fields.len(),
        });
    }
    for (name, value) in [("app", fields[0]), ("version", fields[1])] {
        if value.is_empty() {
            return Err(LineError::EmptyField(name));
        }
        if value.contains('\0') {
            return Err(LineError::InteriorNul(name));
        }
    }
    let digest = ChecksumDigest::from_hex(fields[2])?;
    let (path, depth) = if fields.len() == 5 {
        let depth: u8 = fields[4]
            .parse()
            .map_err(|_| LineError::Depth(fields[4].to_string()))?;
        (Some(PathBuf::from(fields[3])), Some(depth))
    } else {
        (None, None)
    };
    Ok(ScanRecord {
        app: fields[0].to_string(),
        version: fields[1].to_string(),
        digest,
        path,
        depth,
    })
}

/// The deduplicated build-phase input: checksum ↔ app-version relation plus
/// the depth side-table.
///
/// `Corpus` is pure data; the bipartite graph is constructed from it in one
/// pass and the depth table is consulted again at database write time.
#[derive(Debug, Default)]
pub struct Corpus {
    checksum_to_avs: BTreeMap<ChecksumDigest, BTreeSet<AppVersion>>,
    app_versions: BTreeSet<AppVersion>,
    depths: BTreeMap<(AppVersion, ChecksumDigest), BTreeSet<u8>>,
}

impl Corpus {
    /// Create an empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse corpus records from a reader, one per line.
    ///
    /// Malformed lines are skipped with a `warn!`; only the underlying reader
    /// failing is an error.
    ///
    /// # Errors
    ///
    /// Returns the propagated I/O error when a line cannot be read.
    pub fn parse<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut corpus = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match parse_corpus_line(&line) {
                Ok(record) => corpus.insert(record),
                Err(err) => warn!(line = idx + 1, %err, "skipping malformed corpus line"),
            }
        }
        Ok(corpus)
    }

    /// Insert one record, deduplicating on (app, version, digest).
    pub fn insert(&mut self, record: ScanRecord) {
        let av = AppVersion::new(record.app, record.version);
        self.checksum_to_avs
            .entry(record.digest)
            .or_default()
            .insert(av.clone());
        if let Some(depth) = record.depth {
            self.depths
                .entry((av.clone(), record.digest))
                .or_default()
                .insert(depth);
        }
        self.app_versions.insert(av);
    }

    /// Iterate the checksum → app-version relation in digest order.
    pub fn checksums(&self) -> impl Iterator<Item = (&ChecksumDigest, &BTreeSet<AppVersion>)> {
        self.checksum_to_avs.iter()
    }

    /// All app-versions seen in the corpus.
    pub fn app_versions(&self) -> impl Iterator<Item = &AppVersion> {
        self.app_versions.iter()
    }

    /// Depth bytes recorded for one (app-version, checksum) membership.
    pub fn depths_for(&self, av: &AppVersion, digest: ChecksumDigest) -> Option<&BTreeSet<u8>> {
        self.depths.get(&(av.clone(), digest))
    }

    /// Number of distinct checksums.
    pub fn checksum_count(&self) -> usize {
        self.checksum_to_avs.len()
    }

    /// Returns `true` when no records were ingested.
    pub fn is_empty(&self) -> bool {
        self.checksum_to_avs.is_empty()
    }
}

/// Detection-phase input: each scanned checksum with every path it was
/// observed at.
#[derive(Debug, Default)]
pub struct Observations {
    by_digest: BTreeMap<ChecksumDigest, Vec<PathBuf>>,
}

impl Observations {
    /// Create an empty observation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse observation lines (`hex_sha256 \t absolute_path`) from a reader.
    ///
    /// The same digest appearing on multiple lines accumulates all its paths.
    /// Malformed lines are skipped with a `warn!`.
    ///
    /// # Errors
    ///
    /// Returns the propagated I/O error when a line cannot be read.
    pub fn parse<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut observations = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match Self::parse_line(&line) {
                Ok((digest, path)) => observations.insert(digest, path),
                Err(err) => warn!(line = idx + 1, %err, "skipping malformed observation line"),
            }
        }
        Ok(observations)
    }

    fn parse_line(line: &str) -> Result<(ChecksumDigest, PathBuf), LineError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(LineError::FieldCount {
                expected: "2",
                got: fields.len(),
            });
        }
        if fields[1].is_empty() {
            return Err(LineError::EmptyField("path"));
        }
        Ok((ChecksumDigest::from_hex(fields[0])?, PathBuf::from(fields[1])))
    }

    /// Record one observation.
    pub fn insert(&mut self, digest: ChecksumDigest, path: PathBuf) {
        self.by_digest.entry(digest).or_default().push(path);
    }

    /// Iterate observations in digest order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChecksumDigest, &Vec<PathBuf>)> {
        self.by_digest.iter()
    }

    /// Paths the digest was observed at, if any.
    pub fn paths(&self, digest: ChecksumDigest) -> Option<&[PathBuf]> {
        self.by_digest.get(&digest).map(Vec::as_slice)
    }

    /// Returns `true` when nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.by_digest.is_empty()
    }
}
