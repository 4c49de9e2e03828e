// SPDX-License-Identifier: Apache-2.0
//! Byte-level codecs for the two database record families.
//!
//! All integers are big-endian. A checksum record is keyed by the 32-byte
//! digest and laid out as:
//!
//! ```text
//! [ owner_av_id : u32 ]
//! [ depends_on_av_id : u32 ] × k      (k ≥ 0)
//! [ barrier : 0xFF ]
//! [ depth : u8 ] × m                  (m ≥ 0)
//! ```
//!
//! An app-version record is keyed by the 4-byte id and laid out as:
//!
//! ```text
//! [ app_utf8 \0 version_utf8 \0 ] × n (n ≥ 1)
//! \0
//! [ total : u8 ]
//! [ implied_av_id : u32 ] × p         (p ≥ 0)
//! ```
//!
//! The barrier is located by scanning for the first `0xFF` byte at a 4-byte
//! boundary from the start of the value; dense ids stay far below
//! `0xFF00_0000`, so an id never masquerades as a barrier. Any layout
//! violation rejects the whole database — these records are produced by our
//! own builder, so a violation means the file is not a webtrace database.

use crate::ident::{AppVersion, AvId};

/// The byte separating the id block from the depth block in a checksum
/// record.
pub const BARRIER: u8 = 0xFF;

/// A record family failed to parse; the database is invalid.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// No barrier byte at any 4-byte boundary of a checksum record.
    #[error("[DB_INVALID] checksum record has no barrier byte")]
    MissingBarrier,
    /// Checksum record length is incompatible with a block of 4-byte ids.
    #[error("[DB_INVALID] id block of {0} bytes is not a whole number of ids")]
    BadIdBlock(usize),
    /// Checksum record holds a barrier but no owner id before it.
    #[error("[DB_INVALID] checksum record has no owner id")]
    MissingOwner,
    /// App-version record is not terminated by a double NUL.
    #[error("[DB_INVALID] app-version record has no list terminator")]
    MissingTerminator,
    /// App-version record carries an odd number of strings.
    #[error("[DB_INVALID] app-version record pairs {0} strings")]
    OddStringCount(usize),
    /// App-version record names no (app, version) pair at all.
    #[error("[DB_INVALID] app-version record is empty")]
    EmptyGroup,
    /// App-version record ends before the total byte.
    #[error("[DB_INVALID] app-version record has no total byte")]
    MissingTotal,
    /// Implied-id block length is not a multiple of 4.
    #[error("[DB_INVALID] implied block of {0} bytes is not a whole number of ids")]
    BadImpliedBlock(usize),
    /// A string in an app-version record is not valid UTF-8.
    #[error("[DB_INVALID] app-version record holds invalid utf-8")]
    BadUtf8,
}

/// Decoded checksum record: the digest's owner, the app-versions it depends
/// on, and its depth candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    /// Id of the app-version group this digest is exclusive to.
    pub owner: AvId,
    /// App-versions that shared this digest and were pinned first; detection
    /// discounts the owner's evidence while any of these is itself valid.
    pub depends_on: Vec<AvId>,
    /// Candidate distances (path components) from the file to the
    /// installation root.
    pub depths: Vec<u8>,
}

impl ChecksumRecord {
    /// Encode into the on-disk value layout.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(
            self.owner.0 < 0xFF00_0000,
            "owner id would collide with the barrier byte"
        );
        let mut out = Vec::with_capacity(4 * (1 + self.depends_on.len()) + 1 + self.depths.len());
        out.extend_from_slice(&self.owner.to_be_bytes());
        for id in &self.depends_on {
            debug_assert!(id.0 < 0xFF00_0000, "depends-on id would collide with the barrier byte");
            out.extend_from_slice(&id.to_be_bytes());
        }
        out.push(BARRIER);
        out.extend_from_slice(&self.depths);
        out
    }

    /// Parse the on-disk value layout.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when no barrier byte exists at a 4-byte
    /// boundary, or when the record carries a barrier but no owner id.
    pub fn parse(value: &[u8]) -> Result<Self, CodecError> {
        let mut barrier = None;
        let mut offset = 0;
        while offset < value.len() {
            if value[offset] == BARRIER {
                barrier = Some(offset);
                break;
            }
            offset += 4;
        }
        let Some(barrier) = barrier else {
            if value.len() % 4 == 0 {
                return Err(CodecError::MissingBarrier);
            }
            return Err(CodecError::BadIdBlock(value.len()));
        };
        if barrier == 0 {
            return Err(CodecError::MissingOwner);
        }

        let mut ids = value[..barrier]
            .chunks_exact(4)
            .map(|chunk| AvId::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        let owner = ids.next().ok_or(CodecError::MissingOwner)?;
        Ok(Self {
            owner,
            depends_on: ids.collect(),
            depths: value[barrier + 1..].to_vec(),
        })
    }
}

/// Decoded app-version record: the coalesced group, the coverage denominator
/// and the implied ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersionRecord {
    /// The (app, version) pairs sharing this entry — more than one when
    /// releases ended up with identical discriminating checksum sets.
    pub group: Vec<AppVersion>,
    /// Count of checksum records representing this entry in the database;
    /// the denominator of the detection coverage ratio.
    pub total: u8,
    /// Ids of app-versions promoted alongside this one when it is detected.
    pub implied: Vec<AvId>,
}

impl AppVersionRecord {
    /// Encode into the on-disk value layout.
    ///
    /// Identity strings are NUL-free by construction — the ingester rejects
    /// fields with interior NULs before they ever reach a record.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for av in &self.group {
            debug_assert!(!av.app.contains('\0') && !av.version.contains('\0'));
            out.extend_from_slice(av.app.as_bytes());
            out.push(0);
            out.extend_from_slice(av.version.as_bytes());
            out.push(0);
        }
        out.push(0);
        out.push(self.total);
        for id in &self.implied {
            out.extend_from_slice(&id.to_be_bytes());
        }
        out
    }

    /// Parse the on-disk value layout.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] on a missing double-NUL terminator, an odd or
    /// empty string list, invalid UTF-8, a missing total byte, or a ragged
    /// implied-id block.
    pub fn parse(value: &[u8]) -> Result<Self, CodecError> {
        let mut strings: Vec<&[u8]> = Vec::new();
        let mut start = 0;
        let mut list_end = None;
        for (idx, byte) in value.iter().enumerate() {
            if *byte != 0 {
                continue;
            }
            if idx == start && !strings.is_empty() {
                // Two adjacent NULs terminate the list.
                list_end = Some(idx);
                break;
            }
            strings.push(&value[start..idx]);
            start = idx + 1;
        }
        let list_end = list_end.ok_or(CodecError::MissingTerminator)?;
        if strings.len() % 2 != 0 {
            return Err(CodecError::OddStringCount(strings.len()));
        }
        if strings.is_empty() {
            return Err(CodecError::EmptyGroup);
        }
        let mut group = Vec::with_capacity(strings.len() / 2);
        for pair in strings.chunks_exact(2) {
            let app = std::str::from_utf8(pair[0]).map_err(|_| CodecError::BadUtf8)?;
            let version = std::str::from_utf8(pair[1]).map_err(|_| CodecError::BadUtf8)?;
            group.push(AppVersion::new(app, version));
        }

        let total = *value.get(list_end + 1).ok_or(CodecError::MissingTotal)?;
        let implied_block = &value[list_end + 2..];
        if implied_block.len() % 4 != 0 {
            return Err(CodecError::BadImpliedBlock(implied_block.len()));
        }
        let implied = implied_block
            .chunks_exact(4)
            .map(|chunk| AvId::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self {
            group,
            total,
            implied,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. checksum record round-trip ───────────────────────────────────

    #[test]
    fn checksum_record_round_trip() {
        let record = ChecksumRecord {
            owner: AvId(7),
            depends_on: vec![AvId(1), AvId(3)],
            depths: vec![0, 2, 2],
        };
        let parsed = ChecksumRecord::parse(&record.encode()).unwrap();
        assert_eq!(parsed, record);
    }

    // ── 2. checksum record with no depends-on and no depths ─────────────

    #[test]
    fn checksum_record_minimal() {
        let record = ChecksumRecord {
            owner: AvId(0),
            depends_on: vec![],
            depths: vec![],
        };
        let bytes = record.encode();
        assert_eq!(bytes, vec![0, 0, 0, 0, BARRIER]);
        assert_eq!(ChecksumRecord::parse(&bytes).unwrap(), record);
    }

    // ── 3. missing barrier rejects ──────────────────────────────────────

    #[test]
    fn checksum_record_missing_barrier() {
        // Four id-looking bytes, no barrier anywhere.
        assert_eq!(
            ChecksumRecord::parse(&[0, 0, 0, 1]).unwrap_err(),
            CodecError::MissingBarrier
        );
    }

    // ── 4. ragged id block rejects ──────────────────────────────────────

    #[test]
    fn checksum_record_ragged_ids() {
        // Six bytes, no barrier at offsets 0 or 4: not a whole number of ids.
        assert_eq!(
            ChecksumRecord::parse(&[0, 0, 0, 1, 0, 0]).unwrap_err(),
            CodecError::BadIdBlock(6)
        );
    }

    // ── 5. barrier in first position means no owner ─────────────────────

    #[test]
    fn checksum_record_missing_owner() {
        assert_eq!(
            ChecksumRecord::parse(&[BARRIER, 1, 2]).unwrap_err(),
            CodecError::MissingOwner
        );
    }

    // ── 6. barrier byte inside the depth block is data, not structure ───

    #[test]
    fn depths_may_contain_barrier_byte() {
        let record = ChecksumRecord {
            owner: AvId(1),
            depends_on: vec![],
            depths: vec![BARRIER, 1],
        };
        assert_eq!(ChecksumRecord::parse(&record.encode()).unwrap(), record);
    }

    // ── 7. app-version record round-trip, single and coalesced ──────────

    #[test]
    fn app_version_record_round_trip() {
        let single = AppVersionRecord {
            group: vec![AppVersion::new("wordpress-cores", "5.2")],
            total: 4,
            implied: vec![AvId(9)],
        };
        assert_eq!(AppVersionRecord::parse(&single.encode()).unwrap(), single);

        let coalesced = AppVersionRecord {
            group: vec![
                AppVersion::new("wp.pakismet", "4.1"),
                AppVersion::new("wp.pakismet", "4.1.1"),
            ],
            total: 3,
            implied: vec![],
        };
        assert_eq!(
            AppVersionRecord::parse(&coalesced.encode()).unwrap(),
            coalesced
        );
    }

    // ── 8. app-version record failure modes ─────────────────────────────

    #[test]
    fn app_version_record_failures() {
        // No double-NUL terminator.
        assert_eq!(
            AppVersionRecord::parse(b"app\0version\0").unwrap_err(),
            CodecError::MissingTerminator
        );
        // Odd string count.
        assert_eq!(
            AppVersionRecord::parse(b"app\0\0\x02").unwrap_err(),
            CodecError::OddStringCount(1)
        );
        // Terminated list but missing total byte.
        assert_eq!(
            AppVersionRecord::parse(b"app\0version\0\0").unwrap_err(),
            CodecError::MissingTotal
        );
        // Ragged implied block.
        assert_eq!(
            AppVersionRecord::parse(b"app\0version\0\0\x02\x00\x00").unwrap_err(),
            CodecError::BadImpliedBlock(2)
        );
        // Invalid utf-8 in a string.
        assert_eq!(
            AppVersionRecord::parse(b"ap\xFFp\0version\0\0\x02").unwrap_err(),
            CodecError::BadUtf8
        );
    }

    // ── 9. total byte is read as an unsigned count ──────────────────────

    #[test]
    fn total_byte_is_unsigned() {
        let record = AppVersionRecord {
            group: vec![AppVersion::new("a", "1")],
            total: 255,
            implied: vec![],
        };
        assert_eq!(AppVersionRecord::parse(&record.encode()).unwrap().total, 255);
    }
}
