// SPDX-License-Identifier: Apache-2.0
//! BFS pruner: reduces the bipartite relation to discriminating checksums.
//!
//! An app-version is *defined* once it holds at least
//! [`DefinerConfig::sufficient_checksums`] digests exclusive to it. Defining
//! an app-version pins it to its exclusive digests and releases every digest
//! it shared with others; each release is recorded in the depends-on
//! side-table and may promote a neighbour to defined, which keeps the wave
//! moving. The exclusive counters only ever rise, so the queue drains in
//! O(edges · threshold).
//!
//! App-versions left undefined are the residue: versions indistinguishable
//! from their siblings on this corpus. They stay in the graph but are not
//! emitted to the database.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::graph::BipartiteGraph;
use crate::ident::{AppVersion, ChecksumDigest};

/// Default number of exclusive checksums required to define an app-version.
///
/// Observed useful values are 2 and 3; the knob is exposed all the way up to
/// the CLI.
pub const DEFAULT_SUFFICIENT_CHECKSUMS: usize = 2;

/// Tunables for the pruning pass.
#[derive(Debug, Clone, Copy)]
pub struct DefinerConfig {
    /// Exclusive checksums required before an app-version is defined.
    pub sufficient_checksums: usize,
}

impl Default for DefinerConfig {
    fn default() -> Self {
        Self {
            sufficient_checksums: DEFAULT_SUFFICIENT_CHECKSUMS,
        }
    }
}

/// Result of a pruning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefineOutcome {
    /// App-versions that reached the exclusive threshold.
    pub defined: BTreeSet<AppVersion>,
    /// For each released digest, the defined app-versions that dropped it,
    /// in pinning order. At database write time this becomes the digest's
    /// depends-on list.
    pub depends_on: BTreeMap<ChecksumDigest, Vec<AppVersion>>,
}

/// Run the pruning pass over `graph`, mutating it in place.
///
/// Post-condition: every defined app-version holds only digests whose
/// app-version set is exactly itself. The pass is idempotent — re-running it
/// on the pruned graph defines the same set and records no new drops.
pub fn define(graph: &mut BipartiteGraph, config: &DefinerConfig) -> DefineOutcome {
    let threshold = config.sufficient_checksums;
    let mut queue: VecDeque<AppVersion> = graph
        .app_versions()
        .filter(|(_, node)| node.exclusive_count() >= threshold)
        .map(|(av, _)| av.clone())
        .collect();

    let mut outcome = DefineOutcome::default();
    while let Some(av) = queue.pop_front() {
        if outcome.defined.contains(&av) {
            continue;
        }
        let qualified = graph
            .av(&av)
            .is_some_and(|node| node.exclusive_count() >= threshold);
        if !qualified {
            continue;
        }
        outcome.defined.insert(av.clone());

        // Exclusive-pinning: release every digest this app-version still
        // shares, recording the release so detection can discount the
        // neighbours that inherit the digest.
        let shared: Vec<ChecksumDigest> = graph
            .av(&av)
            .map(|node| {
                node.checksums()
                    .iter()
                    .filter(|digest| {
                        graph
                            .checksum(**digest)
                            .is_some_and(|cs| cs.app_versions().len() > 1)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for digest in shared {
            outcome.depends_on.entry(digest).or_default().push(av.clone());
            if let Some(promoted) = graph.remove_membership(&av, digest) {
                queue.push_back(promoted);
            }
        }
    }

    debug!(
        defined = outcome.defined.len(),
        total = graph.app_version_count(),
        "pruning pass complete"
    );
    outcome
}
