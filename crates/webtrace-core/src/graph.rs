// SPDX-License-Identifier: Apache-2.0
//! Bipartite app-version ↔ checksum relation.
//!
//! Two arena tables keyed by stable identity (the digest bytes on one side,
//! the (app, version) pair on the other); every cross-reference is by key,
//! never by pointer. All mutation goes through [`add_membership`] /
//! [`remove_membership`], which maintain the two structural invariants:
//!
//! - membership is bidirectional (a digest lists an app-version iff that
//!   app-version lists the digest);
//! - each app-version's `exclusive_count` equals the number of its digests
//!   attached to exactly one app-version.
//!
//! [`add_membership`]: BipartiteGraph::add_membership
//! [`remove_membership`]: BipartiteGraph::remove_membership

use std::collections::{BTreeMap, BTreeSet};

use crate::ident::{AppVersion, ChecksumDigest};
use crate::ingest::Corpus;

/// Per-app-version node: attributed digests plus the derived exclusive
/// counter.
#[derive(Debug, Default, Clone)]
pub struct AvNode {
    checksums: BTreeSet<ChecksumDigest>,
    exclusive_count: usize,
}

impl AvNode {
    /// Digests currently attributed to this app-version, in digest order.
    pub fn checksums(&self) -> &BTreeSet<ChecksumDigest> {
        &self.checksums
    }

    /// Number of attributed digests whose app-version set is a singleton.
    pub fn exclusive_count(&self) -> usize {
        self.exclusive_count
    }
}

/// Per-checksum node: the app-versions this digest belongs to.
#[derive(Debug, Default, Clone)]
pub struct CsNode {
    app_versions: BTreeSet<AppVersion>,
}

impl CsNode {
    /// App-versions sharing this digest, in key order.
    pub fn app_versions(&self) -> &BTreeSet<AppVersion> {
        &self.app_versions
    }
}

/// A consistency violation detected by [`BipartiteGraph::verify_consistency`].
///
/// This indicates a bug in the engine, not bad input; the build aborts on it.
#[derive(Debug, thiserror::Error)]
#[error("[GRAPH_INCONSISTENT] {0}")]
pub struct GraphError(pub String);

/// The bipartite relation between app-versions and checksums.
#[derive(Debug, Default, Clone)]
pub struct BipartiteGraph {
    avs: BTreeMap<AppVersion, AvNode>,
    checksums: BTreeMap<ChecksumDigest, CsNode>,
}

impl BipartiteGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full relation from an ingested corpus in one pass.
    pub fn from_corpus(corpus: &Corpus) -> Self {
        let mut graph = Self::new();
        for av in corpus.app_versions() {
            graph.avs.entry(av.clone()).or_default();
        }
        for (digest, avs) in corpus.checksums() {
            for av in avs {
                graph.add_membership(av, *digest);
            }
        }
        graph
    }

    /// Attach `digest` to `av`, creating either node as needed.
    ///
    /// Maintains the exclusive counters across the singleton transitions:
    /// the first member of a digest gains an exclusive, the second member
    /// takes the first one's exclusivity away. Re-adding an existing
    /// membership is a no-op.
    pub fn add_membership(&mut self, av: &AppVersion, digest: ChecksumDigest) {
        let cs = self.checksums.entry(digest).or_default();
        if !cs.app_versions.insert(av.clone()) {
            return;
        }
        let members = cs.app_versions.len();
        let demoted = if members == 2 {
            cs.app_versions.iter().find(|a| *a != av).cloned()
        } else {
            None
        };

        let av_node = self.avs.entry(av.clone()).or_default();
        av_node.checksums.insert(digest);
        if members == 1 {
            av_node.exclusive_count += 1;
        }
        if let Some(other) = demoted {
            if let Some(node) = self.avs.get_mut(&other) {
                node.exclusive_count = node.exclusive_count.saturating_sub(1);
            }
        }
    }

    /// Detach `digest` from `av`.
    ///
    /// When the removal leaves the digest with exactly one member, that
    /// member's exclusive counter is bumped and its key is returned so the
    /// caller can requeue it. A digest whose app-version set empties is
    /// dropped from the arena. Removing an absent membership is a no-op.
    pub fn remove_membership(
        &mut self,
        av: &AppVersion,
        digest: ChecksumDigest,
    ) -> Option<AppVersion> {
        let cs = self.checksums.get_mut(&digest)?;
        let had_single_member = cs.app_versions.len() == 1;
        if !cs.app_versions.remove(av) {
            return None;
        }
        let remaining = cs.app_versions.len();
        let promoted = if remaining == 1 {
            cs.app_versions.iter().next().cloned()
        } else {
            None
        };
        if remaining == 0 {
            self.checksums.remove(&digest);
        }

        if let Some(node) = self.avs.get_mut(av) {
            node.checksums.remove(&digest);
            if had_single_member {
                node.exclusive_count = node.exclusive_count.saturating_sub(1);
            }
        }
        if let Some(owner) = &promoted {
            if let Some(node) = self.avs.get_mut(owner) {
                node.exclusive_count += 1;
            }
        }
        promoted
    }

    /// Node for one app-version, if present.
    pub fn av(&self, av: &AppVersion) -> Option<&AvNode> {
        self.avs.get(av)
    }

    /// Node for one checksum, if present.
    pub fn checksum(&self, digest: ChecksumDigest) -> Option<&CsNode> {
        self.checksums.get(&digest)
    }

    /// Iterate app-versions in key order.
    pub fn app_versions(&self) -> impl Iterator<Item = (&AppVersion, &AvNode)> {
        self.avs.iter()
    }

    /// Iterate checksums in digest order.
    pub fn checksums(&self) -> impl Iterator<Item = (&ChecksumDigest, &CsNode)> {
        self.checksums.iter()
    }

    /// Number of app-version nodes.
    pub fn app_version_count(&self) -> usize {
        self.avs.len()
    }

    /// Number of checksum nodes.
    pub fn checksum_count(&self) -> usize {
        self.checksums.len()
    }

    /// Assert bidirectional consistency and exclusive-counter correctness
    /// across the whole graph, in O(edges).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] naming the first offending pair. A failure
    /// here is a programming error; the build driver aborts on it.
    pub fn verify_consistency(&self) -> Result<(), GraphError> {
        for (digest, cs) in &self.checksums {
            for av in &cs.app_versions {
                let ok = self
                    .avs
                    .get(av)
                    .is_some_and(|node| node.checksums.contains(digest));
                if !ok {
                    return Err(GraphError(format!("{digest} -> {av} not mirrored")));
                }
            }
        }
        for (av, node) in &self.avs {
            let mut exclusive = 0usize;
            for digest in &node.checksums {
                let members = self.checksums.get(digest).map_or(0, |cs| {
                    if cs.app_versions.contains(av) {
                        cs.app_versions.len()
                    } else {
                        0
                    }
                });
                if members == 0 {
                    return Err(GraphError(format!("{av} -> {digest} not mirrored")));
                }
                if members == 1 {
                    exclusive += 1;
                }
            }
            if exclusive != node.exclusive_count {
                return Err(GraphError(format!(
                    "{av} exclusive_count {} != recount {exclusive}",
                    node.exclusive_count
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn av(app: &str, version: &str) -> AppVersion {
        AppVersion::new(app, version)
    }

    fn cs(byte: u8) -> ChecksumDigest {
        ChecksumDigest([byte; 32])
    }

    // ── 1. membership is bidirectional after add ────────────────────────

    #[test]
    fn add_is_bidirectional() {
        let mut graph = BipartiteGraph::new();
        graph.add_membership(&av("a", "1"), cs(1));
        assert!(graph.av(&av("a", "1")).unwrap().checksums().contains(&cs(1)));
        assert!(graph
            .checksum(cs(1))
            .unwrap()
            .app_versions()
            .contains(&av("a", "1")));
        graph.verify_consistency().unwrap();
    }

    // ── 2. exclusive counter follows singleton transitions ──────────────

    #[test]
    fn exclusive_counter_transitions() {
        let mut graph = BipartiteGraph::new();
        let a = av("a", "1");
        let b = av("b", "1");

        graph.add_membership(&a, cs(1));
        assert_eq!(graph.av(&a).unwrap().exclusive_count(), 1);

        // Second member takes a's exclusivity away.
        graph.add_membership(&b, cs(1));
        assert_eq!(graph.av(&a).unwrap().exclusive_count(), 0);
        assert_eq!(graph.av(&b).unwrap().exclusive_count(), 0);

        // Removing b makes the digest exclusive to a again.
        let promoted = graph.remove_membership(&b, cs(1));
        assert_eq!(promoted, Some(a.clone()));
        assert_eq!(graph.av(&a).unwrap().exclusive_count(), 1);
        graph.verify_consistency().unwrap();
    }

    // ── 3. removing the last member drops the digest node ───────────────

    #[test]
    fn empty_checksum_is_dropped() {
        let mut graph = BipartiteGraph::new();
        let a = av("a", "1");
        graph.add_membership(&a, cs(1));
        assert_eq!(graph.remove_membership(&a, cs(1)), None);
        assert!(graph.checksum(cs(1)).is_none());
        assert_eq!(graph.av(&a).unwrap().exclusive_count(), 0);
        graph.verify_consistency().unwrap();
    }

    // ── 4. duplicate add and absent remove are no-ops ───────────────────

    #[test]
    fn idempotent_edges() {
        let mut graph = BipartiteGraph::new();
        let a = av("a", "1");
        graph.add_membership(&a, cs(1));
        graph.add_membership(&a, cs(1));
        assert_eq!(graph.av(&a).unwrap().exclusive_count(), 1);
        assert_eq!(graph.remove_membership(&av("x", "9"), cs(1)), None);
        graph.verify_consistency().unwrap();
    }

    // ── 5. from_corpus wires every edge ─────────────────────────────────

    #[test]
    fn from_corpus_builds_full_relation() {
        let mut corpus = Corpus::new();
        for (app, version, byte) in [("a", "1", 1u8), ("a", "1", 2), ("b", "1", 2)] {
            corpus.insert(crate::ingest::ScanRecord {
                app: app.to_string(),
                version: version.to_string(),
                digest: cs(byte),
                path: None,
                depth: None,
            });
        }
        let graph = BipartiteGraph::from_corpus(&corpus);
        assert_eq!(graph.app_version_count(), 2);
        assert_eq!(graph.checksum_count(), 2);
        assert_eq!(graph.av(&av("a", "1")).unwrap().exclusive_count(), 1);
        assert_eq!(graph.av(&av("b", "1")).unwrap().exclusive_count(), 0);
        graph.verify_consistency().unwrap();
    }
}
