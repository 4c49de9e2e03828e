// SPDX-License-Identifier: Apache-2.0
//! Database assembly: from a pruned graph to persisted records.
//!
//! After the pruning pass, app-versions are grouped by their final checksum
//! set. A group is persisted when its set is exclusive to the group as a
//! whole and at least the definer threshold in size — a single defined
//! app-version always satisfies this, and releases that ended up with
//! byte-identical discriminating sets coalesce into one entry instead of
//! shadowing each other. Dense ids are assigned in lexicographic order of
//! each group's first (app, version) pair so a given corpus always produces
//! the same database bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use tracing::{debug, warn};
use webtrace_store::KvStore;

use crate::codec::{AppVersionRecord, ChecksumRecord};
use crate::definer::{define, DefineOutcome, DefinerConfig};
use crate::graph::{BipartiteGraph, GraphError};
use crate::ident::{AppVersion, AvId, ChecksumDigest};
use crate::ingest::Corpus;

/// Soft links between app-versions, folded into the emitted records as
/// 4-byte implied ids.
pub type Implications = BTreeMap<AppVersion, Vec<AppVersion>>;

/// One entry of the implications sidecar file.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ImplicationEntry {
    /// Application name of the implying app-version.
    pub app: String,
    /// Version of the implying app-version.
    pub version: String,
    /// App-versions to promote alongside it.
    pub implies: Vec<AppVersion>,
}

/// Errors surfaced by the build pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The graph violated its structural invariants — a bug, not bad input.
    #[error(transparent)]
    Inconsistent(#[from] GraphError),
    /// The input stream could not be read.
    #[error("[BUILD_IO] {0}")]
    Io(#[from] std::io::Error),
    /// The implications sidecar is not valid JSON of the expected shape.
    #[error("[BUILD_IMPLIES] {0}")]
    Implications(#[from] serde_json::Error),
}

/// Counters describing one completed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    /// Persisted app-version entries (groups).
    pub groups: usize,
    /// Persisted entries naming more than one app-version.
    pub coalesced_groups: usize,
    /// Persisted checksum records.
    pub checksum_records: usize,
    /// App-versions left out of the database as indistinguishable residue.
    pub undefined: usize,
}

/// Read the implications sidecar: a JSON array of [`ImplicationEntry`].
///
/// # Errors
///
/// Returns [`BuildError::Io`] when the reader fails and
/// [`BuildError::Implications`] when the JSON does not parse.
pub fn read_implications<R: Read>(mut reader: R) -> Result<Implications, BuildError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    let entries: Vec<ImplicationEntry> = serde_json::from_str(&text)?;
    let mut implications = Implications::new();
    for entry in entries {
        implications
            .entry(AppVersion::new(entry.app, entry.version))
            .or_default()
            .extend(entry.implies);
    }
    Ok(implications)
}

/// Run the full offline pipeline: graph construction, consistency check,
/// pruning, consistency check, record emission.
///
/// # Errors
///
/// Returns [`BuildError::Inconsistent`] when a graph invariant breaks
/// (aborting the build — this is a programming error).
pub fn build_database(
    corpus: &Corpus,
    config: &DefinerConfig,
    implications: &Implications,
    store: &mut dyn KvStore,
) -> Result<BuildSummary, BuildError> {
    let mut graph = BipartiteGraph::from_corpus(corpus);
    graph.verify_consistency()?;
    let outcome = define(&mut graph, config);
    graph.verify_consistency()?;
    Ok(write_database(
        &graph,
        &outcome,
        corpus,
        implications,
        config,
        store,
    ))
}

/// Serialise a pruned graph into the two record families.
pub fn write_database(
    graph: &BipartiteGraph,
    outcome: &DefineOutcome,
    corpus: &Corpus,
    implications: &Implications,
    config: &DefinerConfig,
    store: &mut dyn KvStore,
) -> BuildSummary {
    // Group app-versions by their final checksum set; keep the groups whose
    // set is exclusive to the group and big enough to discriminate.
    let mut groups: BTreeMap<Vec<ChecksumDigest>, Vec<AppVersion>> = BTreeMap::new();
    for (av, node) in graph.app_versions() {
        if node.checksums().is_empty() {
            continue;
        }
        groups
            .entry(node.checksums().iter().copied().collect())
            .or_default()
            .push(av.clone());
    }
    let mut persisted: Vec<(Vec<AppVersion>, Vec<ChecksumDigest>)> = groups
        .into_iter()
        .filter(|(digests, members)| {
            digests.len() >= config.sufficient_checksums
                && digests.iter().all(|digest| {
                    graph
                        .checksum(*digest)
                        .is_some_and(|cs| cs.app_versions().len() == members.len())
                })
        })
        .map(|(digests, members)| (members, digests))
        .collect();
    persisted.sort();

    let mut id_of: BTreeMap<AppVersion, AvId> = BTreeMap::new();
    for (index, (members, _)) in persisted.iter().enumerate() {
        for member in members {
            id_of.insert(member.clone(), AvId(u32::try_from(index).unwrap_or(u32::MAX)));
        }
    }

    let mut summary = BuildSummary {
        groups: persisted.len(),
        coalesced_groups: persisted.iter().filter(|(members, _)| members.len() > 1).count(),
        checksum_records: 0,
        undefined: graph.app_version_count() - id_of.len(),
    };

    for (index, (members, digests)) in persisted.iter().enumerate() {
        let id = AvId(u32::try_from(index).unwrap_or(u32::MAX));

        let mut implied: BTreeSet<AvId> = BTreeSet::new();
        for member in members {
            for target in implications.get(member).into_iter().flatten() {
                match id_of.get(target) {
                    Some(target_id) if *target_id != id => {
                        implied.insert(*target_id);
                    }
                    Some(_) => {}
                    None => warn!(%target, "implied app-version not persisted, dropping link"),
                }
            }
        }

        let record = AppVersionRecord {
            group: members.clone(),
            total: u8::try_from(digests.len()).unwrap_or(u8::MAX),
            implied: implied.into_iter().collect(),
        };
        store.put(&id.to_be_bytes(), &record.encode());

        for digest in digests {
            let depends_on: Vec<AvId> = outcome
                .depends_on
                .get(digest)
                .into_iter()
                .flatten()
                .filter_map(|dropper| id_of.get(dropper).copied())
                .collect();
            let mut depths: BTreeSet<u8> = BTreeSet::new();
            for member in members {
                if let Some(member_depths) = corpus.depths_for(member, *digest) {
                    depths.extend(member_depths.iter().copied());
                }
            }
            let record = ChecksumRecord {
                owner: id,
                depends_on,
                depths: depths.into_iter().collect(),
            };
            store.put(digest.as_bytes(), &record.encode());
            summary.checksum_records += 1;
        }
    }

    debug!(
        groups = summary.groups,
        checksums = summary.checksum_records,
        undefined = summary.undefined,
        "database written"
    );
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ingest::ScanRecord;
    use webtrace_store::MemoryStore;

    fn corpus_of(rows: &[(&str, &str, u8)]) -> Corpus {
        let mut corpus = Corpus::new();
        for (app, version, byte) in rows {
            corpus.insert(ScanRecord {
                app: (*app).to_string(),
                version: (*version).to_string(),
                digest: ChecksumDigest([*byte; 32]),
                path: None,
                depth: None,
            });
        }
        corpus
    }

    fn fetch_av(store: &MemoryStore, id: u32) -> AppVersionRecord {
        AppVersionRecord::parse(&store.get(&AvId(id).to_be_bytes()).unwrap()).unwrap()
    }

    fn fetch_cs(store: &MemoryStore, byte: u8) -> ChecksumRecord {
        ChecksumRecord::parse(&store.get(&[byte; 32]).unwrap()).unwrap()
    }

    // ── 1. two disjoint app-versions produce two entries ────────────────

    #[test]
    fn disjoint_singletons() {
        let corpus = corpus_of(&[
            ("app1", "v1", 0xA),
            ("app1", "v1", 0xB),
            ("app2", "v2", 0xC),
            ("app2", "v2", 0xD),
        ]);
        let mut store = MemoryStore::new();
        let summary = build_database(
            &corpus,
            &DefinerConfig::default(),
            &Implications::new(),
            &mut store,
        )
        .unwrap();
        assert_eq!(summary.groups, 2);
        assert_eq!(summary.checksum_records, 4);
        assert_eq!(summary.undefined, 0);

        // Ids follow lexicographic order of the group's first member.
        let first = fetch_av(&store, 0);
        assert_eq!(first.group, vec![AppVersion::new("app1", "v1")]);
        assert_eq!(first.total, 2);
        let second = fetch_av(&store, 1);
        assert_eq!(second.group, vec![AppVersion::new("app2", "v2")]);
        assert_eq!(second.total, 2);

        assert_eq!(fetch_cs(&store, 0xA).owner, AvId(0));
        assert_eq!(fetch_cs(&store, 0xC).owner, AvId(1));
    }

    // ── 2. released checksum carries its definer in depends-on ──────────

    #[test]
    fn depends_on_recorded() {
        // x:1 defines first and releases H3 to x:2, which then defines too.
        let corpus = corpus_of(&[
            ("x", "1", 1),
            ("x", "1", 2),
            ("x", "1", 3),
            ("x", "2", 3),
            ("x", "2", 4),
        ]);
        let mut store = MemoryStore::new();
        build_database(
            &corpus,
            &DefinerConfig::default(),
            &Implications::new(),
            &mut store,
        )
        .unwrap();

        let h3 = fetch_cs(&store, 3);
        let x1 = fetch_av(&store, h3.depends_on[0].0);
        assert_eq!(x1.group, vec![AppVersion::new("x", "1")]);
        let owner = fetch_av(&store, h3.owner.0);
        assert_eq!(owner.group, vec![AppVersion::new("x", "2")]);
    }

    // ── 3. identical checksum sets coalesce into one group ──────────────

    #[test]
    fn identical_sets_coalesce() {
        let corpus = corpus_of(&[
            ("twin", "1.0", 1),
            ("twin", "1.0", 2),
            ("twin", "1.0", 3),
            ("twin", "1.0.1", 1),
            ("twin", "1.0.1", 2),
            ("twin", "1.0.1", 3),
        ]);
        let mut store = MemoryStore::new();
        let summary = build_database(
            &corpus,
            &DefinerConfig::default(),
            &Implications::new(),
            &mut store,
        )
        .unwrap();
        assert_eq!(summary.groups, 1);
        assert_eq!(summary.coalesced_groups, 1);

        let entry = fetch_av(&store, 0);
        assert_eq!(
            entry.group,
            vec![
                AppVersion::new("twin", "1.0"),
                AppVersion::new("twin", "1.0.1"),
            ]
        );
        assert_eq!(entry.total, 3);
        assert_eq!(fetch_cs(&store, 1).owner, AvId(0));
    }

    // ── 4. ambiguous residue is not persisted ───────────────────────────

    #[test]
    fn residue_not_persisted() {
        // z:2 shares everything it has with z:1 except one digest — one
        // exclusive is below the threshold, and its set is not identical to
        // z:1's either.
        let corpus = corpus_of(&[
            ("z", "1", 1),
            ("z", "1", 2),
            ("z", "1", 3),
            ("z", "2", 3),
            ("z", "2", 9),
            ("z", "3", 9),
        ]);
        let mut store = MemoryStore::new();
        let summary = build_database(
            &corpus,
            &DefinerConfig::default(),
            &Implications::new(),
            &mut store,
        )
        .unwrap();
        let persisted: Vec<AppVersion> = (0..summary.groups)
            .flat_map(|id| fetch_av(&store, u32::try_from(id).unwrap()).group)
            .collect();
        assert!(!persisted.contains(&AppVersion::new("z", "3")));
        assert!(summary.undefined >= 1);
    }

    // ── 5. implications canonicalise to persisted ids ───────────────────

    #[test]
    fn implications_canonicalised() {
        let corpus = corpus_of(&[
            ("core-cores", "5", 1),
            ("core-cores", "5", 2),
            ("wp.pext", "2", 3),
            ("wp.pext", "2", 4),
        ]);
        let mut implications = Implications::new();
        implications.insert(
            AppVersion::new("core-cores", "5"),
            vec![
                AppVersion::new("wp.pext", "2"),
                AppVersion::new("ghost", "0"), // never persisted, dropped
            ],
        );
        let mut store = MemoryStore::new();
        build_database(&corpus, &DefinerConfig::default(), &implications, &mut store).unwrap();

        let core = fetch_av(&store, 0);
        assert_eq!(core.group, vec![AppVersion::new("core-cores", "5")]);
        assert_eq!(core.implied.len(), 1);
        let implied = fetch_av(&store, core.implied[0].0);
        assert_eq!(implied.group, vec![AppVersion::new("wp.pext", "2")]);
    }

    // ── 6. depth side-table lands in the checksum records ───────────────

    #[test]
    fn depths_emitted() {
        let mut corpus = Corpus::new();
        for (byte, depth) in [(1u8, 2u8), (2, 0)] {
            corpus.insert(ScanRecord {
                app: "app".to_string(),
                version: "1".to_string(),
                digest: ChecksumDigest([byte; 32]),
                path: Some("/corpus/app/1/file".into()),
                depth: Some(depth),
            });
        }
        let mut store = MemoryStore::new();
        build_database(
            &corpus,
            &DefinerConfig::default(),
            &Implications::new(),
            &mut store,
        )
        .unwrap();
        assert_eq!(fetch_cs(&store, 1).depths, vec![2]);
        assert_eq!(fetch_cs(&store, 2).depths, vec![0]);
    }

    // ── 7. same corpus always serialises to the same bytes ──────────────

    #[test]
    fn deterministic_output() {
        let corpus = corpus_of(&[
            ("b", "2", 4),
            ("a", "1", 1),
            ("a", "1", 2),
            ("b", "2", 3),
            ("a", "1", 3),
        ]);
        let mut first = MemoryStore::new();
        let mut second = MemoryStore::new();
        for store in [&mut first, &mut second] {
            build_database(
                &corpus,
                &DefinerConfig::default(),
                &Implications::new(),
                store,
            )
            .unwrap();
        }
        let a: Vec<(Vec<u8>, Vec<u8>)> = first
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let b: Vec<(Vec<u8>, Vec<u8>)> = second
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        assert_eq!(a, b);
    }
}
