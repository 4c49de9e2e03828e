// SPDX-License-Identifier: Apache-2.0
//! Online detection: match scanned checksums against the database.
//!
//! The pipeline is match → coverage filter → depends-on resolution →
//! implication folding → path inference → nesting. Records are materialised
//! from the store on first access and cached for the lifetime of the call;
//! the store is never written.
//!
//! Depends-on resolution is memoised recursion. The relation is acyclic by
//! construction — an app-version only acquires a depends-on entry when a
//! neighbour was pinned *first* during the build — and a debug assertion
//! guards the invariant.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use webtrace_store::KvStore;

use crate::codec::{AppVersionRecord, ChecksumRecord, CodecError};
use crate::ident::{AppVersion, AvId, ChecksumDigest};
use crate::ingest::Observations;

/// Directory separating a WordPress core from its plugins and themes.
pub const WP_CONTENT_DIR: &str = "wp-content";
/// Plugin directory name under `wp-content`.
pub const WP_PLUGINS_DIR: &str = "plugins";
/// Theme directory name under `wp-content`.
pub const WP_THEMES_DIR: &str = "themes";

/// Default minimum ratio of matched to total checksums.
pub const DEFAULT_COVERAGE_BOUND: f64 = 0.5;

/// Tunables for the detection pass.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Minimum `matched / total` ratio for an app-version to count.
    pub coverage_bound: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            coverage_bound: DEFAULT_COVERAGE_BOUND,
        }
    }
}

/// The database could not be used for detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// A checksum record failed to parse.
    #[error("[DB_INVALID] checksum record {digest}: {source}")]
    InvalidChecksumRecord {
        /// Store key of the offending record.
        digest: ChecksumDigest,
        /// The codec-level violation.
        #[source]
        source: CodecError,
    },
    /// An app-version record failed to parse.
    #[error("[DB_INVALID] app-version record {id}: {source}")]
    InvalidAppVersionRecord {
        /// Store key of the offending record.
        id: AvId,
        /// The codec-level violation.
        #[source]
        source: CodecError,
    },
    /// A checksum record references an app-version id with no record.
    #[error("[DB_INVALID] app-version record {id} is referenced but missing")]
    MissingAppVersion {
        /// The dangling id.
        id: AvId,
    },
}

/// One detected app-version group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedApp {
    /// The persisted (app, version) pairs of the entry.
    pub group: Vec<AppVersion>,
    /// The matched discriminating checksums backing the detection.
    pub used_checksums: Vec<ChecksumDigest>,
    /// Number of matched checksums (the coverage numerator).
    pub matched: usize,
    /// Total checksums representing the entry in the database.
    pub total: u8,
    /// `true` when the entry was promoted through an implication rather
    /// than validated by its own depends-on resolution.
    pub implied: bool,
    /// Candidate installation roots, every path tied at the maximum
    /// occurrence count. Empty when the database carries no depth hints for
    /// the matched checksums.
    pub roots: Vec<PathBuf>,
}

/// A matched app-version that failed coverage or depends-on resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedApp {
    /// The persisted (app, version) pairs of the entry.
    pub group: Vec<AppVersion>,
    /// Number of matched checksums.
    pub matched: usize,
    /// Total checksums representing the entry in the database.
    pub total: u8,
}

/// Full result of one detection pass.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Detected entries, in database id order.
    pub detected: Vec<DetectedApp>,
    /// Matched-but-rejected entries with their coverage ratio inputs.
    pub discarded: Vec<DiscardedApp>,
}

/// An anchored occurrence of a detected entry: entry index plus one of its
/// inferred roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Index into [`Detection::detected`].
    pub entry: usize,
    /// Inferred installation root; empty when path inference had no input.
    pub root: PathBuf,
}

/// One top-level node of the nested output tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// The core (or unattached entry) this node anchors.
    pub placement: Placement,
    /// Plugins and themes nested under this core.
    pub children: Vec<Placement>,
}

/// Run detection against `store`.
///
/// An empty observation set produces an empty result — that is not an
/// error.
///
/// # Errors
///
/// Returns [`DetectError`] when a record fails to parse or a referenced
/// app-version record is missing; the database is rejected as a whole.
pub fn detect(
    store: &dyn KvStore,
    observations: &Observations,
    config: &DetectorConfig,
) -> Result<Detection, DetectError> {
    let mut checksums: BTreeMap<ChecksumDigest, ChecksumRecord> = BTreeMap::new();
    let mut avs: FxHashMap<u32, AppVersionRecord> = FxHashMap::default();
    let mut found: BTreeMap<AvId, BTreeSet<ChecksumDigest>> = BTreeMap::new();

    for (digest, _) in observations.iter() {
        let Some(value) = store.get(digest.as_bytes()) else {
            continue;
        };
        let record = ChecksumRecord::parse(&value).map_err(|source| {
            DetectError::InvalidChecksumRecord {
                digest: *digest,
                source,
            }
        })?;
        require_av(store, &mut avs, record.owner)?;
        for dep in &record.depends_on {
            require_av(store, &mut avs, *dep)?;
        }
        found.entry(record.owner).or_default().insert(*digest);
        checksums.insert(*digest, record);
    }

    let mut resolver = Resolver {
        coverage_bound: config.coverage_bound,
        checksums: &checksums,
        avs: &avs,
        found: &found,
        valid: FxHashMap::default(),
        in_progress: Vec::new(),
    };

    let valid_ids: BTreeSet<AvId> = found
        .keys()
        .copied()
        .filter(|id| resolver.is_valid(*id))
        .collect();

    // Implication folding: an implied app-version is promoted only when it
    // was itself matched, passes coverage, and is not already valid.
    // Implications are not chased transitively.
    let mut promoted: BTreeSet<AvId> = BTreeSet::new();
    let mut cached_ids: Vec<u32> = avs.keys().copied().collect();
    cached_ids.sort_unstable();
    for id in cached_ids {
        for implied in avs[&id].implied.clone() {
            if found.contains_key(&implied)
                && resolver.enough(implied)
                && !resolver.is_valid(implied)
            {
                promoted.insert(implied);
            }
        }
    }

    let mut result_ids: BTreeSet<AvId> = valid_ids.clone();
    result_ids.extend(promoted.iter().copied());

    let mut detection = Detection::default();
    for id in &result_ids {
        let record = &avs[&id.0];
        let used = &found[id];
        detection.detected.push(DetectedApp {
            group: record.group.clone(),
            used_checksums: used.iter().copied().collect(),
            matched: used.len(),
            total: record.total,
            implied: !valid_ids.contains(id),
            roots: infer_roots(used, &checksums, observations),
        });
    }
    for (id, used) in &found {
        if result_ids.contains(id) {
            continue;
        }
        let record = &avs[&id.0];
        detection.discarded.push(DiscardedApp {
            group: record.group.clone(),
            matched: used.len(),
            total: record.total,
        });
    }
    Ok(detection)
}

fn require_av(
    store: &dyn KvStore,
    avs: &mut FxHashMap<u32, AppVersionRecord>,
    id: AvId,
) -> Result<(), DetectError> {
    if avs.contains_key(&id.0) {
        return Ok(());
    }
    let value = store
        .get(&id.to_be_bytes())
        .ok_or(DetectError::MissingAppVersion { id })?;
    let record = AppVersionRecord::parse(&value)
        .map_err(|source| DetectError::InvalidAppVersionRecord { id, source })?;
    avs.insert(id.0, record);
    Ok(())
}

/// Memoised depends-on resolution over the matched app-versions.
struct Resolver<'a> {
    coverage_bound: f64,
    checksums: &'a BTreeMap<ChecksumDigest, ChecksumRecord>,
    avs: &'a FxHashMap<u32, AppVersionRecord>,
    found: &'a BTreeMap<AvId, BTreeSet<ChecksumDigest>>,
    valid: FxHashMap<u32, bool>,
    in_progress: Vec<u32>,
}

impl Resolver<'_> {
    /// Coverage filter: matched / total ≥ bound.
    fn enough(&self, id: AvId) -> bool {
        let Some(matched) = self.found.get(&id) else {
            return false;
        };
        let Some(record) = self.avs.get(&id.0) else {
            return false;
        };
        record.total > 0
            && (matched.len() as f64) / f64::from(record.total) >= self.coverage_bound
    }

    /// An app-version is valid iff it passes coverage and at least one of
    /// its matched checksums has no valid dependent.
    fn is_valid(&mut self, id: AvId) -> bool {
        if let Some(&cached) = self.valid.get(&id.0) {
            return cached;
        }
        // Acyclic by construction; see the module docs.
        debug_assert!(
            !self.in_progress.contains(&id.0),
            "depends-on cycle involving app-version {id}"
        );
        if self.in_progress.contains(&id.0) {
            return false;
        }
        self.in_progress.push(id.0);

        let result = if self.enough(id) {
            let digests: Vec<ChecksumDigest> = self
                .found
                .get(&id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            digests.into_iter().any(|digest| {
                let deps = self
                    .checksums
                    .get(&digest)
                    .map(|record| record.depends_on.clone())
                    .unwrap_or_default();
                deps.into_iter().all(|dep| !self.is_valid(dep))
            })
        } else {
            false
        };

        self.in_progress.pop();
        self.valid.insert(id.0, result);
        result
    }
}

/// Strip the last `depth` components from `path`, stopping at the root.
fn strip_components(path: &Path, depth: u8) -> PathBuf {
    let mut current = path;
    for _ in 0..depth {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current.to_path_buf()
}

/// Infer the installation root(s) for one entry: strip every recorded depth
/// from every observed path and keep all candidates tied at the maximum
/// occurrence count.
fn infer_roots(
    used: &BTreeSet<ChecksumDigest>,
    checksums: &BTreeMap<ChecksumDigest, ChecksumRecord>,
    observations: &Observations,
) -> Vec<PathBuf> {
    let mut counts: BTreeMap<PathBuf, usize> = BTreeMap::new();
    for digest in used {
        let Some(record) = checksums.get(digest) else {
            continue;
        };
        let Some(paths) = observations.paths(*digest) else {
            continue;
        };
        for depth in &record.depths {
            for path in paths {
                *counts.entry(strip_components(path, *depth)).or_default() += 1;
            }
        }
    }
    let Some(max) = counts.values().copied().max() else {
        return Vec::new();
    };
    counts
        .into_iter()
        .filter(|(_, count)| *count == max)
        .map(|(path, _)| path)
        .collect()
}

/// Layer plugins and themes under their parent cores.
///
/// Each detected entry contributes one placement per inferred root (or a
/// single root-less placement). A plugin/theme placement nests under the
/// core whose root `C` satisfies `root == C/wp-content/{plugins|themes}/
/// <name>`; everything else — cores included — surfaces as a top-level
/// node.
pub fn nest(detected: &[DetectedApp]) -> Vec<TreeNode> {
    let placements = |index: usize, entry: &DetectedApp| -> Vec<Placement> {
        if entry.roots.is_empty() {
            vec![Placement {
                entry: index,
                root: PathBuf::new(),
            }]
        } else {
            entry
                .roots
                .iter()
                .map(|root| Placement {
                    entry: index,
                    root: root.clone(),
                })
                .collect()
        }
    };

    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut core_nodes: Vec<usize> = Vec::new();
    for (index, entry) in detected.iter().enumerate() {
        if entry.group.iter().any(AppVersion::is_core) {
            for placement in placements(index, entry) {
                core_nodes.push(nodes.len());
                nodes.push(TreeNode {
                    placement,
                    children: Vec::new(),
                });
            }
        }
    }

    for (index, entry) in detected.iter().enumerate() {
        let kind_dir = if entry.group.iter().any(AppVersion::is_wordpress_plugin) {
            WP_PLUGINS_DIR
        } else if entry.group.iter().any(AppVersion::is_wordpress_theme) {
            WP_THEMES_DIR
        } else {
            if !entry.group.iter().any(AppVersion::is_core) {
                // Neither core nor plugin/theme: plain top-level entries.
                for placement in placements(index, entry) {
                    nodes.push(TreeNode {
                        placement,
                        children: Vec::new(),
                    });
                }
            }
            continue;
        };

        for placement in placements(index, entry) {
            let parent = parent_core(&nodes, &core_nodes, &placement.root, kind_dir);
            match parent {
                Some(node_index) => nodes[node_index].children.push(placement),
                None => nodes.push(TreeNode {
                    placement,
                    children: Vec::new(),
                }),
            }
        }
    }
    nodes
}

/// Find the core node whose root anchors `root` through the expected
/// `wp-content/<kind>/<name>` shape. The core root is fully determined by
/// the shape, so at most one root matches; ties between cores sharing that
/// root go to the first node.
fn parent_core(
    nodes: &[TreeNode],
    core_nodes: &[usize],
    root: &Path,
    kind_dir: &str,
) -> Option<usize> {
    let name = root.file_name()?;
    let kind = root.parent()?;
    if kind.file_name()? != kind_dir {
        return None;
    }
    let content = kind.parent()?;
    if content.file_name()? != WP_CONTENT_DIR {
        return None;
    }
    let core_root = content.parent()?;
    debug_assert_eq!(core_root.join(WP_CONTENT_DIR).join(kind_dir).join(name), root);
    core_nodes
        .iter()
        .copied()
        .find(|&node| nodes[node].placement.root == core_root)
}
