//! Lineage tracking over recorded `modification_info`
//!
//! Lineage has no storage of its own: every object carries the producer
//! versions it was derived from. [`validate_modifiers`] checks them when a
//! commit is assembled; [`LineageGraph`] is a snapshot index built from all
//! stored metadata for ancestor/descendant walks, staleness and integrity
//! checks.

use crate::kv::KvStore;
use crate::object::RepoInfo;
use crate::payload::PayloadStore;
use crate::store::ObjectStore;
use crate::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Check that every producer version an object consumes exists.
///
/// `known(name)` returns the highest version of `name` visible to the
/// commit being assembled (including versions assigned in the same batch).
/// An object may consume earlier versions of itself, never its own version.
///
/// # Errors
/// Returns [`Error::Integrity`] on the first dangling reference.
pub(crate) fn validate_modifiers(
    info: &RepoInfo,
    version: u64,
    known: impl Fn(&str) -> Option<u64>,
) -> Result<()> {
    for (producer, &consumed) in info.modification_info() {
        if producer == info.name() {
            if consumed >= version {
                return Err(Error::Integrity(format!(
                    "'{producer}' version {version} cannot be derived from its own version {consumed}"
                )));
            }
            continue;
        }
        match known(producer) {
            Some(latest) if consumed <= latest => {}
            Some(latest) => {
                return Err(Error::Integrity(format!(
                    "'{}' consumes '{producer}' version {consumed}, but the latest version is {latest}",
                    info.name()
                )))
            }
            None => {
                return Err(Error::Integrity(format!(
                    "'{}' consumes '{producer}', which does not exist",
                    info.name()
                )))
            }
        }
    }
    Ok(())
}

/// A stored (name, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionRef {
    /// Object name
    pub name: String,
    /// Object version
    pub version: u64,
}

impl VersionRef {
    /// Pair `name` with `version`.
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Snapshot of the lineage relation across every stored version.
#[derive(Debug, Default)]
pub struct LineageGraph {
    producers: FxHashMap<VersionRef, BTreeMap<String, u64>>,
    consumers: FxHashMap<VersionRef, Vec<VersionRef>>,
    latest: FxHashMap<String, u64>,
}

impl LineageGraph {
    /// Index the given metadata.
    #[must_use]
    pub fn build(infos: impl IntoIterator<Item = RepoInfo>) -> Self {
        let mut graph = Self::default();
        for info in infos {
            let node = VersionRef::new(info.name(), info.version());
            graph
                .latest
                .entry(node.name.clone())
                .and_modify(|v| *v = (*v).max(node.version))
                .or_insert(node.version);
            for (producer, &version) in info.modification_info() {
                graph
                    .consumers
                    .entry(VersionRef::new(producer.clone(), version))
                    .or_default()
                    .push(node.clone());
            }
            graph
                .producers
                .insert(node, info.modification_info().clone());
        }
        for list in graph.consumers.values_mut() {
            list.sort();
        }
        graph
    }

    fn require(&self, name: &str, version: u64) -> Result<VersionRef> {
        let node = VersionRef::new(name, version);
        if self.producers.contains_key(&node) {
            Ok(node)
        } else {
            Err(Error::not_found(name, Some(version)))
        }
    }

    fn walk<F>(&self, start: VersionRef, next: F) -> Vec<VersionRef>
    where
        F: Fn(&VersionRef) -> Vec<VersionRef>,
    {
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([start.clone()]);
        seen.insert(start);
        let mut out = Vec::new();
        while let Some(node) = queue.pop_front() {
            for n in next(&node) {
                if seen.insert(n.clone()) {
                    out.push(n.clone());
                    queue.push_back(n);
                }
            }
        }
        out
    }

    /// Everything `name@version` was (transitively) derived from, breadth first.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub fn ancestors(&self, name: &str, version: u64) -> Result<Vec<VersionRef>> {
        let start = self.require(name, version)?;
        Ok(self.walk(start, |node| {
            self.producers
                .get(node)
                .map(|p| p.iter().map(|(n, v)| VersionRef::new(n.clone(), *v)).collect())
                .unwrap_or_default()
        }))
    }

    /// Everything (transitively) derived from `name@version`, breadth first.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub fn descendants(&self, name: &str, version: u64) -> Result<Vec<VersionRef>> {
        let start = self.require(name, version)?;
        Ok(self.walk(start, |node| self.consumers.get(node).cloned().unwrap_or_default()))
    }

    /// Producers of `name@version` that have moved on: `(producer, consumed, latest)`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub fn outdated_inputs(&self, name: &str, version: u64) -> Result<Vec<(String, u64, u64)>> {
        let node = self.require(name, version)?;
        Ok(self.producers[&node]
            .iter()
            .filter(|(producer, _)| producer.as_str() != name)
            .filter_map(|(producer, &consumed)| {
                let latest = *self.latest.get(producer)?;
                (latest > consumed).then(|| (producer.clone(), consumed, latest))
            })
            .collect())
    }

    /// Whether some producer of `name@version` has a newer version.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub fn is_stale(&self, name: &str, version: u64) -> Result<bool> {
        Ok(!self.outdated_inputs(name, version)?.is_empty())
    }

    /// Verify dense versions per name and that every consumed version exists.
    ///
    /// # Errors
    /// Returns [`Error::Integrity`] listing every violation.
    pub fn check_integrity(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut names: Vec<_> = self.latest.iter().collect();
        names.sort();
        for (name, &latest) in names {
            for version in 0..=latest {
                if !self.producers.contains_key(&VersionRef::new(name.clone(), version)) {
                    problems.push(format!("{name}@{version} is missing"));
                }
            }
        }
        let mut nodes: Vec<_> = self.producers.iter().collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));
        for (node, producers) in nodes {
            for (producer, &version) in producers {
                if !self.producers.contains_key(&VersionRef::new(producer.clone(), version)) {
                    problems.push(format!("{node} consumes {producer}@{version}, which is not stored"));
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Integrity(problems.join("; ")))
        }
    }

    /// Number of indexed versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

impl<S: KvStore, P: PayloadStore> ObjectStore<S, P> {
    /// Snapshot the lineage relation of every stored version.
    ///
    /// # Errors
    /// Returns error if records cannot be read or decoded.
    pub async fn lineage(&self) -> Result<LineageGraph> {
        Ok(LineageGraph::build(self.all_infos().await?))
    }
}
