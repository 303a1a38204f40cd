//! Version selectors and modifier filters

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which version of a name to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VersionSelector {
    /// Highest existing version
    #[default]
    Latest,
    /// Version 0
    Earliest,
    /// A concrete version that must exist
    Exact(u64),
}

impl VersionSelector {
    /// Map a signed index onto a selector.
    ///
    /// Only `-1` is an alias of [`VersionSelector::Latest`]; non-negative
    /// values are exact versions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for negative indices other than `-1`.
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            -1 => Ok(Self::Latest),
            i if i >= 0 => Ok(Self::Exact(i.unsigned_abs())),
            i => Err(Error::InvalidInput(format!(
                "version index {i} is not supported; use -1 for the latest version"
            ))),
        }
    }

    /// Concrete version given the latest existing one.
    #[must_use]
    pub const fn resolve(&self, latest: u64) -> Option<u64> {
        match self {
            Self::Latest => Some(latest),
            Self::Earliest => Some(0),
            Self::Exact(v) if *v <= latest => Some(*v),
            Self::Exact(_) => None,
        }
    }
}

impl From<u64> for VersionSelector {
    fn from(version: u64) -> Self {
        Self::Exact(version)
    }
}

/// Restrict lookups to objects derived from specific producer versions.
///
/// An object matches when, for every entry, its `modification_info[producer]`
/// equals the producer version the selector resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModifierFilter {
    producers: BTreeMap<String, VersionSelector>,
}

impl ModifierFilter {
    /// Filter that matches every object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `producer` at `selector`.
    #[must_use]
    pub fn with(mut self, producer: impl Into<String>, selector: impl Into<VersionSelector>) -> Self {
        self.producers.insert(producer.into(), selector.into());
        self
    }

    /// Whether no producer is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Constrained producers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, VersionSelector)> {
        self.producers.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for ModifierFilter {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        Self {
            producers: iter
                .into_iter()
                .map(|(k, v)| (k.into(), VersionSelector::Exact(v)))
                .collect(),
        }
    }
}

/// How much of an object to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fetch {
    /// Metadata and small payload only
    #[default]
    Metadata,
    /// Also load bulk arrays from the payload store
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(VersionSelector::Latest.resolve(4), Some(4));
        assert_eq!(VersionSelector::Earliest.resolve(4), Some(0));
        assert_eq!(VersionSelector::Exact(2).resolve(4), Some(2));
        assert_eq!(VersionSelector::Exact(5).resolve(4), None);
    }

    #[test]
    fn test_from_index() {
        assert_eq!(VersionSelector::from_index(-1).unwrap(), VersionSelector::Latest);
        assert_eq!(VersionSelector::from_index(0).unwrap(), VersionSelector::Exact(0));
        assert_eq!(VersionSelector::from_index(7).unwrap(), VersionSelector::Exact(7));
        assert!(VersionSelector::from_index(-2).is_err());
    }

    #[test]
    fn test_filter_from_pairs() {
        let filter: ModifierFilter = [("model/model", 3_u64), ("data", 1)].into_iter().collect();
        let entries: Vec<_> = filter.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("data", VersionSelector::Exact(1)),
                ("model/model", VersionSelector::Exact(3))
            ]
        );
    }
}
