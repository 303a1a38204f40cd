//! Category map: category -> ordered member names

use crate::object::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Versioned mapping from category to member names (insertion order).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryMap {
    members: BTreeMap<Category, Vec<String>>,
}

impl CategoryMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name` under `category`; returns `false` if already present.
    pub fn insert(&mut self, category: Category, name: &str) -> bool {
        let names = self.members.entry(category).or_default();
        if names.iter().any(|n| n == name) {
            false
        } else {
            names.push(name.to_string());
            true
        }
    }

    /// Names in `category`, in the order they were introduced.
    #[must_use]
    pub fn names(&self, category: Category) -> &[String] {
        self.members.get(&category).map_or(&[], Vec::as_slice)
    }

    /// Whether `name` is listed under any category.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.values().any(|names| names.iter().any(|n| n == name))
    }

    /// Total number of member names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.values().map(Vec::len).sum()
    }

    /// Whether the map has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
