//! Label registry: stable aliases for calibrated model versions
//!
//! Labels are stored as ordinary `LABEL` objects (name = label id). The
//! registry is a secondary index over them keyed both ways, rebuilt eagerly
//! whenever the repository is opened or merged.

use crate::naming::{DerivedName, NameRole};
use crate::object::Label;
use crate::{Error, Result};
use rustc_hash::FxHashMap;

/// Map a bare model name to its calibrated model name (`m` -> `m/model`).
///
/// Names that already carry a role are returned unchanged.
#[must_use]
pub fn normalize_model_name(name: &str) -> String {
    match DerivedName::parse(name) {
        Ok(derived) if derived.role() == NameRole::Base => DerivedName::calibrated_model(name)
            .map_or_else(|_| name.to_string(), |calibrated| calibrated.to_string()),
        _ => name.to_string(),
    }
}

/// Two-way index between label ids and `(model, version)` pairs.
#[derive(Debug, Default, Clone)]
pub struct LabelRegistry {
    by_id: FxHashMap<String, (String, u64)>,
    by_model: FxHashMap<(String, u64), Vec<String>>,
}

impl LabelRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(label id, label)` pairs.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (String, &'a Label)>) -> Self {
        let mut registry = Self::new();
        for (id, label) in labels {
            registry.insert(id, label);
        }
        registry
    }

    /// Index `label` under `id`, replacing an older binding of the same id.
    pub fn insert(&mut self, id: String, label: &Label) {
        let key = (label.model().to_string(), label.model_version());
        if let Some(old) = self.by_id.insert(id.clone(), key.clone()) {
            if let Some(ids) = self.by_model.get_mut(&old) {
                ids.retain(|existing| existing != &id);
            }
        }
        let ids = self.by_model.entry(key).or_default();
        ids.push(id);
        ids.sort();
    }

    /// Whether `id` may be bound to `model@version`.
    ///
    /// Returns `Ok(true)` if it already is (nothing to do), `Ok(false)` if
    /// the id is free.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if `id` points somewhere else.
    pub fn admit(&self, id: &str, model: &str, version: u64) -> Result<bool> {
        match self.by_id.get(id) {
            None => Ok(false),
            Some((m, v)) if m == model && *v == version => Ok(true),
            Some((m, v)) => Err(Error::DuplicateLabel {
                label: id.to_string(),
                model: m.clone(),
                version: *v,
            }),
        }
    }

    /// A label bound to `model@version` (first by id order).
    ///
    /// Bare model names are normalized to the calibrated model name.
    #[must_use]
    pub fn get_label(&self, model: &str, version: u64) -> Option<&str> {
        self.labels_for(model, version).first().map(String::as_str)
    }

    /// Every label bound to `model@version`, sorted.
    #[must_use]
    pub fn labels_for(&self, model: &str, version: u64) -> &[String] {
        self.by_model
            .get(&(normalize_model_name(model), version))
            .map_or(&[], Vec::as_slice)
    }

    /// Model and version a label points at.
    #[must_use]
    pub fn model_for_label(&self, id: &str) -> Option<(&str, u64)> {
        self.by_id.get(id).map(|(m, v)| (m.as_str(), *v))
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no label exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
