//! In-memory payload store that replays append chains.

use super::{concat_fields, Fields, PayloadStore};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Clone)]
enum Stored {
    Base(Fields),
    Appended { prev: u64, rows: Fields },
}

/// Payload store that keeps base arrays plus appended rows only.
///
/// `get` walks the chain back to its base version and applies every
/// appended block in order, so a long append history costs one copy per
/// read rather than one copy per version at write time.
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    entries: DashMap<(String, u64), Stored>,
}

impl MemoryPayloadStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_new(&self, key: &str, version: u64, stored: Stored) -> Result<()> {
        match self.entries.entry((key.to_string(), version)) {
            Entry::Occupied(_) => Err(Error::Integrity(format!(
                "payload for {key}@{version} already stored"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(stored);
                Ok(())
            }
        }
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn add(&self, key: &str, version: u64, fields: &Fields) -> Result<()> {
        self.insert_new(key, version, Stored::Base(fields.clone()))
    }

    fn append(&self, key: &str, prev_version: u64, new_version: u64, rows: &Fields) -> Result<()> {
        // validates shapes against the materialized previous version
        let base = self.get(key, prev_version)?;
        concat_fields(key, prev_version, &base, rows)?;
        self.insert_new(
            key,
            new_version,
            Stored::Appended {
                prev: prev_version,
                rows: rows.clone(),
            },
        )
    }

    fn get(&self, key: &str, version: u64) -> Result<Fields> {
        let mut pending = Vec::new();
        let mut current = version;
        let base = loop {
            let stored = self
                .entries
                .get(&(key.to_string(), current))
                .map(|entry| entry.value().clone())
                .ok_or_else(|| Error::not_found(key, Some(current)))?;
            match stored {
                Stored::Base(fields) => break fields,
                Stored::Appended { prev, rows } => {
                    pending.push((current, rows));
                    current = prev;
                }
            }
        };
        pending
            .into_iter()
            .rev()
            .try_fold(base, |acc, (v, rows)| concat_fields(key, v, &acc, &rows))
    }

    fn contains(&self, key: &str, version: u64) -> Result<bool> {
        Ok(self.entries.contains_key(&(key.to_string(), version)))
    }

    fn remove(&self, key: &str, version: u64) -> Result<()> {
        self.entries.remove(&(key.to_string(), version));
        Ok(())
    }
}
