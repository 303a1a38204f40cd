//! Payload store for bulk numeric arrays
//!
//! **Append-Only Write Pattern** (same rule as the Arrow storage engine):
//! a version's arrays are written once. Growth happens by writing a *new*
//! version as the row-wise concatenation of a previous version and new rows.
//!
//! ```text
//! add(k, 1, {d: [1]})
//! append(k, 1, 2, {d: [2]})      k@2.d == [1, 2]
//! append(k, 2, 3, {d: [3]})      k@3.d == [1, 2, 3]
//! ```
//!
//! Two backends with identical observable results:
//! - [`MemoryPayloadStore`]: keeps only the appended rows and replays the chain
//! - [`ParquetPayloadStore`]: materializes every version as Parquet files

mod memory;
mod parquet_store;

pub use memory::MemoryPayloadStore;
pub use parquet_store::ParquetPayloadStore;

use crate::array::NumericArray;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Named arrays of one object version.
pub type Fields = BTreeMap<String, NumericArray>;

/// Storage for bulk arrays keyed by (object name, version).
pub trait PayloadStore: Send + Sync {
    /// Store full arrays for `key@version`.
    ///
    /// # Errors
    /// Returns [`Error::Integrity`] if the version already holds a payload.
    fn add(&self, key: &str, version: u64, fields: &Fields) -> Result<()>;

    /// Store `key@new_version` as `key@prev_version` with `rows` appended.
    ///
    /// Fields absent from `rows` carry over unchanged.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if `prev_version` holds no payload
    /// - [`Error::ShapeMismatch`] if trailing dimensions differ
    /// - [`Error::InvalidInput`] if `rows` names a field `prev_version` lacks
    fn append(&self, key: &str, prev_version: u64, new_version: u64, rows: &Fields) -> Result<()>;

    /// Arrays of `key@version`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no payload is stored.
    fn get(&self, key: &str, version: u64) -> Result<Fields>;

    /// Whether `key@version` holds a payload.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read.
    fn contains(&self, key: &str, version: u64) -> Result<bool>;

    /// Drop `key@version`. Used to undo writes of a failed commit.
    ///
    /// # Errors
    /// Returns error if the backend cannot be written.
    fn remove(&self, key: &str, version: u64) -> Result<()>;
}

/// Concatenate `rows` onto `base`, field by field.
pub(crate) fn concat_fields(key: &str, version: u64, base: &Fields, rows: &Fields) -> Result<Fields> {
    if let Some(unknown) = rows.keys().find(|f| !base.contains_key(*f)) {
        return Err(Error::InvalidInput(format!(
            "cannot append to field '{unknown}': {key}@{version} has no such payload field"
        )));
    }
    base.iter()
        .map(|(field, stored)| {
            let merged = match rows.get(field) {
                Some(extra) => stored.append_rows(field, extra)?,
                None => stored.clone(),
            };
            Ok((field.clone(), merged))
        })
        .collect()
}
