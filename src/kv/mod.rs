//! Byte-level record storage for repository metadata
//!
//! The object store serializes every record (objects, commits, checkpoints)
//! into a [`KvStore`]. Backends only need to move bytes; versioning, lineage
//! and atomic commits are handled above this layer.
//!
//! - [`MemoryKvStore`]: `DashMap` backed, lost on process restart
//! - [`DiskKvStore`]: one file per key under a root directory
//! - `CompressedKvStore`: LZ4/ZSTD wrapper (feature `compression`)
//!
//! # Example
//!
//! ```rust
//! use trueno_mlrepo::kv::{KvStore, MemoryKvStore};
//!
//! # async fn example() -> trueno_mlrepo::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.set("obj:a#1", b"one".to_vec()).await?;
//! store.set("obj:a#0", b"zero".to_vec()).await?;
//! let records = store.scan_prefix("obj:a#").await?;
//! assert_eq!(records[0].0, "obj:a#0");
//!
//! // Merges never overwrite existing records
//! assert!(!store.set_if_absent("obj:a#0", b"other".to_vec()).await?);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "compression")]
mod compressed;
pub(crate) mod disk;
mod memory;

#[cfg(feature = "compression")]
pub use compressed::{CompressedKvStore, Compression};
pub use disk::DiskKvStore;
pub use memory::MemoryKvStore;

use crate::Result;
use std::future::Future;

/// Key-value store trait backing the repository's metadata records.
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Set a value for a key.
    ///
    /// Overwrites any existing value.
    fn set(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// All records whose key starts with `prefix`, sorted by key.
    fn scan_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<(String, Vec<u8>)>>> + Send;

    /// Insert only if the key is absent. Returns `true` if the value was written.
    fn set_if_absent(&self, key: &str, value: Vec<u8>)
        -> impl Future<Output = Result<bool>> + Send;
}
