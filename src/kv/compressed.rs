//! Compressed KV store wrapper
//!
//! Transparent LZ4/ZSTD compression for any `KvStore` backend. Object
//! records are JSON and compress well; payload arrays never pass through here.

use crate::kv::KvStore;
use crate::Result;

/// Compression algorithm for stored records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// LZ4 - Fast compression (default)
    #[default]
    Lz4,
    /// ZSTD - Better ratio, slower
    Zstd,
}

impl Compression {
    /// Get algorithm name as string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Compress data using this algorithm
    ///
    /// # Errors
    /// Returns error if compression fails (e.g., ZSTD internal error)
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Zstd => zstd::encode_all(data, 3)
                .map_err(|e| crate::Error::StorageError(format!("ZSTD compression failed: {e}"))),
        }
    }

    /// Decompress data using this algorithm
    ///
    /// # Errors
    /// Returns error if decompression fails (e.g., corrupted data)
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| crate::Error::StorageError(format!("LZ4 decompression failed: {e}"))),
            Self::Zstd => zstd::decode_all(data)
                .map_err(|e| crate::Error::StorageError(format!("ZSTD decompression failed: {e}"))),
        }
    }
}

/// Wraps any `KvStore` and compresses values on the way in.
///
/// # Example
///
/// ```rust
/// use trueno_mlrepo::kv::{CompressedKvStore, Compression, MemoryKvStore};
/// use trueno_mlrepo::Repository;
///
/// # async fn example() -> trueno_mlrepo::Result<()> {
/// let kv = CompressedKvStore::new(MemoryKvStore::new(), Compression::Zstd);
/// let repo = Repository::open(kv, trueno_mlrepo::payload::MemoryPayloadStore::new(), Default::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CompressedKvStore<S: KvStore> {
    inner: S,
    compression: Compression,
}

impl<S: KvStore> CompressedKvStore<S> {
    /// Create a new compressed KV store wrapping the given store
    #[must_use]
    pub const fn new(inner: S, compression: Compression) -> Self {
        Self { inner, compression }
    }

    /// Get reference to inner store (for inspection/testing)
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Get compression algorithm
    #[must_use]
    pub const fn compression(&self) -> Compression {
        self.compression
    }
}

impl<S: KvStore> KvStore for CompressedKvStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.inner.get(key).await? {
            Some(compressed) => Ok(Some(self.compression.decompress(&compressed)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let compressed = self.compression.compress(&value)?;
        self.inner.set(key, compressed).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.inner
            .scan_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, value)| Ok((key, self.compression.decompress(&value)?)))
            .collect()
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let compressed = self.compression.compress(&value)?;
        self.inner.set_if_absent(key, compressed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    #[test]
    fn test_compression_as_str() {
        assert_eq!(Compression::Lz4.as_str(), "lz4");
        assert_eq!(Compression::Zstd.as_str(), "zstd");
    }

    #[test]
    fn test_empty_data_compression() {
        let empty: Vec<u8> = vec![];
        assert!(Compression::Lz4.compress(&empty).unwrap().is_empty());
        assert!(Compression::Zstd.decompress(&empty).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compressed_records_roundtrip_through_scan() {
        let store = CompressedKvStore::new(MemoryKvStore::new(), Compression::Lz4);
        let record = br#"{"name":"model","version":0,"payload":"aaaaaaaaaaaaaaaaaaaaaaaaaaaa"}"#.to_vec();

        store.set("obj:model#0", record.clone()).await.unwrap();
        assert!(!store.set_if_absent("obj:model#0", b"x".to_vec()).await.unwrap());

        let raw = store.inner().get("obj:model#0").await.unwrap().unwrap();
        assert_ne!(raw, record);

        let scanned = store.scan_prefix("obj:").await.unwrap();
        assert_eq!(scanned, vec![("obj:model#0".to_string(), record)]);
    }
}
