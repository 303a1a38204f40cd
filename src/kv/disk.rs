//! File-per-key KV store.
//!
//! Keys are hex encoded into file names so arbitrary object names (which may
//! contain `/`) map onto a flat directory. Writes go to a temporary file that
//! is then renamed (or hard-linked for insert-if-absent), so readers never
//! observe a half-written record.

use super::KvStore;
use crate::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const TEMP_PREFIX: &str = ".tmp-";

/// Persistent key-value store rooted at a directory.
#[derive(Debug)]
pub struct DiskKvStore {
    root: PathBuf,
    temp_counter: AtomicU64,
}

impl DiskKvStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::StorageError(format!("Failed to create KV directory {}: {e}", root.display()))
        })?;
        Ok(Self {
            root,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!("{TEMP_PREFIX}{}-{n}", std::process::id()))
    }

    async fn write_temp(&self, value: &[u8]) -> Result<PathBuf> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, value).await?;
        Ok(temp)
    }
}

impl KvStore for DiskKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let temp = self.write_temp(&value).await?;
        tokio::fs::rename(&temp, self.path_for(key)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(decode_key) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            match tokio::fs::read(entry.path()).await {
                Ok(bytes) => records.push((key, bytes)),
                // deleted between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool> {
        let temp = self.write_temp(&value).await?;
        let linked = match tokio::fs::hard_link(&temp, self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        };
        // the record is already in place; a stale temp file is only clutter
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            warn!(path = %temp.display(), error = %e, "could not remove temp file");
        }
        linked
    }
}

pub(crate) fn encode_key(key: &str) -> String {
    use std::fmt::Write;
    key.bytes().fold(String::with_capacity(key.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn decode_key(name: &str) -> Option<String> {
    if name.starts_with(TEMP_PREFIX) || name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_roundtrip() {
        for key in ["obj:model/eval/data#00000000000000000001", "", "commit#1", "ü/x"] {
            assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        }
        assert_eq!(decode_key(".tmp-1-2"), None);
        assert_eq!(decode_key("abc"), None);
    }

    #[tokio::test]
    async fn test_disk_kv_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskKvStore::open(dir.path()).unwrap();
            store.set("obj:a/b#1", b"payload".to_vec()).await.unwrap();
        }
        let reopened = DiskKvStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("obj:a/b#1").await.unwrap(),
            Some(b"payload".to_vec())
        );
    }

    #[tokio::test]
    async fn test_disk_kv_scan_and_set_if_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskKvStore::open(dir.path()).unwrap();

        assert!(store.set_if_absent("obj:x#1", b"1".to_vec()).await.unwrap());
        assert!(!store.set_if_absent("obj:x#1", b"2".to_vec()).await.unwrap());
        store.set("obj:x#0", b"0".to_vec()).await.unwrap();
        store.set("commit#0", b"c".to_vec()).await.unwrap();

        let records = store.scan_prefix("obj:").await.unwrap();
        assert_eq!(
            records,
            vec![
                ("obj:x#0".to_string(), b"0".to_vec()),
                ("obj:x#1".to_string(), b"1".to_vec()),
            ]
        );

        store.delete("obj:x#0").await.unwrap();
        assert_eq!(store.get("obj:x#0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_reports_outcome_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskKvStore::open(dir.path()).unwrap();

        assert!(store.set_if_absent("commit#7", b"first".to_vec()).await.unwrap());
        assert!(!store.set_if_absent("commit#7", b"second".to_vec()).await.unwrap());
        assert_eq!(store.get("commit#7").await.unwrap(), Some(b"first".to_vec()));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![encode_key("commit#7")]);
    }
}
