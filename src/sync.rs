//! Remote mirrors: checkpoint, push and pull
//!
//! A mirror exchanges the metadata records of a repository (objects, commits,
//! checkpoints). Both directions are insert-if-absent: a record that already
//! exists on the receiving side is never overwritten. Bulk payloads are not
//! transferred; replicas that pull each other's objects share one payload
//! store.
//!
//! Remote calls are the only operations with unbounded latency, so every
//! attempt runs under [`RepoConfig::remote_timeout`](crate::RepoConfig) and
//! is retried up to `remote_retries` times. A failed pull leaves the local
//! repository exactly as it was.
//!
//! # Example
//!
//! ```rust
//! use trueno_mlrepo::kv::MemoryKvStore;
//! use trueno_mlrepo::object::{Category, ParamValue, Payload, RepoObject};
//! use trueno_mlrepo::sync::KvRemote;
//! use trueno_mlrepo::Repository;
//!
//! # async fn example() -> trueno_mlrepo::Result<()> {
//! let remote = KvRemote::new(MemoryKvStore::new());
//!
//! let origin = Repository::in_memory().await?;
//! let params = RepoObject::new("m/model_param", Category::ModelParam, Payload::Params(ParamValue::from(1.0)))?;
//! origin.add(params, "initial").await?;
//! origin.checkpoint("release").await?;
//! origin.push(&remote).await?;
//!
//! let replica = Repository::in_memory().await?;
//! replica.pull(&remote).await?;
//! assert_eq!(replica.latest_version("m/model_param").await, Some(0));
//! # Ok(())
//! # }
//! ```

use crate::config::RepoConfig;
use crate::kv::{DiskKvStore, KvStore};
use crate::payload::PayloadStore;
use crate::repository::Repository;
use crate::store::Checkpoint;
use crate::{Error, Result};
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

/// Record exchange with a remote mirror.
pub trait RemoteMirror: Send + Sync {
    /// Every record held by the mirror.
    fn fetch(&self) -> impl Future<Output = Result<Vec<(String, Vec<u8>)>>> + Send;

    /// Store the records the mirror does not have yet; returns how many were new.
    fn publish(&self, records: Vec<(String, Vec<u8>)>) -> impl Future<Output = Result<usize>> + Send;
}

/// Mirror kept in any [`KvStore`].
#[derive(Debug, Default)]
pub struct KvRemote<K> {
    kv: K,
}

/// Mirror in a directory, e.g. on a shared or synchronized file system.
pub type DirectoryRemote = KvRemote<DiskKvStore>;

impl<K: KvStore> KvRemote<K> {
    /// Wrap `kv` as a mirror.
    pub const fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Underlying store.
    pub const fn kv(&self) -> &K {
        &self.kv
    }
}

impl DirectoryRemote {
    /// Open (creating if needed) a mirror rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open<T: AsRef<Path>>(root: T) -> Result<Self> {
        Ok(Self::new(DiskKvStore::open(root)?))
    }
}

impl<K: KvStore> RemoteMirror for KvRemote<K> {
    async fn fetch(&self) -> Result<Vec<(String, Vec<u8>)>> {
        self.kv.scan_prefix("").await
    }

    async fn publish(&self, records: Vec<(String, Vec<u8>)>) -> Result<usize> {
        let mut written = 0;
        for (key, value) in records {
            if self.kv.set_if_absent(&key, value).await? {
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Run `call` under the configured timeout, retrying failed attempts.
async fn with_retries<T, F, Fut>(config: &RepoConfig, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.remote_retries.saturating_add(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match tokio::time::timeout(config.remote_timeout(), call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("timed out after {} ms", config.remote_timeout_ms),
        }
        warn!(operation, attempt, attempts, error = %last_error, "remote call failed");
    }
    Err(Error::RemoteSync(format!(
        "{operation} failed after {attempts} attempt(s): {last_error}"
    )))
}

impl<S: KvStore, P: PayloadStore> Repository<S, P> {
    /// Verify lineage integrity and record a checkpoint of the commit log.
    ///
    /// # Errors
    /// Returns [`Error::Integrity`] if any record has dangling lineage or a
    /// version gap; nothing is recorded in that case.
    pub async fn checkpoint(&self, message: &str) -> Result<Checkpoint> {
        self.check_integrity().await?;
        self.store.record_checkpoint(message).await
    }

    /// Publish every local record to `remote`; returns how many were new there.
    ///
    /// # Errors
    /// Returns [`Error::RemoteSync`] if the mirror stays unreachable.
    pub async fn push<R: RemoteMirror>(&self, remote: &R) -> Result<usize> {
        let records = self.store.export_records().await?;
        let total = records.len();
        let written = with_retries(&self.config, "push", || remote.publish(records.clone())).await?;
        info!(total, written, "pushed to remote");
        Ok(written)
    }

    /// Merge the records of `remote` into this repository.
    ///
    /// Keys present locally are kept as they are. The version index, category
    /// map and label registry are rebuilt afterwards. Returns the number of
    /// inserted records.
    ///
    /// # Errors
    /// Returns [`Error::RemoteSync`] if the mirror stays unreachable or its
    /// records cannot be merged; local state is unchanged in both cases.
    pub async fn pull<R: RemoteMirror>(&self, remote: &R) -> Result<usize> {
        let records = with_retries(&self.config, "pull", || remote.fetch()).await?;
        let fetched = records.len();
        let inserted = self
            .store
            .merge_records(records)
            .await
            .map_err(|e| Error::RemoteSync(format!("merge rejected: {e}")))?;
        if let Err(e) = self.rebuild_labels().await {
            warn!(error = %e, "label registry rebuild failed after pull");
            return Err(Error::RemoteSync(format!("label rebuild failed: {e}")));
        }
        debug!(keys = ?inserted, "merged records");
        info!(fetched, inserted = inserted.len(), "pulled from remote");
        Ok(inserted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::object::{Category, ParamValue, Payload, RepoObject};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyRemote {
        failures_left: AtomicU32,
        inner: KvRemote<MemoryKvStore>,
    }

    impl RemoteMirror for FlakyRemote {
        async fn fetch(&self) -> Result<Vec<(String, Vec<u8>)>> {
            if self
                .failures_left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::StorageError("connection reset".into()));
            }
            self.inner.fetch().await
        }

        async fn publish(&self, records: Vec<(String, Vec<u8>)>) -> Result<usize> {
            self.inner.publish(records).await
        }
    }

    struct StalledRemote;

    impl RemoteMirror for StalledRemote {
        async fn fetch(&self) -> Result<Vec<(String, Vec<u8>)>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn publish(&self, _records: Vec<(String, Vec<u8>)>) -> Result<usize> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(0)
        }
    }

    fn params(name: &str, value: f64) -> RepoObject {
        RepoObject::new(name, Category::ModelParam, Payload::Params(ParamValue::from(value))).unwrap()
    }

    async fn repo(config: RepoConfig) -> Repository {
        Repository::open(
            MemoryKvStore::new(),
            crate::payload::MemoryPayloadStore::new(),
            config,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let remote = FlakyRemote {
            failures_left: AtomicU32::new(2),
            inner: KvRemote::new(MemoryKvStore::new()),
        };
        let origin = repo(RepoConfig::default()).await;
        origin.add(params("p", 1.0), "one").await.unwrap();
        origin.push(&remote.inner).await.unwrap();

        let replica = repo(RepoConfig::builder().remote_retries(2).build()).await;
        assert!(replica.pull(&remote).await.unwrap() > 0);
        assert_eq!(replica.latest_version("p").await, Some(0));
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_state_unchanged() {
        let remote = FlakyRemote {
            failures_left: AtomicU32::new(5),
            inner: KvRemote::new(MemoryKvStore::new()),
        };
        let replica = repo(RepoConfig::builder().remote_retries(1).build()).await;
        replica.add(params("local", 1.0), "local").await.unwrap();

        let err = replica.pull(&remote).await.unwrap_err();
        assert!(matches!(err, Error::RemoteSync(ref msg) if msg.contains("2 attempt")));
        assert_eq!(replica.get_commits().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_remote_sync_error() {
        let replica = repo(
            RepoConfig::builder()
                .remote_timeout_ms(20)
                .remote_retries(0)
                .build(),
        )
        .await;
        let err = replica.pull(&StalledRemote).await.unwrap_err();
        assert!(matches!(err, Error::RemoteSync(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_corrupt_remote_record_is_rejected() {
        let remote = KvRemote::new(MemoryKvStore::new());
        remote
            .kv()
            .set("obj:p#00000000000000000000", b"not json".to_vec())
            .await
            .unwrap();
        let replica = repo(RepoConfig::default()).await;

        assert!(matches!(replica.pull(&remote).await, Err(Error::RemoteSync(_))));
        assert_eq!(replica.latest_version("p").await, None);
    }

    #[tokio::test]
    async fn test_push_is_insert_if_absent() {
        let remote = KvRemote::new(MemoryKvStore::new());
        let origin = repo(RepoConfig::default()).await;
        origin.add(params("p", 1.0), "one").await.unwrap();

        let first = origin.push(&remote).await.unwrap();
        assert!(first > 0);
        assert_eq!(origin.push(&remote).await.unwrap(), 0);
    }
}
