//! Object store: the commit and versioning engine
//!
//! Every write goes through one commit path that, under a single lock:
//!
//! 1. assigns `latest + 1` (or 0) to every object in the batch,
//! 2. validates category consistency and lineage against the index,
//! 3. writes bulk payloads, then the metadata records, the category map
//!    (only when a name is new) and one [`Commit`] record,
//! 4. publishes the new versions to the in-memory index.
//!
//! Any failure before step 4 removes what was already written, so a rejected
//! batch leaves no trace.
//!
//! Toyota Way: Jidoka (stop the line on the first integrity violation)

mod commit;
mod mapping;
mod selector;

pub use commit::{Checkpoint, Commit};
pub use mapping::CategoryMap;
pub use selector::{Fetch, ModifierFilter, VersionSelector};

use crate::array::NumericArray;
use crate::kv::KvStore;
use crate::lineage;
use crate::object::{
    validate_name, Category, Payload, RepoInfo, RepoObject, MAPPING_NAME, X_DATA, Y_DATA,
};
use crate::payload::{Fields, PayloadStore};
use crate::{Error, Result};
use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

pub(crate) const OBJECT_PREFIX: &str = "obj:";
pub(crate) const COMMIT_PREFIX: &str = "commit#";
pub(crate) const CHECKPOINT_PREFIX: &str = "checkpoint#";

pub(crate) fn object_key(name: &str, version: u64) -> String {
    format!("{OBJECT_PREFIX}{name}#{version:020}")
}

fn commit_key(id: u64) -> String {
    format!("{COMMIT_PREFIX}{id:020}")
}

fn checkpoint_key(id: u64) -> String {
    format!("{CHECKPOINT_PREFIX}{id:020}")
}

/// Split `obj:{name}#{version}` into its parts.
pub(crate) fn parse_object_key(key: &str) -> Option<(&str, u64)> {
    let (name, version) = key.strip_prefix(OBJECT_PREFIX)?.rsplit_once('#')?;
    Some((name, version.parse().ok()?))
}

fn sequence_id(key: &str, prefix: &str) -> Option<u64> {
    key.strip_prefix(prefix)?.parse().ok()
}

// Metadata-only view of a record; the payload is skipped.
#[derive(Deserialize)]
struct InfoRecord {
    info: RepoInfo,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    category: Category,
    latest: u64,
}

#[derive(Debug, Default)]
struct StoreIndex {
    entries: FxHashMap<String, IndexEntry>,
    mapping: CategoryMap,
    next_commit: u64,
}

impl StoreIndex {
    fn latest(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|e| e.latest)
    }

    fn orphans(&self) -> Vec<(Category, String)> {
        let mut orphans: Vec<_> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != MAPPING_NAME && !self.mapping.contains(name))
            .map(|(name, entry)| (entry.category, name.clone()))
            .collect();
        orphans.sort_by(|a, b| a.1.cmp(&b.1));
        orphans
    }
}

/// How a pending object's bulk arrays reach the payload store.
#[derive(Debug)]
enum PayloadWrite {
    /// Store the arrays carried by the object itself
    Full,
    /// New version = `prev` with `rows` appended; `fields` lists every field
    Append {
        prev: u64,
        rows: Fields,
        fields: BTreeSet<String>,
    },
}

#[derive(Debug)]
struct Pending {
    object: RepoObject,
    write: PayloadWrite,
}

enum PayloadOp {
    Add(Fields),
    Append { prev: u64, rows: Fields },
}

/// Versioned object store over a metadata [`KvStore`] and a [`PayloadStore`].
#[derive(Debug)]
pub struct ObjectStore<S, P> {
    kv: S,
    payload: P,
    index: RwLock<StoreIndex>,
    commit_lock: Mutex<()>,
}

impl<S: KvStore, P: PayloadStore> ObjectStore<S, P> {
    /// Open a store, rebuilding the version index from `kv`.
    ///
    /// # Errors
    /// Returns error if existing records cannot be read or decoded.
    pub async fn open(kv: S, payload: P) -> Result<Self> {
        let index = build_index(&kv).await?;
        let store = Self {
            kv,
            payload,
            index: RwLock::new(index),
            commit_lock: Mutex::new(()),
        };
        let guard = store.commit_lock.lock().await;
        store.reconcile_mapping(&guard).await?;
        drop(guard);
        Ok(store)
    }

    /// Rebuild the index after records were inserted behind the store's back
    /// (e.g. a merge from a remote mirror).
    ///
    /// # Errors
    /// Returns error if records cannot be read or decoded.
    pub async fn reload(&self) -> Result<()> {
        let guard = self.commit_lock.lock().await;
        let index = build_index(&self.kv).await?;
        *self.index.write().await = index;
        self.reconcile_mapping(&guard).await
    }

    /// Bulk array backend.
    pub const fn payload_store(&self) -> &P {
        &self.payload
    }

    /// Commit a single object. Returns its new version.
    ///
    /// # Errors
    /// See [`ObjectStore::add_many`].
    pub async fn add(&self, object: RepoObject, message: &str) -> Result<u64> {
        let name = object.name().to_string();
        let commit = self.add_many(vec![object], message).await?;
        commit
            .version_of(&name)
            .ok_or_else(|| Error::Other(format!("commit {} lost '{name}'", commit.id())))
    }

    /// Commit several objects atomically as one [`Commit`].
    ///
    /// # Errors
    /// - [`Error::InvalidName`] for invalid names
    /// - [`Error::Integrity`] for duplicate names in the batch, a category
    ///   change of an existing name, lineage pointing at absent versions, or
    ///   a data set over something other than raw data
    /// - [`Error::DuplicateLabel`] if a label id would move to another model version
    /// - [`Error::NotFound`] / [`Error::InvalidInput`] if a label points at a
    ///   missing version or at something other than a calibrated model
    /// - backend errors; nothing stays written in any case
    pub async fn add_many(&self, objects: Vec<RepoObject>, message: &str) -> Result<Commit> {
        if objects.is_empty() {
            return Err(Error::InvalidInput("cannot commit an empty batch".to_string()));
        }
        for object in &objects {
            validate_name(object.name())?;
            if object.category() == Category::Mapping {
                return Err(Error::InvalidInput(format!(
                    "'{}': category {} is reserved",
                    object.name(),
                    Category::Mapping
                )));
            }
        }
        let pending = objects
            .into_iter()
            .map(|object| Pending {
                object,
                write: PayloadWrite::Full,
            })
            .collect();

        let guard = self.commit_lock.lock().await;
        self.commit_locked(&guard, pending, Vec::new(), message).await
    }

    /// Grow raw data by rows; the new version is committed like any add.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if `name` does not exist
    /// - [`Error::InvalidInput`] if `name` is not raw data or y rows are
    ///   missing, superfluous or of a different length than x rows
    /// - [`Error::ShapeMismatch`] if the rows do not match the stored columns
    pub async fn append_rows(
        &self,
        name: &str,
        x_rows: NumericArray,
        y_rows: Option<NumericArray>,
        message: &str,
    ) -> Result<u64> {
        let guard = self.commit_lock.lock().await;
        let prev = self.resolve_version(name, VersionSelector::Latest).await?;
        let current = self.load(name, prev).await?;
        let Payload::RawData(raw) = current.payload() else {
            return Err(Error::InvalidInput(format!(
                "'{name}' is not raw data; only raw data grows by rows"
            )));
        };
        let grown = raw.grown_by(&x_rows, y_rows.as_ref())?;

        let mut rows = Fields::new();
        rows.insert(X_DATA.to_string(), x_rows);
        if let Some(y) = y_rows {
            rows.insert(Y_DATA.to_string(), y);
        }
        let object = RepoObject::new(name, current.category(), Payload::RawData(grown))?
            .with_modification_info(current.info().modification_info().clone());
        let pending = Pending {
            object,
            write: PayloadWrite::Append {
                prev,
                rows,
                fields: current.info().big_objects().clone(),
            },
        };
        let commit = self
            .commit_locked(&guard, vec![pending], Vec::new(), message)
            .await?;
        commit
            .version_of(name)
            .ok_or_else(|| Error::Other(format!("commit {} lost '{name}'", commit.id())))
    }

    async fn reconcile_mapping(&self, guard: &MutexGuard<'_, ()>) -> Result<()> {
        let orphans = self.index.read().await.orphans();
        if orphans.is_empty() {
            return Ok(());
        }
        warn!(count = orphans.len(), "category map is missing names, recording a merge");
        self.commit_locked(guard, Vec::new(), orphans, "merge category map")
            .await
            .map(|_| ())
    }

    #[allow(clippy::too_many_lines)]
    async fn commit_locked(
        &self,
        _guard: &MutexGuard<'_, ()>,
        mut pending: Vec<Pending>,
        extra_members: Vec<(Category, String)>,
        message: &str,
    ) -> Result<Commit> {
        let now = Utc::now();
        let index = self.index.read().await;

        // versions
        let mut assigned: BTreeMap<String, u64> = BTreeMap::new();
        for p in &pending {
            let name = p.object.name();
            if assigned.contains_key(name) {
                return Err(Error::Integrity(format!(
                    "'{name}' appears more than once in one commit"
                )));
            }
            let version = match index.entries.get(name) {
                Some(entry) if entry.category != p.object.category() => {
                    return Err(Error::Integrity(format!(
                        "'{name}' is stored as {}, cannot add it as {}",
                        entry.category,
                        p.object.category()
                    )))
                }
                Some(entry) => entry.latest + 1,
                None => 0,
            };
            if let PayloadWrite::Append { prev, .. } = &p.write {
                if index.latest(name) != Some(*prev) {
                    return Err(Error::Integrity(format!(
                        "'{name}' moved past version {prev} before the append was committed"
                    )));
                }
            }
            assigned.insert(name.to_string(), version);
        }
        let batch_categories: BTreeMap<String, Category> = pending
            .iter()
            .map(|p| (p.object.name().to_string(), p.object.category()))
            .collect();
        let known = |producer: &str| assigned.get(producer).copied().or_else(|| index.latest(producer));

        let batch_raw: BTreeSet<String> = pending
            .iter()
            .filter(|p| matches!(p.object.payload(), Payload::RawData(_)))
            .map(|p| p.object.name().to_string())
            .collect();

        // data sets pin the raw data version they were created against
        for p in &mut pending {
            let Payload::DataSet(set) = p.object.payload() else {
                continue;
            };
            let raw = set.raw_data().to_string();
            let name = p.object.name().to_string();
            let pinned = match p.object.info().modifier_version(&raw) {
                Some(v) => v,
                None => {
                    let v = known(&raw).ok_or_else(|| {
                        Error::Integrity(format!(
                            "data set '{name}' references '{raw}', which is not stored data"
                        ))
                    })?;
                    p.object.info_mut().modification_info_mut().insert(raw.clone(), v);
                    v
                }
            };
            let holds_raw = if assigned.get(&raw) == Some(&pinned) {
                batch_raw.contains(&raw)
            } else if index.latest(&raw).is_some_and(|latest| pinned <= latest) {
                matches!(self.load(&raw, pinned).await?.payload(), Payload::RawData(_))
            } else {
                // dangling pins fail the lineage check below
                true
            };
            if !holds_raw {
                return Err(Error::Integrity(format!(
                    "data set '{name}' references '{raw}' version {pinned}, which holds no raw data"
                )));
            }
        }

        // labels never move and point at an existing calibrated model
        for p in &mut pending {
            let Payload::Label(label) = p.object.payload() else {
                continue;
            };
            let id = p.object.name().to_string();
            let (model, version) = (label.model().to_string(), label.model_version());
            if let Some(entry) = index.entries.get(&id) {
                if let Payload::Label(bound) = self.load(&id, entry.latest).await?.payload() {
                    if bound.model() != model || bound.model_version() != version {
                        return Err(Error::DuplicateLabel {
                            label: id,
                            model: bound.model().to_string(),
                            version: bound.model_version(),
                        });
                    }
                }
            }
            let target = batch_categories
                .get(&model)
                .copied()
                .or_else(|| index.entries.get(&model).map(|e| e.category));
            match target {
                Some(Category::CalibratedModel) => {}
                Some(other) => {
                    return Err(Error::InvalidInput(format!(
                        "labels point at calibrated models; '{model}' is {other}"
                    )))
                }
                None => return Err(Error::not_found(model, Some(version))),
            }
            if !known(&model).is_some_and(|latest| version <= latest) {
                return Err(Error::not_found(model, Some(version)));
            }
            match p.object.info().modifier_version(&model) {
                None => {
                    p.object.info_mut().modification_info_mut().insert(model, version);
                }
                Some(v) if v == version => {}
                Some(v) => {
                    return Err(Error::Integrity(format!(
                        "label '{id}' points at {model}@{version} but records {model}@{v} as its source"
                    )))
                }
            }
        }

        for p in &pending {
            lineage::validate_modifiers(p.object.info(), assigned[p.object.name()], &known)?;
        }

        let mut mapping = index.mapping.clone();
        let mut mapping_changed = false;
        for p in &pending {
            mapping_changed |= mapping.insert(p.object.category(), p.object.name());
        }
        for (category, name) in &extra_members {
            mapping_changed |= mapping.insert(*category, name);
        }
        let mapping_version = index.latest(MAPPING_NAME).map_or(0, |v| v + 1);
        let commit_id = index.next_commit;
        drop(index);

        // prepare every record before touching a backend
        let mut payload_ops = Vec::new();
        let mut records = Vec::new();
        let mut committed = BTreeMap::new();
        let mut categories = Vec::new();
        for Pending { mut object, write } in pending {
            let name = object.name().to_string();
            let version = assigned[&name];
            object.info_mut().stamp(version, message, now);
            let arrays = object.payload_mut().take_big_objects();
            match write {
                PayloadWrite::Full => {
                    object
                        .info_mut()
                        .set_big_objects(arrays.keys().cloned().collect());
                    if !arrays.is_empty() {
                        payload_ops.push((name.clone(), version, PayloadOp::Add(arrays)));
                    }
                }
                PayloadWrite::Append { prev, rows, fields } => {
                    object.info_mut().set_big_objects(fields);
                    payload_ops.push((name.clone(), version, PayloadOp::Append { prev, rows }));
                }
            }
            records.push((object_key(&name, version), serde_json::to_vec(&object)?));
            categories.push((name.clone(), object.category()));
            committed.insert(name, version);
        }
        if mapping_changed {
            let mut object = RepoObject::new(
                MAPPING_NAME,
                Category::Mapping,
                Payload::Mapping(mapping.clone()),
            )?;
            object.info_mut().stamp(mapping_version, message, now);
            records.push((
                object_key(MAPPING_NAME, mapping_version),
                serde_json::to_vec(&object)?,
            ));
            committed.insert(MAPPING_NAME.to_string(), mapping_version);
        }
        let commit = Commit::new(commit_id, message.to_string(), now, committed);
        records.push((commit_key(commit_id), serde_json::to_vec(&commit)?));

        // payloads first, metadata last; undo on the first failure
        let mut written_payloads = Vec::new();
        for (name, version, op) in &payload_ops {
            let result = match op {
                PayloadOp::Add(fields) => self.payload.add(name, *version, fields),
                PayloadOp::Append { prev, rows } => {
                    self.payload.append(name, *prev, *version, rows)
                }
            };
            if let Err(e) = result {
                self.rollback(&[], &written_payloads).await;
                return Err(e);
            }
            debug!(name = %name, version, "payload stored");
            written_payloads.push((name.clone(), *version));
        }
        let mut written_keys = Vec::new();
        for (key, bytes) in records {
            match self.kv.set_if_absent(&key, bytes).await {
                Ok(true) => written_keys.push(key),
                Ok(false) => {
                    self.rollback(&written_keys, &written_payloads).await;
                    return Err(Error::Integrity(format!(
                        "record {key} was written by another writer"
                    )));
                }
                Err(e) => {
                    self.rollback(&written_keys, &written_payloads).await;
                    return Err(e);
                }
            }
        }

        let mut index = self.index.write().await;
        for (name, category) in categories {
            let latest = commit.objects()[&name];
            index.entries.insert(name, IndexEntry { category, latest });
        }
        if mapping_changed {
            index.entries.insert(
                MAPPING_NAME.to_string(),
                IndexEntry {
                    category: Category::Mapping,
                    latest: mapping_version,
                },
            );
            index.mapping = mapping;
        }
        index.next_commit = commit_id + 1;
        drop(index);

        info!(
            commit = commit.id(),
            objects = commit.objects().len(),
            message = %commit.message(),
            "commit recorded"
        );
        Ok(commit)
    }

    async fn rollback(&self, keys: &[String], payloads: &[(String, u64)]) {
        for key in keys.iter().rev() {
            if let Err(e) = self.kv.delete(key).await {
                warn!(key = %key, error = %e, "rollback could not delete record");
            }
        }
        for (name, version) in payloads.iter().rev() {
            if let Err(e) = self.payload.remove(name, *version) {
                warn!(name = %name, version, error = %e, "rollback could not delete payload");
            }
        }
    }

    /// Concrete version a selector points at.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name or the exact version is absent.
    pub async fn resolve_version(&self, name: &str, selector: VersionSelector) -> Result<u64> {
        let latest = self
            .index
            .read()
            .await
            .latest(name)
            .ok_or_else(|| Error::not_found(name, None))?;
        selector.resolve(latest).ok_or_else(|| match selector {
            VersionSelector::Exact(v) => Error::not_found(name, Some(v)),
            _ => Error::not_found(name, None),
        })
    }

    async fn load(&self, name: &str, version: u64) -> Result<RepoObject> {
        let bytes = self
            .kv
            .get(&object_key(name, version))
            .await?
            .ok_or_else(|| Error::not_found(name, Some(version)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn load_big_objects(&self, object: &mut RepoObject) -> Result<()> {
        if object.info().big_objects().is_empty() {
            return Ok(());
        }
        let fields = self.payload.get(object.name(), object.version())?;
        object.payload_mut().restore_big_objects(fields);
        Ok(())
    }

    async fn finish(&self, mut object: RepoObject, fetch: Fetch) -> Result<RepoObject> {
        if fetch == Fetch::Full {
            self.load_big_objects(&mut object)?;
        }
        let raw_name = match object.payload() {
            Payload::DataSet(set) => Some(set.raw_data().to_string()),
            _ => None,
        };
        if let Some(raw_name) = raw_name {
            let raw_version = match object.info().modifier_version(&raw_name) {
                Some(v) => v,
                None => self.resolve_version(&raw_name, VersionSelector::Latest).await?,
            };
            let mut raw = self.load(&raw_name, raw_version).await?;
            if fetch == Fetch::Full {
                self.load_big_objects(&mut raw)?;
            }
            let Payload::RawData(raw_data) = raw.payload() else {
                return Err(Error::Integrity(format!(
                    "data set '{}' references '{raw_name}', which holds no raw data",
                    object.name()
                )));
            };
            if let Payload::DataSet(set) = object.payload_mut() {
                set.fill_from(raw_data)?;
            }
        }
        Ok(object)
    }

    /// Exactly one object.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name or version is absent.
    pub async fn get(&self, name: &str, selector: VersionSelector, fetch: Fetch) -> Result<RepoObject> {
        let version = self.resolve_version(name, selector).await?;
        let object = self.load(name, version).await?;
        self.finish(object, fetch).await
    }

    async fn resolve_filter(&self, filter: &ModifierFilter) -> Result<Vec<(String, u64)>> {
        let mut required = Vec::new();
        for (producer, selector) in filter.iter() {
            required.push((producer.to_string(), self.resolve_version(producer, selector).await?));
        }
        Ok(required)
    }

    /// Every version of `name` whose lineage satisfies `filter`, ascending.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` or a filtered producer version is absent.
    pub async fn get_matching(
        &self,
        name: &str,
        filter: &ModifierFilter,
        fetch: Fetch,
    ) -> Result<Vec<RepoObject>> {
        self.resolve_version(name, VersionSelector::Latest).await?;
        let required = self.resolve_filter(filter).await?;
        let mut matches = Vec::new();
        for (_, bytes) in self.kv.scan_prefix(&format!("{OBJECT_PREFIX}{name}#")).await? {
            let object: RepoObject = serde_json::from_slice(&bytes)?;
            if required
                .iter()
                .all(|(p, v)| object.info().modifier_version(p) == Some(*v))
            {
                matches.push(self.finish(object, fetch).await?);
            }
        }
        Ok(matches)
    }

    /// The single version of `name` satisfying `filter`.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if nothing matches
    /// - [`Error::AmbiguousMatch`] if several versions match
    pub async fn get_unique(&self, name: &str, filter: &ModifierFilter, fetch: Fetch) -> Result<RepoObject> {
        let mut matches = self.get_matching(name, filter, fetch).await?;
        match matches.len() {
            0 => Err(Error::not_found(name, None)),
            1 => Ok(matches.remove(0)),
            count => Err(Error::AmbiguousMatch {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Versions of `name` in `[start, end]` (both inclusive, open when `None`).
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` does not exist.
    pub async fn get_history(
        &self,
        name: &str,
        start: Option<u64>,
        end: Option<u64>,
        fetch: Fetch,
    ) -> Result<Vec<RepoObject>> {
        self.resolve_version(name, VersionSelector::Latest).await?;
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(u64::MAX);
        let mut history = Vec::new();
        for (key, bytes) in self.kv.scan_prefix(&format!("{OBJECT_PREFIX}{name}#")).await? {
            let in_range = parse_object_key(&key).is_some_and(|(_, v)| (start..=end).contains(&v));
            if in_range {
                let object: RepoObject = serde_json::from_slice(&bytes)?;
                history.push(self.finish(object, fetch).await?);
            }
        }
        Ok(history)
    }

    /// Member names of `category` in introduction order.
    pub async fn get_names(&self, category: Category) -> Vec<String> {
        self.index.read().await.mapping.names(category).to_vec()
    }

    /// Current category map.
    pub async fn category_map(&self) -> CategoryMap {
        self.index.read().await.mapping.clone()
    }

    /// All commits in sequence order.
    ///
    /// # Errors
    /// Returns error if a commit record cannot be decoded.
    pub async fn get_commits(&self) -> Result<Vec<Commit>> {
        self.kv
            .scan_prefix(COMMIT_PREFIX)
            .await?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }

    /// All checkpoints in sequence order.
    ///
    /// # Errors
    /// Returns error if a checkpoint record cannot be decoded.
    pub async fn get_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.kv
            .scan_prefix(CHECKPOINT_PREFIX)
            .await?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice(&bytes)?))
            .collect()
    }

    pub(crate) async fn record_checkpoint(&self, message: &str) -> Result<Checkpoint> {
        let _guard = self.commit_lock.lock().await;
        let id = self
            .kv
            .scan_prefix(CHECKPOINT_PREFIX)
            .await?
            .last()
            .and_then(|(key, _)| sequence_id(key, CHECKPOINT_PREFIX))
            .map_or(0, |last| last + 1);
        let last_commit = self.index.read().await.next_commit.checked_sub(1);
        let checkpoint = Checkpoint::new(id, message.to_string(), Utc::now(), last_commit);
        self.kv
            .set(&checkpoint_key(id), serde_json::to_vec(&checkpoint)?)
            .await?;
        info!(checkpoint = id, ?last_commit, "checkpoint recorded");
        Ok(checkpoint)
    }

    /// Stored versions of `name`, ascending.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` does not exist.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<u64>> {
        let latest = self.resolve_version(name, VersionSelector::Latest).await?;
        Ok((0..=latest).collect())
    }

    /// Latest version of `name`, if it exists.
    pub async fn latest_version(&self, name: &str) -> Option<u64> {
        self.index.read().await.latest(name)
    }

    /// Category of `name`, if it exists.
    pub async fn category_of(&self, name: &str) -> Option<Category> {
        self.index.read().await.entries.get(name).map(|e| e.category)
    }

    /// Latest version of the category map object.
    pub async fn mapping_version(&self) -> Option<u64> {
        self.latest_version(MAPPING_NAME).await
    }

    /// Metadata of every stored version of every object.
    pub(crate) async fn all_infos(&self) -> Result<Vec<RepoInfo>> {
        self.kv
            .scan_prefix(OBJECT_PREFIX)
            .await?
            .into_iter()
            .map(|(_, bytes)| Ok(serde_json::from_slice::<InfoRecord>(&bytes)?.info))
            .collect()
    }
}

// =============================================================================
// Record exchange with remote mirrors
// =============================================================================

impl<S: KvStore, P: PayloadStore> ObjectStore<S, P> {
    /// Every mirrored record (objects, commits, checkpoints), sorted by key.
    pub(crate) async fn export_records(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut records = Vec::new();
        for prefix in [CHECKPOINT_PREFIX, COMMIT_PREFIX, OBJECT_PREFIX] {
            records.extend(self.kv.scan_prefix(prefix).await?);
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    /// Merge foreign records insert-if-absent; existing keys are never
    /// overwritten. Returns the keys that were inserted.
    ///
    /// All records are decoded before the first write. If an insert, the
    /// index rebuild or the category map reconciliation fails, the inserted
    /// keys are removed and the previous index is restored.
    pub(crate) async fn merge_records(&self, records: Vec<(String, Vec<u8>)>) -> Result<Vec<String>> {
        let guard = self.commit_lock.lock().await;
        for (key, bytes) in &records {
            check_record(key, bytes)?;
        }

        let mut inserted = Vec::new();
        let mut outcome = Ok(());
        for (key, bytes) in records {
            match self.kv.set_if_absent(&key, bytes).await {
                Ok(true) => inserted.push(key),
                Ok(false) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        if outcome.is_ok() && !inserted.is_empty() {
            outcome = match build_index(&self.kv).await {
                Ok(index) => {
                    *self.index.write().await = index;
                    self.reconcile_mapping(&guard).await
                }
                Err(e) => Err(e),
            };
        }

        if let Err(e) = outcome {
            for key in &inserted {
                if let Err(cleanup) = self.kv.delete(key).await {
                    warn!(key = %key, error = %cleanup, "failed to remove merged record");
                }
            }
            *self.index.write().await = build_index(&self.kv).await?;
            return Err(e);
        }
        debug!(inserted = inserted.len(), "records merged");
        Ok(inserted)
    }
}

fn check_record(key: &str, bytes: &[u8]) -> Result<()> {
    if let Some(id) = sequence_id(key, COMMIT_PREFIX) {
        let commit: Commit = serde_json::from_slice(bytes)?;
        if commit.id() != id {
            return Err(Error::Integrity(format!("record '{key}' holds commit {}", commit.id())));
        }
    } else if let Some(id) = sequence_id(key, CHECKPOINT_PREFIX) {
        let checkpoint: Checkpoint = serde_json::from_slice(bytes)?;
        if checkpoint.id() != id {
            return Err(Error::Integrity(format!(
                "record '{key}' holds checkpoint {}",
                checkpoint.id()
            )));
        }
    } else if let Some((name, version)) = parse_object_key(key) {
        let record: InfoRecord = serde_json::from_slice(bytes)?;
        if record.info.name() != name || record.info.version() != version {
            return Err(Error::Integrity(format!(
                "record '{key}' holds {}@{}",
                record.info.name(),
                record.info.version()
            )));
        }
    } else {
        return Err(Error::InvalidInput(format!("unexpected record key '{key}'")));
    }
    Ok(())
}

async fn build_index<S: KvStore>(kv: &S) -> Result<StoreIndex> {
    let mut index = StoreIndex::default();
    for (key, bytes) in kv.scan_prefix(OBJECT_PREFIX).await? {
        let Some((name, version)) = parse_object_key(&key) else {
            warn!(key = %key, "skipping malformed object key");
            continue;
        };
        let record: InfoRecord = serde_json::from_slice(&bytes)?;
        let category = record.info.category();
        index
            .entries
            .entry(name.to_string())
            .and_modify(|entry| {
                if entry.category != category {
                    warn!(name, %category, stored = %entry.category, "category conflict between versions");
                }
                entry.latest = entry.latest.max(version);
            })
            .or_insert(IndexEntry {
                category,
                latest: version,
            });
    }
    if let Some(version) = index.latest(MAPPING_NAME) {
        if let Some(bytes) = kv.get(&object_key(MAPPING_NAME, version)).await? {
            let object: RepoObject = serde_json::from_slice(&bytes)?;
            if let Payload::Mapping(mapping) = object.into_payload() {
                index.mapping = mapping;
            }
        }
    }
    index.next_commit = kv
        .scan_prefix(COMMIT_PREFIX)
        .await?
        .iter()
        .filter_map(|(key, _)| sequence_id(key, COMMIT_PREFIX))
        .max()
        .map_or(0, |last| last + 1);
    debug!(
        names = index.entries.len(),
        next_commit = index.next_commit,
        "object index rebuilt"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::object::{CalibratedModel, DataSet, Label, ParamValue, RawData};
    use crate::payload::MemoryPayloadStore;

    async fn store() -> ObjectStore<MemoryKvStore, MemoryPayloadStore> {
        ObjectStore::open(MemoryKvStore::new(), MemoryPayloadStore::new())
            .await
            .unwrap()
    }

    fn params(name: &str, value: f64) -> RepoObject {
        RepoObject::new(name, Category::ModelParam, Payload::Params(ParamValue::from(value))).unwrap()
    }

    fn raw(name: &str, rows: usize) -> RepoObject {
        let x = NumericArray::from_rows(&(0..rows).map(|i| vec![i as f32]).collect::<Vec<_>>()).unwrap();
        let data = RawData::new(x, vec!["x".into()], None).unwrap();
        RepoObject::new(name, Category::RawData, Payload::RawData(data)).unwrap()
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(object_key("m/model", 3), "obj:m/model#00000000000000000003");
        assert_eq!(parse_object_key("obj:m/model#00000000000000000003"), Some(("m/model", 3)));
        assert_eq!(parse_object_key("commit#00000000000000000003"), None);
    }

    #[tokio::test]
    async fn test_versions_are_dense() {
        let store = store().await;
        for expected in 0..3 {
            assert_eq!(store.add(params("p", 1.0), "same").await.unwrap(), expected);
        }
        assert_eq!(store.list_versions("p").await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_mapping_bumps_only_for_new_names() {
        let store = store().await;
        store.add(params("p", 1.0), "first").await.unwrap();
        assert_eq!(store.mapping_version().await, Some(0));
        store.add(params("p", 2.0), "second").await.unwrap();
        assert_eq!(store.mapping_version().await, Some(0));
        store.add(params("q", 2.0), "third").await.unwrap();
        assert_eq!(store.mapping_version().await, Some(1));

        let commits = store.get_commits().await.unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[1].version_of(MAPPING_NAME), None);
        assert_eq!(commits[2].version_of(MAPPING_NAME), Some(1));
    }

    #[tokio::test]
    async fn test_category_change_rejected() {
        let store = store().await;
        store.add(params("p", 1.0), "first").await.unwrap();
        let other = RepoObject::new("p", Category::TrainingParam, Payload::Params(ParamValue::Null)).unwrap();
        assert!(matches!(store.add(other, "bad").await, Err(Error::Integrity(_))));
        assert_eq!(store.get_commits().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lineage_to_absent_version_rejected() {
        let store = store().await;
        store.add(params("p", 1.0), "first").await.unwrap();
        let derived = params("d", 0.0).with_modifier("p", 5);
        assert!(matches!(store.add(derived, "bad").await, Err(Error::Integrity(_))));
        assert_eq!(store.latest_version("d").await, None);
    }

    #[tokio::test]
    async fn test_batch_may_reference_itself() {
        let store = store().await;
        let commit = store
            .add_many(vec![params("a", 1.0), params("b", 2.0).with_modifier("a", 0)], "batch")
            .await
            .unwrap();
        assert_eq!(commit.version_of("a"), Some(0));
        assert_eq!(commit.version_of("b"), Some(0));
    }

    #[tokio::test]
    async fn test_data_set_pins_raw_version() {
        let store = store().await;
        store.add(raw("raw", 10), "raw").await.unwrap();
        let set = DataSet::new("raw", 2, Some(5)).unwrap();
        let object = RepoObject::new("train", Category::TrainingData, Payload::DataSet(set)).unwrap();
        store.add(object, "set").await.unwrap();
        store.add(raw("raw", 20), "more raw").await.unwrap();

        let train = store.get("train", VersionSelector::Latest, Fetch::Full).await.unwrap();
        assert_eq!(train.info().modifier_version("raw"), Some(0));
        let data = train.to_raw_data().unwrap();
        assert_eq!(data.n_rows(), 3);
        assert_eq!(data.x_data().unwrap().data(), &[2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_data_set_over_data_set_rejected() {
        let store = store().await;
        store.add(raw("raw", 10), "raw").await.unwrap();
        let train = RepoObject::new(
            "train",
            Category::TrainingData,
            Payload::DataSet(DataSet::new("raw", 0, Some(5)).unwrap()),
        )
        .unwrap();
        store.add(train, "train").await.unwrap();

        let nested = RepoObject::new(
            "sub",
            Category::TestData,
            Payload::DataSet(DataSet::new("train", 0, Some(2)).unwrap()),
        )
        .unwrap();
        let err = store.add(nested, "nested").await.unwrap_err();
        assert!(matches!(err, Error::Integrity(ref msg) if msg.contains("holds no raw data")), "{err}");
        assert!(store.latest_version("sub").await.is_none());
        assert_eq!(store.get_commits().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_data_set_over_raw_data_in_same_batch() {
        let store = store().await;
        let set = RepoObject::new(
            "train",
            Category::TrainingData,
            Payload::DataSet(DataSet::new("raw", 1, None).unwrap()),
        )
        .unwrap();
        store.add_many(vec![raw("raw", 4), set], "both").await.unwrap();

        let train = store.get("train", VersionSelector::Latest, Fetch::Full).await.unwrap();
        assert_eq!(train.info().modifier_version("raw"), Some(0));
        assert_eq!(train.to_raw_data().unwrap().n_rows(), 3);
    }

    fn calibrated(name: &str) -> RepoObject {
        RepoObject::new(
            name,
            Category::CalibratedModel,
            Payload::CalibratedModel(CalibratedModel::new(ParamValue::from(1.0))),
        )
        .unwrap()
    }

    fn label(id: &str, model: &str, version: u64) -> RepoObject {
        RepoObject::new(id, Category::Label, Payload::Label(Label::new(model, version))).unwrap()
    }

    #[tokio::test]
    async fn test_label_cannot_be_rebound() {
        let store = store().await;
        store.add(calibrated("m/model"), "fit").await.unwrap();
        store.add(calibrated("m/model"), "refit").await.unwrap();
        store.add(label("prod", "m/model", 0), "promote").await.unwrap();

        let err = store.add(label("prod", "m/model", 1), "move").await.unwrap_err();
        assert!(
            matches!(err, Error::DuplicateLabel { ref model, version: 0, .. } if model == "m/model"),
            "{err}"
        );
        assert_eq!(store.latest_version("prod").await, Some(0));

        // the same binding may be recorded again
        assert_eq!(store.add(label("prod", "m/model", 0), "again").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_label_target_must_exist() {
        let store = store().await;
        let err = store.add(label("ghost", "nope/model", 7), "ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { version: Some(7), .. }), "{err}");

        store.add(calibrated("m/model"), "fit").await.unwrap();
        let err = store.add(label("later", "m/model", 3), "later").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { version: Some(3), .. }), "{err}");

        store.add(params("p", 1.0), "p").await.unwrap();
        let err = store.add(label("param", "p", 0), "param").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{err}");
        assert!(store.get_names(Category::Label).await.is_empty());
    }

    #[tokio::test]
    async fn test_label_records_its_model_as_lineage() {
        let store = store().await;
        let commit = store
            .add_many(vec![calibrated("m/model"), label("prod", "m/model", 0)], "fit and promote")
            .await
            .unwrap();
        assert_eq!(commit.version_of("prod"), Some(0));

        let prod = store.get("prod", VersionSelector::Latest, Fetch::Metadata).await.unwrap();
        assert_eq!(prod.info().modifier_version("m/model"), Some(0));
    }

    #[tokio::test]
    async fn test_append_rows_grows_version() {
        let store = store().await;
        store.add(raw("raw", 2), "raw").await.unwrap();
        let v = store
            .append_rows("raw", NumericArray::from_rows(&[vec![9.0]]).unwrap(), None, "grow")
            .await
            .unwrap();
        assert_eq!(v, 1);
        let grown = store.get("raw", VersionSelector::Latest, Fetch::Full).await.unwrap();
        assert_eq!(grown.as_raw_data().unwrap().x_data().unwrap().data(), &[0.0, 1.0, 9.0]);
        let first = store.get("raw", VersionSelector::Earliest, Fetch::Full).await.unwrap();
        assert_eq!(first.as_raw_data().unwrap().n_rows(), 2);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let kv = MemoryKvStore::new();
        let payload = MemoryPayloadStore::new();
        let store = ObjectStore::open(kv, payload).await.unwrap();
        store.add(params("p", 1.0), "one").await.unwrap();
        store.add(params("p", 2.0), "two").await.unwrap();
        let ObjectStore { kv, payload, .. } = store;

        let reopened = ObjectStore::open(kv, payload).await.unwrap();
        assert_eq!(reopened.latest_version("p").await, Some(1));
        assert_eq!(reopened.get_names(Category::ModelParam).await, vec!["p".to_string()]);
        assert_eq!(reopened.add(params("p", 3.0), "three").await.unwrap(), 2);
        assert_eq!(reopened.get_commits().await.unwrap().last().unwrap().id(), 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_local_records_and_reconciles_mapping() {
        let origin = store().await;
        origin.add(params("a", 1.0), "a").await.unwrap();
        let replica = store().await;
        replica.add(params("b", 2.0), "b").await.unwrap();

        let inserted = replica
            .merge_records(origin.export_records().await.unwrap())
            .await
            .unwrap();
        assert_eq!(inserted, vec![object_key("a", 0)]);

        let mut names = replica.get_names(Category::ModelParam).await;
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(replica.mapping_version().await, Some(1));
        let commits = replica.get_commits().await.unwrap();
        assert_eq!(commits.last().unwrap().message(), "merge category map");
        assert_eq!(replica.get("b", VersionSelector::Latest, Fetch::Metadata).await.unwrap().version(), 0);
    }

    #[tokio::test]
    async fn test_merge_rejects_foreign_keys_before_writing() {
        let origin = store().await;
        origin.add(params("a", 1.0), "a").await.unwrap();
        let mut records = origin.export_records().await.unwrap();
        records.push(("settings".to_string(), b"{}".to_vec()));

        let replica = store().await;
        assert!(replica.merge_records(records).await.is_err());
        assert_eq!(replica.latest_version("a").await, None);
        assert!(replica.get_commits().await.unwrap().is_empty());
    }
}
