//! Repository facade
//!
//! [`Repository`] ties together the object store, label registry, function
//! registry and job runner. Reads go straight to the object store; label
//! objects are routed through the label registry so that its duplicate check
//! applies to every write path.

use crate::array::NumericArray;
use crate::config::RepoConfig;
use crate::job::{CancelHandle, JobState, Stage};
use crate::kv::{DiskKvStore, KvStore, MemoryKvStore};
use crate::label::{normalize_model_name, LabelRegistry};
use crate::lineage::{LineageGraph, VersionRef};
use crate::naming::DerivedName;
use crate::object::path::PathExpr;
use crate::object::{Category, Label, ParamValue, Payload, RepoObject};
use crate::payload::{MemoryPayloadStore, ParquetPayloadStore, PayloadStore};
use crate::registry::FunctionRegistry;
use crate::store::{
    CategoryMap, Checkpoint, Commit, Fetch, ModifierFilter, ObjectStore, VersionSelector,
};
use crate::{Error, Result};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

/// Versioned ML artifact repository.
///
/// # Example
///
/// ```rust
/// use trueno_mlrepo::object::{Category, ParamValue, Payload, RepoObject};
/// use trueno_mlrepo::store::{Fetch, VersionSelector};
/// use trueno_mlrepo::Repository;
///
/// # async fn example() -> trueno_mlrepo::Result<()> {
/// let repo = Repository::in_memory().await?;
///
/// let params = ParamValue::record([("alpha", ParamValue::from(0.1))]);
/// let object = RepoObject::new("ridge/model_param", Category::ModelParam, Payload::Params(params))?;
/// assert_eq!(repo.add(object.clone(), "initial").await?, 0);
/// assert_eq!(repo.add(object, "unchanged").await?, 1);
///
/// let latest = repo.get("ridge/model_param", VersionSelector::Latest, Fetch::Metadata).await?;
/// assert_eq!(latest.version(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Repository<S = MemoryKvStore, P = MemoryPayloadStore> {
    pub(crate) store: ObjectStore<S, P>,
    pub(crate) labels: RwLock<LabelRegistry>,
    pub(crate) functions: FunctionRegistry,
    pub(crate) config: RepoConfig,
    pub(crate) jobs: JobState,
    pub(crate) cancel: CancelHandle,
}

impl Repository<MemoryKvStore, MemoryPayloadStore> {
    /// Fresh repository held entirely in memory.
    ///
    /// # Errors
    /// Infallible for empty stores; kept fallible for symmetry with `open`.
    pub async fn in_memory() -> Result<Self> {
        Self::open(MemoryKvStore::new(), MemoryPayloadStore::new(), RepoConfig::default()).await
    }
}

impl Repository<DiskKvStore, ParquetPayloadStore> {
    /// Open (creating if needed) an on-disk repository under `root`.
    ///
    /// Metadata records live in `root/records`, payloads in `root/payload`.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created or records are corrupt.
    pub async fn open_dir<T: AsRef<Path>>(root: T, config: RepoConfig) -> Result<Self> {
        let root = root.as_ref();
        let kv = DiskKvStore::open(root.join("records"))?;
        let payload = ParquetPayloadStore::open(root.join("payload"))?;
        Self::open(kv, payload, config).await
    }
}

impl<S: KvStore, P: PayloadStore> Repository<S, P> {
    /// Open a repository over the given backends.
    ///
    /// # Errors
    /// Returns error if existing records cannot be read or decoded.
    pub async fn open(kv: S, payload: P, config: RepoConfig) -> Result<Self> {
        let store = ObjectStore::open(kv, payload).await?;
        let repo = Self {
            store,
            labels: RwLock::new(LabelRegistry::new()),
            functions: FunctionRegistry::new(),
            config,
            jobs: JobState::default(),
            cancel: CancelHandle::default(),
        };
        repo.rebuild_labels().await?;
        info!(
            names = repo.store.category_map().await.len(),
            labels = repo.labels.read().await.len(),
            "repository opened"
        );
        Ok(repo)
    }

    /// Re-read every record (after out-of-band writes such as a merge).
    ///
    /// # Errors
    /// Returns error if records cannot be read or decoded.
    pub async fn reload(&self) -> Result<()> {
        self.store.reload().await?;
        self.rebuild_labels().await
    }

    pub(crate) async fn rebuild_labels(&self) -> Result<()> {
        let mut labels = Vec::new();
        for id in self.store.get_names(Category::Label).await {
            let object = self
                .store
                .get(&id, VersionSelector::Latest, Fetch::Metadata)
                .await?;
            if let Payload::Label(label) = object.into_payload() {
                labels.push((id, label));
            }
        }
        *self.labels.write().await =
            LabelRegistry::from_labels(labels.iter().map(|(id, label)| (id.clone(), label)));
        Ok(())
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Underlying object store.
    ///
    /// Labels written directly through the store show up in
    /// [`Repository::get_label`] after [`Repository::reload`].
    #[must_use]
    pub const fn store(&self) -> &ObjectStore<S, P> {
        &self.store
    }

    /// Registry of evaluation, training and reduction functions.
    #[must_use]
    pub const fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Flag that stops a running stage between iterations.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stage currently running, if any.
    #[must_use]
    pub fn running_stage(&self) -> Option<Stage> {
        self.jobs.current()
    }

    /// Drop every registered function and release the repository.
    pub fn close(self) {
        self.functions.clear();
        info!("repository closed");
    }

    // ===== writes =====

    /// Commit one object; returns its version.
    ///
    /// # Errors
    /// See [`Repository::add_many`].
    pub async fn add(&self, object: RepoObject, message: &str) -> Result<u64> {
        let name = object.name().to_string();
        let commit = self.add_many(vec![object], message).await?;
        commit
            .version_of(&name)
            .ok_or_else(|| Error::Other(format!("commit {} lost '{name}'", commit.id())))
    }

    /// Commit several objects atomically.
    ///
    /// # Errors
    /// - [`Error::Integrity`] / [`Error::InvalidName`] from commit validation
    /// - [`Error::DuplicateLabel`] if a label object rebinds an existing id
    pub async fn add_many(&self, objects: Vec<RepoObject>, message: &str) -> Result<Commit> {
        let mut labels = self.labels.write().await;
        let mut new_labels = Vec::new();
        for object in &objects {
            if let Payload::Label(label) = object.payload() {
                if !labels.admit(object.name(), label.model(), label.model_version())? {
                    new_labels.push((object.name().to_string(), label.clone()));
                }
            }
        }
        let commit = self.store.add_many(objects, message).await?;
        for (id, label) in &new_labels {
            labels.insert(id.clone(), label);
        }
        Ok(commit)
    }

    /// Append rows to raw data, producing a new version.
    ///
    /// # Errors
    /// See [`ObjectStore::append_rows`].
    pub async fn append_rows(
        &self,
        name: &str,
        x_rows: NumericArray,
        y_rows: Option<NumericArray>,
        message: &str,
    ) -> Result<u64> {
        self.store.append_rows(name, x_rows, y_rows, message).await
    }

    // ===== reads =====

    /// Exactly one object.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the name or version is absent.
    pub async fn get(&self, name: &str, selector: VersionSelector, fetch: Fetch) -> Result<RepoObject> {
        self.store.get(name, selector, fetch).await
    }

    /// Every version of `name` whose lineage satisfies `filter`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` or a filtered producer is absent.
    pub async fn get_matching(
        &self,
        name: &str,
        filter: &ModifierFilter,
        fetch: Fetch,
    ) -> Result<Vec<RepoObject>> {
        self.store.get_matching(name, filter, fetch).await
    }

    /// The single version of `name` satisfying `filter`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] or [`Error::AmbiguousMatch`].
    pub async fn get_unique(&self, name: &str, filter: &ModifierFilter, fetch: Fetch) -> Result<RepoObject> {
        self.store.get_unique(name, filter, fetch).await
    }

    /// Versions of `name` in `[start, end]`.
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
        self.store.get_history(name, start, end, fetch).await
    }

    /// Names in `category`.
    pub async fn get_names(&self, category: Category) -> Vec<String> {
        self.store.get_names(category).await
    }

    /// Commit log.
    ///
    /// # Errors
    /// Returns error if a commit record cannot be decoded.
    pub async fn get_commits(&self) -> Result<Vec<Commit>> {
        self.store.get_commits().await
    }

    /// Checkpoints recorded by [`Repository::checkpoint`].
    ///
    /// # Errors
    /// Returns error if a record cannot be decoded.
    pub async fn get_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        self.store.get_checkpoints().await
    }

    /// Stored versions of `name`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `name` does not exist.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<u64>> {
        self.store.list_versions(name).await
    }

    /// Latest version of `name`.
    pub async fn latest_version(&self, name: &str) -> Option<u64> {
        self.store.latest_version(name).await
    }

    /// Current category map.
    pub async fn category_map(&self) -> CategoryMap {
        self.store.category_map().await
    }

    /// Resolve a path such as `layers[1]/units` inside a parameter object or
    /// the state of a calibrated model.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the object is absent
    /// - [`Error::InvalidInput`] for a malformed path, a path that does not
    ///   resolve, or an object without parameters
    pub async fn param_value(&self, name: &str, selector: VersionSelector, path: &str) -> Result<ParamValue> {
        let expr = PathExpr::parse(path)?;
        let object = self.store.get(name, selector, Fetch::Metadata).await?;
        let root = match object.payload() {
            Payload::Params(params) => params,
            Payload::CalibratedModel(model) => &model.state,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "'{name}' ({}) holds no parameters",
                    object.category()
                )))
            }
        };
        expr.eval(root).cloned()
    }

    /// Value of measure `measure` of `model` on `data`, paired with the
    /// calibrated model version it was computed for, oldest first.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the measure was never computed.
    pub async fn measure_history(&self, model: &str, data: &str, measure: &str) -> Result<Vec<(u64, f64)>> {
        let base = DerivedName::parse(&normalize_model_name(model))?
            .model()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidName(format!("'{model}' is not a model name")))?;
        let measure_name = DerivedName::measure(&base, data, measure)?.to_string();
        let calibrated = DerivedName::calibrated_model(&base)?.to_string();
        let history = self
            .store
            .get_history(&measure_name, None, None, Fetch::Metadata)
            .await?;
        Ok(history
            .iter()
            .filter_map(|m| Some((m.info().modifier_version(&calibrated)?, m.measure_value()?)))
            .collect())
    }

    // ===== labels =====

    /// Bind `label_id` to `model@version`; returns the label object's version.
    ///
    /// Bare model names are normalized (`m` -> `m/model`). Re-creating an
    /// identical binding is a no-op.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the model version does not exist
    /// - [`Error::DuplicateLabel`] if the id is bound elsewhere
    pub async fn create_label(&self, model: &str, version: u64, label_id: &str, message: &str) -> Result<u64> {
        let model = normalize_model_name(model);
        self.store
            .resolve_version(&model, VersionSelector::Exact(version))
            .await?;
        if self.store.category_of(&model).await != Some(Category::CalibratedModel) {
            return Err(Error::InvalidInput(format!(
                "labels point at calibrated models; '{model}' is not one"
            )));
        }
        let object = RepoObject::new(label_id, Category::Label, Payload::Label(Label::new(&model, version)))?
            .with_modifier(model.clone(), version);

        let mut labels = self.labels.write().await;
        if labels.admit(label_id, &model, version)? {
            return self
                .store
                .resolve_version(label_id, VersionSelector::Latest)
                .await;
        }
        let created = self.store.add(object, message).await?;
        labels.insert(label_id.to_string(), &Label::new(&model, version));
        info!(label = label_id, model = %model, version, "label created");
        Ok(created)
    }

    /// A label bound to `model@version`.
    pub async fn get_label(&self, model: &str, version: u64) -> Option<String> {
        self.labels
            .read()
            .await
            .get_label(model, version)
            .map(str::to_string)
    }

    /// Model and version a label points at.
    pub async fn model_for_label(&self, label_id: &str) -> Option<(String, u64)> {
        self.labels
            .read()
            .await
            .model_for_label(label_id)
            .map(|(m, v)| (m.to_string(), v))
    }

    // ===== lineage =====

    /// Snapshot of the lineage relation.
    ///
    /// # Errors
    /// Returns error if records cannot be read or decoded.
    pub async fn lineage(&self) -> Result<LineageGraph> {
        self.store.lineage().await
    }

    /// Transitive inputs of `name@version`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub async fn ancestors(&self, name: &str, version: u64) -> Result<Vec<VersionRef>> {
        self.lineage().await?.ancestors(name, version)
    }

    /// Transitive outputs of `name@version`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub async fn descendants(&self, name: &str, version: u64) -> Result<Vec<VersionRef>> {
        self.lineage().await?.descendants(name, version)
    }

    /// Whether some input of `name@version` has a newer version.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the version is not stored.
    pub async fn is_stale(&self, name: &str, version: u64) -> Result<bool> {
        self.lineage().await?.is_stale(name, version)
    }

    /// Verify version density and lineage references of every record.
    ///
    /// # Errors
    /// Returns [`Error::Integrity`] listing every violation.
    pub async fn check_integrity(&self) -> Result<()> {
        self.lineage().await?.check_integrity()
    }
}
