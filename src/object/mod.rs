//! Repository objects
//!
//! Every stored artifact is a [`RepoObject`]: lightweight [`RepoInfo`]
//! metadata plus a typed [`Payload`] record. The payload variant is fixed at
//! compile time per category; [`RepoObject::new`] is the factory that
//! rejects a payload kind the category does not admit.
//!
//! ## Big objects
//!
//! Bulk numeric fields (data matrices, predictions, model weights) are split
//! off on commit and stored in the [`PayloadStore`](crate::payload::PayloadStore).
//! `RepoInfo::big_objects` lists the stripped field names; they are loaded
//! back only when a caller asks for the full payload.

mod data;
mod params;
pub mod path;
mod records;

pub use data::{DataSet, RawData};
pub(crate) use data::{X_DATA, Y_DATA};
pub use params::ParamValue;
pub use records::{CalibratedModel, EvalData, Label, Measure, ModelDefinition};

use crate::array::NumericArray;
use crate::measure::MeasureConfiguration;
use crate::store::CategoryMap;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name reserved for the category map object.
pub const MAPPING_NAME: &str = "repo_mapping";

/// Role classification of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Full raw numeric data
    RawData,
    /// Data used to calibrate models
    TrainingData,
    /// Data used only for evaluation
    TestData,
    /// Model definition (registered evaluation/training functions)
    Model,
    /// Model parameters
    ModelParam,
    /// Training parameters
    TrainingParam,
    /// Trained model state
    CalibratedModel,
    /// Model output on a data set
    EvalData,
    /// Scalar measure on an evaluation
    Measure,
    /// Which measures to compute
    MeasureConfiguration,
    /// Stable alias for a model version
    Label,
    /// Reserved: the category map itself
    Mapping,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Self; 12] = [
        Self::RawData,
        Self::TrainingData,
        Self::TestData,
        Self::Model,
        Self::ModelParam,
        Self::TrainingParam,
        Self::CalibratedModel,
        Self::EvalData,
        Self::Measure,
        Self::MeasureConfiguration,
        Self::Label,
        Self::Mapping,
    ];

    /// Stored name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RawData => "RAW_DATA",
            Self::TrainingData => "TRAINING_DATA",
            Self::TestData => "TEST_DATA",
            Self::Model => "MODEL",
            Self::ModelParam => "MODEL_PARAM",
            Self::TrainingParam => "TRAINING_PARAM",
            Self::CalibratedModel => "CALIBRATED_MODEL",
            Self::EvalData => "EVAL_DATA",
            Self::Measure => "MEASURE",
            Self::MeasureConfiguration => "MEASURE_CONFIGURATION",
            Self::Label => "LABEL",
            Self::Mapping => "MAPPING",
        }
    }

    /// Whether a payload of `kind` may be stored under this category.
    #[must_use]
    pub const fn admits(&self, kind: PayloadKind) -> bool {
        match self {
            Self::RawData | Self::TrainingData | Self::TestData => {
                matches!(kind, PayloadKind::RawData | PayloadKind::DataSet)
            }
            Self::Model => matches!(kind, PayloadKind::Model),
            Self::ModelParam | Self::TrainingParam => matches!(kind, PayloadKind::Params),
            Self::CalibratedModel => matches!(kind, PayloadKind::CalibratedModel),
            Self::EvalData => matches!(kind, PayloadKind::EvalData),
            Self::Measure => matches!(kind, PayloadKind::Measure),
            Self::MeasureConfiguration => matches!(kind, PayloadKind::MeasureConfiguration),
            Self::Label => matches!(kind, PayloadKind::Label),
            Self::Mapping => matches!(kind, PayloadKind::Mapping),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of [`Payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// [`Payload::RawData`]
    RawData,
    /// [`Payload::DataSet`]
    DataSet,
    /// [`Payload::Model`]
    Model,
    /// [`Payload::Params`]
    Params,
    /// [`Payload::CalibratedModel`]
    CalibratedModel,
    /// [`Payload::EvalData`]
    EvalData,
    /// [`Payload::Measure`]
    Measure,
    /// [`Payload::MeasureConfiguration`]
    MeasureConfiguration,
    /// [`Payload::Label`]
    Label,
    /// [`Payload::Mapping`]
    Mapping,
}

/// Typed content of a repository object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum Payload {
    /// Full numeric data
    RawData(RawData),
    /// Row window over a raw data object
    DataSet(DataSet),
    /// Model definition
    Model(ModelDefinition),
    /// Model or training parameters
    Params(ParamValue),
    /// Trained model state
    CalibratedModel(CalibratedModel),
    /// Model output
    EvalData(EvalData),
    /// Scalar measure value
    Measure(Measure),
    /// Measures to compute
    MeasureConfiguration(MeasureConfiguration),
    /// Label pointer
    Label(Label),
    /// Category map
    Mapping(CategoryMap),
}

impl Payload {
    /// Discriminant of this payload.
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::RawData(_) => PayloadKind::RawData,
            Self::DataSet(_) => PayloadKind::DataSet,
            Self::Model(_) => PayloadKind::Model,
            Self::Params(_) => PayloadKind::Params,
            Self::CalibratedModel(_) => PayloadKind::CalibratedModel,
            Self::EvalData(_) => PayloadKind::EvalData,
            Self::Measure(_) => PayloadKind::Measure,
            Self::MeasureConfiguration(_) => PayloadKind::MeasureConfiguration,
            Self::Label(_) => PayloadKind::Label,
            Self::Mapping(_) => PayloadKind::Mapping,
        }
    }

    /// Remove and return the bulk numeric fields.
    pub(crate) fn take_big_objects(&mut self) -> BTreeMap<String, NumericArray> {
        let mut fields = BTreeMap::new();
        match self {
            Self::RawData(raw) => {
                if let Some(x) = raw.x_data.take() {
                    fields.insert(data::X_DATA.to_string(), x);
                }
                if let Some(y) = raw.y_data.take() {
                    fields.insert(data::Y_DATA.to_string(), y);
                }
            }
            // a data set's arrays always come from its raw data
            Self::DataSet(set) => {
                set.x_data = None;
                set.y_data = None;
            }
            Self::CalibratedModel(model) => {
                if let Some(w) = model.weights.take() {
                    fields.insert(records::WEIGHTS.to_string(), w);
                }
            }
            Self::EvalData(eval) => {
                if let Some(x) = eval.x_data.take() {
                    fields.insert(data::X_DATA.to_string(), x);
                }
            }
            _ => {}
        }
        fields
    }

    /// Put bulk numeric fields back after a full retrieval.
    pub(crate) fn restore_big_objects(&mut self, mut fields: BTreeMap<String, NumericArray>) {
        match self {
            Self::RawData(raw) => {
                raw.x_data = fields.remove(data::X_DATA);
                raw.y_data = fields.remove(data::Y_DATA);
            }
            Self::CalibratedModel(model) => model.weights = fields.remove(records::WEIGHTS),
            Self::EvalData(eval) => eval.x_data = fields.remove(data::X_DATA),
            _ => {}
        }
    }
}

/// Lightweight metadata of a repository object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    name: String,
    version: u64,
    category: Category,
    modification_info: BTreeMap<String, u64>,
    big_objects: BTreeSet<String>,
    commit_message: String,
    created_at: DateTime<Utc>,
}

impl RepoInfo {
    fn new(name: String, category: Category) -> Self {
        Self {
            name,
            version: 0,
            category,
            modification_info: BTreeMap::new(),
            big_objects: BTreeSet::new(),
            commit_message: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Object name (unique key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version assigned by the repository on commit.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Category of the object.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Producer name -> consumed producer version.
    #[must_use]
    pub const fn modification_info(&self) -> &BTreeMap<String, u64> {
        &self.modification_info
    }

    /// Version of `producer` this object was derived from, if recorded.
    #[must_use]
    pub fn modifier_version(&self, producer: &str) -> Option<u64> {
        self.modification_info.get(producer).copied()
    }

    /// Payload fields stored in the payload store.
    #[must_use]
    pub const fn big_objects(&self) -> &BTreeSet<String> {
        &self.big_objects
    }

    /// Message of the commit that created this version.
    #[must_use]
    pub fn commit_message(&self) -> &str {
        &self.commit_message
    }

    /// Commit timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn stamp(&mut self, version: u64, message: &str, at: DateTime<Utc>) {
        self.version = version;
        self.commit_message = message.to_string();
        self.created_at = at;
    }

    pub(crate) fn set_big_objects(&mut self, fields: BTreeSet<String>) {
        self.big_objects = fields;
    }

    pub(crate) fn modification_info_mut(&mut self) -> &mut BTreeMap<String, u64> {
        &mut self.modification_info
    }
}

/// A named, versioned, categorized artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoObject {
    info: RepoInfo,
    payload: Payload,
}

impl RepoObject {
    /// Create a new (uncommitted) object.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if `category` does not admit the payload.
    pub fn new(name: impl Into<String>, category: Category, payload: Payload) -> Result<Self> {
        let name = name.into();
        if !category.admits(payload.kind()) {
            return Err(Error::InvalidInput(format!(
                "category {category} does not admit a {:?} payload (object '{name}')",
                payload.kind()
            )));
        }
        Ok(Self {
            info: RepoInfo::new(name, category),
            payload,
        })
    }

    /// Record that this object was derived from `producer` at `version`.
    #[must_use]
    pub fn with_modifier(mut self, producer: impl Into<String>, version: u64) -> Self {
        self.info.modification_info.insert(producer.into(), version);
        self
    }

    /// Replace the whole lineage map.
    #[must_use]
    pub fn with_modification_info(mut self, info: BTreeMap<String, u64>) -> Self {
        self.info.modification_info = info;
        self
    }

    /// Metadata.
    #[must_use]
    pub const fn info(&self) -> &RepoInfo {
        &self.info
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Assigned version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.info.version
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.info.category
    }

    /// Typed content.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume into the typed content.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub(crate) fn info_mut(&mut self) -> &mut RepoInfo {
        &mut self.info
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Raw data view, if the payload is [`Payload::RawData`].
    #[must_use]
    pub const fn as_raw_data(&self) -> Option<&RawData> {
        match &self.payload {
            Payload::RawData(raw) => Some(raw),
            _ => None,
        }
    }

    /// Parameters, if the payload is [`Payload::Params`].
    #[must_use]
    pub const fn as_params(&self) -> Option<&ParamValue> {
        match &self.payload {
            Payload::Params(p) => Some(p),
            _ => None,
        }
    }

    /// Materialize tabular data (raw data or a loaded data set window).
    ///
    /// # Errors
    /// Returns error if the object is not tabular or its arrays are not loaded.
    pub fn to_raw_data(&self) -> Result<RawData> {
        match &self.payload {
            Payload::RawData(raw) if raw.x_data().is_some() => Ok(raw.clone()),
            Payload::DataSet(set) => set.to_raw_data(),
            Payload::RawData(_) => Err(Error::InvalidInput(format!(
                "'{}' was retrieved without its payload",
                self.info.name
            ))),
            _ => Err(Error::InvalidInput(format!(
                "'{}' ({}) is not tabular data",
                self.info.name, self.info.category
            ))),
        }
    }

    /// Measure value, if the payload is [`Payload::Measure`].
    #[must_use]
    pub const fn measure_value(&self) -> Option<f64> {
        match &self.payload {
            Payload::Measure(m) => Some(m.value),
            _ => None,
        }
    }
}

/// Validate a user supplied object name.
///
/// # Errors
/// Returns [`Error::InvalidName`] for empty names, names containing `#` or
/// control characters, and the reserved category map name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("name must not be empty".to_string()));
    }
    if name.contains('#') || name.chars().any(char::is_control) {
        return Err(Error::InvalidName(format!(
            "'{name}' contains '#' or control characters"
        )));
    }
    if name == MAPPING_NAME {
        return Err(Error::InvalidName(format!("'{MAPPING_NAME}' is reserved")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_rejects_wrong_payload() {
        let err = RepoObject::new(
            "m",
            Category::Measure,
            Payload::Params(ParamValue::Null),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let raw = RawData::new(NumericArray::zeros(vec![2, 1]), vec!["x".into()], None).unwrap();
        assert!(RepoObject::new("d", Category::TrainingData, Payload::RawData(raw)).is_ok());
    }

    #[test]
    fn test_take_and_restore_big_objects() {
        let raw = RawData::new(
            NumericArray::zeros(vec![3, 2]),
            vec!["a".into(), "b".into()],
            Some((NumericArray::zeros(vec![3, 1]), vec!["t".into()])),
        )
        .unwrap();
        let mut payload = Payload::RawData(raw.clone());
        let fields = payload.take_big_objects();
        assert_eq!(
            fields.keys().cloned().collect::<Vec<_>>(),
            vec!["x_data".to_string(), "y_data".to_string()]
        );
        let Payload::RawData(stripped) = &payload else {
            panic!("kind changed")
        };
        assert!(stripped.x_data().is_none());
        assert_eq!(stripped.n_rows(), 3);

        payload.restore_big_objects(fields);
        assert_eq!(payload, Payload::RawData(raw));
    }

    #[test]
    fn test_category_serialization() {
        let json = serde_json::to_string(&Category::CalibratedModel).unwrap();
        assert_eq!(json, "\"CALIBRATED_MODEL\"");
        for category in Category::ALL {
            assert_eq!(format!("\"{category}\""), serde_json::to_string(&category).unwrap());
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("model/eval/data").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a#1").is_err());
        assert!(validate_name(MAPPING_NAME).is_err());
    }
}
