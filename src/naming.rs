//! Naming convention resolver
//!
//! Derived artifacts are addressed by names composed from their inputs, so
//! the job runner can predict a name before the artifact exists:
//!
//! | Role | Name |
//! |---|---|
//! | model definition / data / any base object | `m` |
//! | model parameters | `m/model_param` |
//! | training parameters | `m/training_param` |
//! | calibrated model | `m/model` |
//! | evaluation of `m` on `d` | `m/eval/d` |
//! | measure `x` of that evaluation | `m/measure/d/x` |
//!
//! Segments are non-empty and contain neither `/` nor `#`, which makes
//! [`DerivedName`]'s `Display` and `FromStr` exact inverses.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

const MODEL_PARAM: &str = "model_param";
const TRAINING_PARAM: &str = "training_param";
const CALIBRATED: &str = "model";
const EVAL: &str = "eval";
const MEASURE: &str = "measure";

/// Role a [`DerivedName`] plays in the artifact graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameRole {
    /// Single-segment name (model definition, data, configuration)
    Base,
    /// Parameters of a model
    ModelParam,
    /// Training parameters of a model
    TrainingParam,
    /// Trained state of a model
    CalibratedModel,
    /// Model output on a data set
    EvalData,
    /// Scalar measure of an evaluation
    Measure,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Composition {
    Base(String),
    ModelParam(String),
    TrainingParam(String),
    CalibratedModel(String),
    EvalData { model: String, data: String },
    Measure { model: String, data: String, measure: String },
}

/// A composed lookup key, e.g. *measure `max` of model `m` on data `d`*.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedName(Composition);

fn segment(value: impl Into<String>) -> Result<String> {
    let value = value.into();
    if value.is_empty()
        || value.contains('/')
        || value.contains('#')
        || value.chars().any(char::is_control)
    {
        return Err(Error::InvalidName(format!(
            "'{value}' is not a valid name segment (empty, or contains '/', '#' or control characters)"
        )));
    }
    Ok(value)
}

impl DerivedName {
    /// Single-segment base name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn base(name: impl Into<String>) -> Result<Self> {
        Ok(Self(Composition::Base(segment(name)?)))
    }

    /// `model/model_param`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn model_param(model: impl Into<String>) -> Result<Self> {
        Ok(Self(Composition::ModelParam(segment(model)?)))
    }

    /// `model/training_param`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn training_param(model: impl Into<String>) -> Result<Self> {
        Ok(Self(Composition::TrainingParam(segment(model)?)))
    }

    /// `model/model`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn calibrated_model(model: impl Into<String>) -> Result<Self> {
        Ok(Self(Composition::CalibratedModel(segment(model)?)))
    }

    /// `model/eval/data`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn eval_data(model: impl Into<String>, data: impl Into<String>) -> Result<Self> {
        Ok(Self(Composition::EvalData {
            model: segment(model)?,
            data: segment(data)?,
        }))
    }

    /// `model/measure/data/measure`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] for an invalid segment.
    pub fn measure(
        model: impl Into<String>,
        data: impl Into<String>,
        measure: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self(Composition::Measure {
            model: segment(model)?,
            data: segment(data)?,
            measure: segment(measure)?,
        }))
    }

    /// Parse a stored name.
    ///
    /// # Errors
    /// Returns [`Error::InvalidName`] if `name` is outside the grammar.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('/').collect();
        let invalid = || Error::InvalidName(format!("'{name}' does not follow the naming convention"));
        match parts.as_slice() {
            [base] => Self::base(*base),
            [model, MODEL_PARAM] => Self::model_param(*model),
            [model, TRAINING_PARAM] => Self::training_param(*model),
            [model, CALIBRATED] => Self::calibrated_model(*model),
            [model, EVAL, data] => Self::eval_data(*model, *data),
            [model, MEASURE, data, measure] => Self::measure(*model, *data, *measure),
            _ => Err(invalid()),
        }
    }

    /// Role of this name.
    #[must_use]
    pub const fn role(&self) -> NameRole {
        match &self.0 {
            Composition::Base(_) => NameRole::Base,
            Composition::ModelParam(_) => NameRole::ModelParam,
            Composition::TrainingParam(_) => NameRole::TrainingParam,
            Composition::CalibratedModel(_) => NameRole::CalibratedModel,
            Composition::EvalData { .. } => NameRole::EvalData,
            Composition::Measure { .. } => NameRole::Measure,
        }
    }

    /// Model segment (`None` for base names).
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        match &self.0 {
            Composition::Base(_) => None,
            Composition::ModelParam(m)
            | Composition::TrainingParam(m)
            | Composition::CalibratedModel(m)
            | Composition::EvalData { model: m, .. }
            | Composition::Measure { model: m, .. } => Some(m),
        }
    }

    /// Data segment of evaluations and measures.
    #[must_use]
    pub fn data(&self) -> Option<&str> {
        match &self.0 {
            Composition::EvalData { data, .. } | Composition::Measure { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Measure segment.
    #[must_use]
    pub fn measure_name(&self) -> Option<&str> {
        match &self.0 {
            Composition::Measure { measure, .. } => Some(measure),
            _ => None,
        }
    }

    /// The evaluation a measure was computed on.
    #[must_use]
    pub fn evaluation(&self) -> Option<Self> {
        match &self.0 {
            Composition::Measure { model, data, .. } => Some(Self(Composition::EvalData {
                model: model.clone(),
                data: data.clone(),
            })),
            _ => None,
        }
    }

    /// The calibrated model behind any model-derived name.
    #[must_use]
    pub fn calibrated(&self) -> Option<Self> {
        self.model()
            .map(|m| Self(Composition::CalibratedModel(m.to_string())))
    }
}

impl fmt::Display for DerivedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Composition::Base(name) => f.write_str(name),
            Composition::ModelParam(m) => write!(f, "{m}/{MODEL_PARAM}"),
            Composition::TrainingParam(m) => write!(f, "{m}/{TRAINING_PARAM}"),
            Composition::CalibratedModel(m) => write!(f, "{m}/{CALIBRATED}"),
            Composition::EvalData { model, data } => write!(f, "{model}/{EVAL}/{data}"),
            Composition::Measure {
                model,
                data,
                measure,
            } => write!(f, "{model}/{MEASURE}/{data}/{measure}"),
        }
    }
}

impl FromStr for DerivedName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_grammar() {
        assert_eq!(DerivedName::model_param("m").unwrap().to_string(), "m/model_param");
        assert_eq!(DerivedName::training_param("m").unwrap().to_string(), "m/training_param");
        assert_eq!(DerivedName::calibrated_model("m").unwrap().to_string(), "m/model");
        assert_eq!(DerivedName::eval_data("m", "d").unwrap().to_string(), "m/eval/d");
        assert_eq!(DerivedName::measure("m", "d", "max").unwrap().to_string(), "m/measure/d/max");
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        for bad in ["", "m/", "m/other", "m/eval", "m/eval/d/x", "a/b/c", "m/measure/d", "m#1"] {
            assert!(
                matches!(DerivedName::parse(bad), Err(Error::InvalidName(_))),
                "'{bad}' should not parse"
            );
        }
    }

    #[test]
    fn test_keywords_as_segments_stay_unambiguous() {
        // a model called "eval" evaluated on data called "model"
        let name = DerivedName::eval_data("eval", "model").unwrap();
        assert_eq!(name.to_string(), "eval/eval/model");
        assert_eq!(DerivedName::parse("eval/eval/model").unwrap(), name);
    }

    #[test]
    fn test_navigation() {
        let measure = DerivedName::parse("m/measure/test/max").unwrap();
        assert_eq!(measure.role(), NameRole::Measure);
        assert_eq!(measure.evaluation().unwrap().to_string(), "m/eval/test");
        assert_eq!(measure.calibrated().unwrap().to_string(), "m/model");
        assert_eq!(measure.data(), Some("test"));
        assert_eq!(measure.measure_name(), Some("max"));
        assert_eq!(DerivedName::base("m").unwrap().calibrated(), None);
    }

    fn seg() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_.\\-]{1,12}"
    }

    fn composition() -> impl Strategy<Value = DerivedName> {
        prop_oneof![
            seg().prop_map(|s| DerivedName::base(s).unwrap()),
            seg().prop_map(|s| DerivedName::model_param(s).unwrap()),
            seg().prop_map(|s| DerivedName::training_param(s).unwrap()),
            seg().prop_map(|s| DerivedName::calibrated_model(s).unwrap()),
            (seg(), seg()).prop_map(|(m, d)| DerivedName::eval_data(m, d).unwrap()),
            (seg(), seg(), seg()).prop_map(|(m, d, x)| DerivedName::measure(m, d, x).unwrap()),
        ]
    }

    proptest! {
        #[test]
        fn prop_parse_inverts_derive(name in composition()) {
            prop_assert_eq!(DerivedName::parse(&name.to_string()).unwrap(), name);
        }

        #[test]
        fn prop_derive_inverts_parse(text in "[a-z]{1,4}(/[a-z_]{1,14}){0,3}") {
            if let Ok(name) = DerivedName::parse(&text) {
                prop_assert_eq!(name.to_string(), text);
            }
        }
    }
}
