//! Model, evaluation, measure and label records

use super::ParamValue;
use crate::array::NumericArray;
use serde::{Deserialize, Serialize};

pub(crate) const WEIGHTS: &str = "weights";

/// Model definition: names of the registered functions that evaluate and
/// train it. The functions themselves live in the
/// [`FunctionRegistry`](crate::registry::FunctionRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    eval_function: String,
    #[serde(default)]
    train_function: Option<String>,
}

impl ModelDefinition {
    /// Model that can be evaluated but not trained by the repository.
    #[must_use]
    pub fn new(eval_function: impl Into<String>) -> Self {
        Self {
            eval_function: eval_function.into(),
            train_function: None,
        }
    }

    /// Attach a registered training function.
    #[must_use]
    pub fn with_training(mut self, train_function: impl Into<String>) -> Self {
        self.train_function = Some(train_function.into());
        self
    }

    /// Registered evaluation function name.
    #[must_use]
    pub fn eval_function(&self) -> &str {
        &self.eval_function
    }

    /// Registered training function name.
    #[must_use]
    pub fn train_function(&self) -> Option<&str> {
        self.train_function.as_deref()
    }
}

/// Trained model state: structured values plus optional bulk weights.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibratedModel {
    /// Structured model state (coefficients, hyper-parameters, ...)
    #[serde(default)]
    pub state: ParamValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) weights: Option<NumericArray>,
}

impl CalibratedModel {
    /// Model state without bulk weights.
    #[must_use]
    pub const fn new(state: ParamValue) -> Self {
        Self {
            state,
            weights: None,
        }
    }

    /// Attach bulk weights (stored in the payload store).
    #[must_use]
    pub fn with_weights(mut self, weights: NumericArray) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Bulk weights, present only on full retrieval.
    #[must_use]
    pub const fn weights(&self) -> Option<&NumericArray> {
        self.weights.as_ref()
    }
}

/// Output of a model evaluated on a data set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalData {
    x_coord_names: Vec<String>,
    n_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) x_data: Option<NumericArray>,
}

impl EvalData {
    /// Wrap model output; columns are named after the data's targets.
    #[must_use]
    pub fn new(x_data: NumericArray, x_coord_names: Vec<String>) -> Self {
        Self {
            x_coord_names,
            n_rows: x_data.rows(),
            x_data: Some(x_data),
        }
    }

    /// Output column names.
    #[must_use]
    pub fn x_coord_names(&self) -> &[String] {
        &self.x_coord_names
    }

    /// Number of predicted rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Predictions, present only on full retrieval.
    #[must_use]
    pub const fn x_data(&self) -> Option<&NumericArray> {
        self.x_data.as_ref()
    }
}

/// Scalar measure of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// Measure value
    pub value: f64,
}

/// Immutable pointer from a label id (the object name) to a model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    model: String,
    model_version: u64,
}

impl Label {
    /// Label pointing at `model` version `model_version`.
    #[must_use]
    pub fn new(model: impl Into<String>, model_version: u64) -> Self {
        Self {
            model: model.into(),
            model_version,
        }
    }

    /// Referenced (calibrated) model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Pinned model version.
    #[must_use]
    pub const fn model_version(&self) -> u64 {
        self.model_version
    }
}
