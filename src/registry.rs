//! Explicit registry of user callables
//!
//! Model definitions and measure configurations refer to functions by name.
//! The job runner resolves those names here; nothing is loaded dynamically.

use crate::array::NumericArray;
use crate::object::{CalibratedModel, ParamValue, RawData};
use crate::{Error, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Evaluate a calibrated model on data, returning one prediction row per input row.
pub type EvalFn = Arc<dyn Fn(&CalibratedModel, &RawData) -> anyhow::Result<NumericArray> + Send + Sync>;

/// Train a model from `(model_param, training_param, training_data)`.
pub type TrainFn =
    Arc<dyn Fn(&ParamValue, &ParamValue, &RawData) -> anyhow::Result<CalibratedModel> + Send + Sync>;

/// Reduce `(predicted, actual)` values to a scalar measure.
pub type ReductionFn = Arc<dyn Fn(&[f32], &[f32]) -> anyhow::Result<f64> + Send + Sync>;

/// Name -> callable maps for evaluation, training and measure reductions.
#[derive(Default)]
pub struct FunctionRegistry {
    eval: DashMap<String, EvalFn>,
    train: DashMap<String, TrainFn>,
    reductions: DashMap<String, ReductionFn>,
}

impl FunctionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an evaluation function.
    pub fn register_eval<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&CalibratedModel, &RawData) -> anyhow::Result<NumericArray> + Send + Sync + 'static,
    {
        self.eval.insert(name.into(), Arc::new(f));
    }

    /// Register (or replace) a training function.
    pub fn register_training<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&ParamValue, &ParamValue, &RawData) -> anyhow::Result<CalibratedModel>
            + Send
            + Sync
            + 'static,
    {
        self.train.insert(name.into(), Arc::new(f));
    }

    /// Register (or replace) a measure reduction.
    pub fn register_reduction<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[f32], &[f32]) -> anyhow::Result<f64> + Send + Sync + 'static,
    {
        self.reductions.insert(name.into(), Arc::new(f));
    }

    /// Evaluation function registered under `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if nothing is registered.
    pub fn eval(&self, name: &str) -> Result<EvalFn> {
        lookup(&self.eval, "evaluation", name)
    }

    /// Training function registered under `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if nothing is registered.
    pub fn training(&self, name: &str) -> Result<TrainFn> {
        lookup(&self.train, "training", name)
    }

    /// Reduction registered under `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if nothing is registered.
    pub fn reduction(&self, name: &str) -> Result<ReductionFn> {
        lookup(&self.reductions, "reduction", name)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.eval.clear();
        self.train.clear();
        self.reductions.clear();
    }
}

fn lookup<T: Clone>(map: &DashMap<String, T>, kind: &str, name: &str) -> Result<T> {
    map.get(name)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| Error::InvalidInput(format!("no {kind} function registered as '{name}'")))
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("eval", &sorted_names(&self.eval))
            .field("train", &sorted_names(&self.train))
            .field("reductions", &sorted_names(&self.reductions))
            .finish()
    }
}

fn sorted_names<T>(map: &DashMap<String, T>) -> Vec<String> {
    let mut names: Vec<String> = map.iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}
