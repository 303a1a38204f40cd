//! Measure configuration and SIMD reductions
//!
//! A [`MeasureConfiguration`] object lists the measures the job runner
//! computes for every evaluation. Built-in kinds reduce
//! `(predicted, actual)` column pairs with trueno's SIMD kernels; any other
//! reduction is looked up by name in the
//! [`FunctionRegistry`](crate::registry::FunctionRegistry).
//!
//! Toyota Way: Genchi Genbutsu (compensated summation, checked against the
//! scalar result in tests)

use crate::array::NumericArray;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trueno::Vector;

/// Reduction applied to predicted vs. actual values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    /// `max |p - a|`
    MaxError,
    /// `mean (p - a)^2`
    MeanSquaredError,
    /// `mean |p - a|`
    MeanAbsoluteError,
    /// User reduction registered under this name
    Registered(String),
}

/// One configured measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSpec {
    kind: MeasureKind,
    #[serde(default)]
    coordinates: Option<Vec<String>>,
}

impl MeasureSpec {
    /// Measure over every predicted coordinate.
    #[must_use]
    pub const fn new(kind: MeasureKind) -> Self {
        Self {
            kind,
            coordinates: None,
        }
    }

    /// Restrict to a subset of coordinates.
    #[must_use]
    pub fn on<I, T>(mut self, coordinates: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.coordinates = Some(coordinates.into_iter().map(Into::into).collect());
        self
    }

    /// Reduction kind.
    #[must_use]
    pub const fn kind(&self) -> &MeasureKind {
        &self.kind
    }

    /// Coordinate subset, `None` = all.
    #[must_use]
    pub fn coordinates(&self) -> Option<&[String]> {
        self.coordinates.as_deref()
    }
}

/// Named measures to compute for each evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MeasureConfiguration {
    measures: BTreeMap<String, MeasureSpec>,
}

impl MeasureConfiguration {
    /// Empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the measure called `name`.
    ///
    /// `name` becomes the last segment of the stored measure names.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, spec: MeasureSpec) -> Self {
        self.measures.insert(name.into(), spec);
        self
    }

    /// Measures in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MeasureSpec)> {
        self.measures.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Measure called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MeasureSpec> {
        self.measures.get(name)
    }

    /// Number of measures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.measures.len()
    }

    /// Whether no measure is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

/// Apply a built-in reduction.
///
/// # Errors
/// - [`Error::InvalidInput`] for [`MeasureKind::Registered`] or unequal lengths
/// - [`Error::Compute`] for empty input or a failed SIMD kernel
pub fn reduce(kind: &MeasureKind, predicted: &[f32], actual: &[f32]) -> Result<f64> {
    if predicted.len() != actual.len() {
        return Err(Error::InvalidInput(format!(
            "predicted has {} values, actual has {}",
            predicted.len(),
            actual.len()
        )));
    }
    if predicted.is_empty() {
        return Err(Error::Compute("cannot reduce empty columns".to_string()));
    }
    let n = predicted.len() as f64;
    let diffs: Vec<f32> = predicted.iter().zip(actual).map(|(p, a)| p - a).collect();
    match kind {
        MeasureKind::MaxError => {
            let abs: Vec<f32> = diffs.iter().map(|d| d.abs()).collect();
            let max = Vector::from_slice(&abs)
                .max()
                .ok()
                .ok_or_else(|| Error::Compute("SIMD max failed".to_string()))?;
            Ok(f64::from(max))
        }
        MeasureKind::MeanSquaredError => {
            let squared: Vec<f32> = diffs.iter().map(|d| d * d).collect();
            Ok(f64::from(simd_sum(&squared)?) / n)
        }
        MeasureKind::MeanAbsoluteError => {
            let abs: Vec<f32> = diffs.iter().map(|d| d.abs()).collect();
            Ok(f64::from(simd_sum(&abs)?) / n)
        }
        MeasureKind::Registered(name) => Err(Error::InvalidInput(format!(
            "'{name}' is a registered reduction, not a built-in"
        ))),
    }
}

fn simd_sum(values: &[f32]) -> Result<f32> {
    let vector = Vector::from_slice(values);
    // compensated summation misbehaves on non-finite input
    let sum = if values.iter().all(|v| v.is_finite()) {
        vector.sum_kahan().ok()
    } else {
        vector.sum().ok()
    };
    sum.ok_or_else(|| Error::Compute("SIMD sum failed".to_string()))
}

/// Flatten the selected coordinates of both arrays, column by column.
///
/// `coordinates = None` selects every predicted coordinate. Each selected
/// name must exist in both arrays and both arrays must have the same rows.
///
/// # Errors
/// Returns [`Error::InvalidInput`] for unknown coordinates or unequal rows.
pub fn aligned_columns(
    predicted: (&NumericArray, &[String]),
    actual: (&NumericArray, &[String]),
    coordinates: Option<&[String]>,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let (p_data, p_names) = predicted;
    let (a_data, a_names) = actual;
    if p_data.rows() != a_data.rows() {
        return Err(Error::InvalidInput(format!(
            "predicted has {} rows, actual has {}",
            p_data.rows(),
            a_data.rows()
        )));
    }
    let selected = coordinates.unwrap_or(p_names);
    let position = |names: &[String], coord: &str, side: &str| {
        names.iter().position(|n| n == coord).ok_or_else(|| {
            Error::InvalidInput(format!("coordinate '{coord}' missing from {side} values"))
        })
    };

    let mut p_out = Vec::with_capacity(selected.len() * p_data.rows());
    let mut a_out = Vec::with_capacity(selected.len() * a_data.rows());
    for coord in selected {
        p_out.extend(p_data.column(position(p_names, coord, "predicted")?)?);
        a_out.extend(a_data.column(position(a_names, coord, "actual")?)?);
    }
    Ok((p_out, a_out))
}
