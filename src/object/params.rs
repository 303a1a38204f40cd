//! Structured parameter values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A structured parameter record (model parameters, training parameters,
/// calibrated model state).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Absent value
    #[default]
    Null,
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Text(String),
    /// Ordered list
    List(Vec<ParamValue>),
    /// Named fields
    Record(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Build a record from `(field, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Field of a record.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Element of a list.
    #[must_use]
    pub fn index(&self, idx: usize) -> Option<&Self> {
        match self {
            Self::List(items) => items.get(idx),
            _ => None,
        }
    }

    /// Numeric value (integers widen to `f64`).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Self>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_json_shape() {
        let params = ParamValue::record([
            ("learning_rate", ParamValue::from(0.01)),
            ("layers", ParamValue::from(vec![64_i64, 32])),
            ("name", ParamValue::from("mlp")),
        ]);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"layers": [64, 32], "learning_rate": 0.01, "name": "mlp"})
        );
        let back: ParamValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_accessors() {
        let params = ParamValue::record([("depth", ParamValue::Int(3))]);
        assert_eq!(params.field("depth").and_then(ParamValue::as_i64), Some(3));
        assert_eq!(params.field("depth").and_then(ParamValue::as_f64), Some(3.0));
        assert!(params.field("missing").is_none());
        assert!(params.index(0).is_none());
    }
}
