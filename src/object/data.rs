//! Tabular data records

use crate::array::NumericArray;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub(crate) const X_DATA: &str = "x_data";
pub(crate) const Y_DATA: &str = "y_data";

/// Full numeric data: an x-matrix and an optional y-matrix with column names.
///
/// Invariants (checked on construction): the number of x column names equals
/// the x row width; if y is present it has as many rows as x and as many
/// columns as y column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    x_coord_names: Vec<String>,
    #[serde(default)]
    y_coord_names: Vec<String>,
    n_rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) x_data: Option<NumericArray>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) y_data: Option<NumericArray>,
}

impl RawData {
    /// Create raw data from an x-matrix and optional targets.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if column names or row counts disagree.
    pub fn new(
        x_data: NumericArray,
        x_coord_names: Vec<String>,
        y: Option<(NumericArray, Vec<String>)>,
    ) -> Result<Self> {
        check_columns("x", &x_data, &x_coord_names)?;
        let (y_data, y_coord_names) = match y {
            Some((y_data, names)) => {
                check_columns("y", &y_data, &names)?;
                if y_data.rows() != x_data.rows() {
                    return Err(Error::InvalidInput(format!(
                        "y has {} rows, x has {}",
                        y_data.rows(),
                        x_data.rows()
                    )));
                }
                (Some(y_data), names)
            }
            None => (None, Vec::new()),
        };
        Ok(Self {
            x_coord_names,
            y_coord_names,
            n_rows: x_data.rows(),
            x_data: Some(x_data),
            y_data,
        })
    }

    /// Names of the x columns.
    #[must_use]
    pub fn x_coord_names(&self) -> &[String] {
        &self.x_coord_names
    }

    /// Names of the y columns (empty without targets).
    #[must_use]
    pub fn y_coord_names(&self) -> &[String] {
        &self.y_coord_names
    }

    /// Row count, known even when the arrays are not loaded.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// x-matrix, present only on full retrieval.
    #[must_use]
    pub const fn x_data(&self) -> Option<&NumericArray> {
        self.x_data.as_ref()
    }

    /// y-matrix, present only on full retrieval and when targets exist.
    #[must_use]
    pub const fn y_data(&self) -> Option<&NumericArray> {
        self.y_data.as_ref()
    }

    /// Whether this data carries targets.
    #[must_use]
    pub fn has_targets(&self) -> bool {
        !self.y_coord_names.is_empty()
    }

    /// Metadata of the version produced by appending `x_rows`/`y_rows`.
    ///
    /// Arrays are not materialized; the payload store builds them.
    pub(crate) fn grown_by(&self, x_rows: &NumericArray, y_rows: Option<&NumericArray>) -> Result<Self> {
        check_appended(X_DATA, x_rows, &self.x_coord_names)?;
        match (y_rows, self.has_targets()) {
            (Some(y), true) => {
                check_appended(Y_DATA, y, &self.y_coord_names)?;
                if y.rows() != x_rows.rows() {
                    return Err(Error::InvalidInput(format!(
                        "appended y has {} rows, x has {}",
                        y.rows(),
                        x_rows.rows()
                    )));
                }
            }
            (None, false) => {}
            (Some(_), false) => {
                return Err(Error::InvalidInput(
                    "cannot append y rows to data without targets".to_string(),
                ))
            }
            (None, true) => {
                return Err(Error::InvalidInput(
                    "data has targets, appended rows need y values".to_string(),
                ))
            }
        }
        Ok(Self {
            x_coord_names: self.x_coord_names.clone(),
            y_coord_names: self.y_coord_names.clone(),
            n_rows: self.n_rows + x_rows.rows(),
            x_data: None,
            y_data: None,
        })
    }
}

fn check_appended(field: &str, rows: &NumericArray, names: &[String]) -> Result<()> {
    if rows.row_width() == names.len() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            field: field.to_string(),
            expected: vec![names.len()],
            actual: rows.trailing_shape(),
        })
    }
}

fn check_columns(axis: &str, data: &NumericArray, names: &[String]) -> Result<()> {
    if data.row_width() == names.len() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{axis} has {} columns but {} column names",
            data.row_width(),
            names.len()
        )))
    }
}

/// Row window `[start, end)` over a raw data object.
///
/// Only the reference and window are persisted. Column names are copied from
/// the referenced raw data on retrieval; the numeric arrays are sliced and
/// loaded on full retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    raw_data: String,
    start_index: usize,
    #[serde(default)]
    end_index: Option<usize>,
    #[serde(skip)]
    x_coord_names: Vec<String>,
    #[serde(skip)]
    y_coord_names: Vec<String>,
    #[serde(skip)]
    n_rows: usize,
    #[serde(skip)]
    pub(crate) x_data: Option<NumericArray>,
    #[serde(skip)]
    pub(crate) y_data: Option<NumericArray>,
}

impl DataSet {
    /// Window over `raw_data`; `end_index = None` runs to the last row.
    ///
    /// # Errors
    /// Returns error if `end_index < start_index`.
    pub fn new(raw_data: impl Into<String>, start_index: usize, end_index: Option<usize>) -> Result<Self> {
        if let Some(end) = end_index {
            if end < start_index {
                return Err(Error::InvalidInput(format!(
                    "data set window [{start_index}, {end}) is reversed"
                )));
            }
        }
        Ok(Self {
            raw_data: raw_data.into(),
            start_index,
            end_index,
            x_coord_names: Vec::new(),
            y_coord_names: Vec::new(),
            n_rows: 0,
            x_data: None,
            y_data: None,
        })
    }

    /// Data set covering every row of `raw_data`.
    #[must_use]
    pub fn full(raw_data: impl Into<String>) -> Self {
        Self {
            raw_data: raw_data.into(),
            start_index: 0,
            end_index: None,
            x_coord_names: Vec::new(),
            y_coord_names: Vec::new(),
            n_rows: 0,
            x_data: None,
            y_data: None,
        }
    }

    /// Referenced raw data name.
    #[must_use]
    pub fn raw_data(&self) -> &str {
        &self.raw_data
    }

    /// First row of the window.
    #[must_use]
    pub const fn start_index(&self) -> usize {
        self.start_index
    }

    /// End of the window (exclusive), `None` = last row.
    #[must_use]
    pub const fn end_index(&self) -> Option<usize> {
        self.end_index
    }

    /// x column names (filled on retrieval).
    #[must_use]
    pub fn x_coord_names(&self) -> &[String] {
        &self.x_coord_names
    }

    /// y column names (filled on retrieval).
    #[must_use]
    pub fn y_coord_names(&self) -> &[String] {
        &self.y_coord_names
    }

    /// Rows in the window (filled on retrieval).
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Sliced x-matrix (full retrieval only).
    #[must_use]
    pub const fn x_data(&self) -> Option<&NumericArray> {
        self.x_data.as_ref()
    }

    /// Sliced y-matrix (full retrieval only).
    #[must_use]
    pub const fn y_data(&self) -> Option<&NumericArray> {
        self.y_data.as_ref()
    }

    /// Copy column names from `raw` and, if its arrays are loaded, slice them.
    pub(crate) fn fill_from(&mut self, raw: &RawData) -> Result<()> {
        let end = self.end_index.unwrap_or(raw.n_rows()).min(raw.n_rows());
        let start = self.start_index.min(end);
        self.x_coord_names = raw.x_coord_names().to_vec();
        self.y_coord_names = raw.y_coord_names().to_vec();
        self.n_rows = end - start;
        self.x_data = raw.x_data().map(|x| x.slice_rows(start, end)).transpose()?;
        self.y_data = raw.y_data().map(|y| y.slice_rows(start, end)).transpose()?;
        Ok(())
    }

    /// Materialize the window as standalone raw data.
    ///
    /// # Errors
    /// Returns error if the arrays were not loaded (lightweight retrieval).
    pub fn to_raw_data(&self) -> Result<RawData> {
        let x = self.x_data.clone().ok_or_else(|| {
            Error::InvalidInput(format!(
                "data set over '{}' was retrieved without its payload",
                self.raw_data
            ))
        })?;
        let y = self
            .y_data
            .clone()
            .map(|y| (y, self.y_coord_names.clone()));
        RawData::new(x, self.x_coord_names.clone(), y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ten_rows() -> RawData {
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32]).collect();
        let y: Vec<Vec<f32>> = (0..10).map(|i| vec![2.0 * i as f32]).collect();
        RawData::new(
            NumericArray::from_rows(&rows).unwrap(),
            vec!["x0".into()],
            Some((NumericArray::from_rows(&y).unwrap(), vec!["y0".into()])),
        )
        .unwrap()
    }

    #[test]
    fn test_raw_data_invariants() {
        assert!(RawData::new(NumericArray::zeros(vec![3, 2]), vec!["a".into()], None).is_err());
        let mismatched_rows = RawData::new(
            NumericArray::zeros(vec![3, 1]),
            vec!["a".into()],
            Some((NumericArray::zeros(vec![4, 1]), vec!["t".into()])),
        );
        assert!(mismatched_rows.is_err());
        assert_eq!(ten_rows().n_rows(), 10);
    }

    #[test]
    fn test_data_set_window() {
        let raw = ten_rows();
        let mut window = DataSet::new("raw", 0, Some(2)).unwrap();
        window.fill_from(&raw).unwrap();
        assert_eq!(window.n_rows(), 2);
        assert_eq!(window.x_data().unwrap().rows(), 2);
        assert_eq!(window.y_data().unwrap().data(), &[0.0, 2.0]);

        let mut all = DataSet::full("raw");
        all.fill_from(&raw).unwrap();
        assert_eq!(all.x_data().unwrap().rows(), 10);
        assert_eq!(all.to_raw_data().unwrap().n_rows(), 10);
    }

    #[test]
    fn test_data_set_serializes_reference_only() {
        let mut window = DataSet::new("raw", 3, Some(5)).unwrap();
        window.fill_from(&ten_rows()).unwrap();
        let json = serde_json::to_value(&window).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"raw_data": "raw", "start_index": 3, "end_index": 5})
        );
    }

    #[test]
    fn test_grown_by_checks_targets() {
        let raw = ten_rows();
        let x = NumericArray::zeros(vec![2, 1]);
        assert!(raw.grown_by(&x, None).is_err());
        let grown = raw.grown_by(&x, Some(&NumericArray::zeros(vec![2, 1]))).unwrap();
        assert_eq!(grown.n_rows(), 12);
        assert!(grown.x_data().is_none());
    }
}
