//! Row-major numeric arrays stored in the payload store
//!
//! The first axis is the row axis; it is the only axis that payload appends
//! may extend. A 1-D array is treated as a single column, so its trailing
//! shape normalizes to `[1]`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Dense `f32` array with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl NumericArray {
    /// Create an array from a shape and row-major data.
    ///
    /// # Errors
    /// Returns error if the shape is empty or does not match `data.len()`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        if shape.is_empty() {
            return Err(Error::InvalidInput(
                "array shape must have at least one axis".to_string(),
            ));
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidInput(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// 1-D array (a single column).
    #[must_use]
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// 2-D array from equally sized rows.
    ///
    /// # Errors
    /// Returns error if rows have different lengths.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(Error::InvalidInput(format!(
                "row {bad} has {} columns, expected {width}",
                rows[bad].len()
            )));
        }
        Ok(Self {
            shape: vec![rows.len(), width],
            data: rows.iter().flatten().copied().collect(),
        })
    }

    /// Array of zeros.
    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Full shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consume into row-major values.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Number of rows (first axis).
    #[must_use]
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Shape without the row axis; `[1]` for 1-D arrays.
    #[must_use]
    pub fn trailing_shape(&self) -> Vec<usize> {
        if self.shape.len() <= 1 {
            vec![1]
        } else {
            self.shape[1..].to_vec()
        }
    }

    /// Number of values per row.
    #[must_use]
    pub fn row_width(&self) -> usize {
        self.trailing_shape().iter().product()
    }

    /// Values of column `col` (2-D view over the flattened trailing axes).
    ///
    /// # Errors
    /// Returns error if `col` is out of bounds.
    pub fn column(&self, col: usize) -> Result<Vec<f32>> {
        let width = self.row_width();
        if col >= width {
            return Err(Error::InvalidInput(format!(
                "column {col} out of bounds (array has {width} columns)"
            )));
        }
        Ok(self.data.iter().skip(col).step_by(width).copied().collect())
    }

    /// Rows `[start, end)`; `end` is clamped to the row count.
    ///
    /// # Errors
    /// Returns error if `start > end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        let end = end.min(self.rows());
        if start > end {
            return Err(Error::InvalidInput(format!(
                "row window [{start}, {end}) is empty or reversed"
            )));
        }
        let width = self.row_width();
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = end - start;
        }
        Ok(Self {
            shape,
            data: self.data[start * width..end * width].to_vec(),
        })
    }

    /// Row-wise concatenation of `self` and `rows`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if the trailing shapes differ.
    pub fn append_rows(&self, field: &str, rows: &Self) -> Result<Self> {
        let expected = self.trailing_shape();
        let actual = rows.trailing_shape();
        if expected != actual {
            return Err(Error::ShapeMismatch {
                field: field.to_string(),
                expected,
                actual,
            });
        }
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first += rows.rows();
        }
        let mut data = Vec::with_capacity(self.data.len() + rows.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&rows.data);
        Ok(Self { shape, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_shape() {
        assert!(NumericArray::new(vec![2, 2], vec![1.0; 4]).is_ok());
        assert!(NumericArray::new(vec![2, 3], vec![1.0; 4]).is_err());
        assert!(NumericArray::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_vector_is_single_column() {
        let v = NumericArray::vector(vec![1.0, 2.0, 3.0]);
        assert_eq!(v.rows(), 3);
        assert_eq!(v.trailing_shape(), vec![1]);
        assert_eq!(v.column(0).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_append_rows_vector() {
        let a = NumericArray::vector(vec![1.0]);
        let b = a.append_rows("d", &NumericArray::vector(vec![2.0])).unwrap();
        let c = b.append_rows("d", &NumericArray::vector(vec![3.0])).unwrap();
        assert_eq!(c.data(), &[1.0, 2.0, 3.0]);
        assert_eq!(c.shape(), &[3]);
    }

    #[test]
    fn test_append_rows_shape_mismatch() {
        let a = NumericArray::zeros(vec![4, 3]);
        let err = a
            .append_rows("x_data", &NumericArray::zeros(vec![2, 2]))
            .unwrap_err();
        match err {
            Error::ShapeMismatch {
                field,
                expected,
                actual,
            } => {
                assert_eq!(field, "x_data");
                assert_eq!(expected, vec![3]);
                assert_eq!(actual, vec![2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_slice_and_column() {
        let rows: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, (i * 10) as f32]).collect();
        let m = NumericArray::from_rows(&rows).unwrap();
        let window = m.slice_rows(0, 2).unwrap();
        assert_eq!(window.rows(), 2);
        assert_eq!(window.column(1).unwrap(), vec![0.0, 10.0]);
        assert_eq!(m.slice_rows(8, 100).unwrap().rows(), 2);
        assert!(m.slice_rows(5, 3).is_err());
        assert!(m.column(2).is_err());
    }

    #[test]
    fn test_from_rows_ragged() {
        assert!(NumericArray::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
