//! Parquet-backed payload store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <hex(key)>/<version>/<hex(field)>.parquet   one Float32 column per row slot
//! <hex(key)>/<version>/shapes.json            field -> full shape (written last)
//! ```
//!
//! `shapes.json` doubles as the commit marker: a version without it is
//! treated as absent. Appends are materialized, so reads never replay.

use super::{concat_fields, Fields, PayloadStore};
use crate::array::NumericArray;
use crate::kv::disk::encode_key;
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SHAPES_FILE: &str = "shapes.json";

/// Payload store writing every version as Parquet files.
#[derive(Debug)]
pub struct ParquetPayloadStore {
    root: PathBuf,
}

impl ParquetPayloadStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::StorageError(format!(
                "Failed to create payload directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    fn version_dir(&self, key: &str, version: u64) -> PathBuf {
        self.root.join(encode_key(key)).join(version.to_string())
    }

    fn write_version(&self, key: &str, version: u64, fields: &Fields) -> Result<()> {
        let dir = self.version_dir(key, version);
        if dir.join(SHAPES_FILE).exists() {
            return Err(Error::Integrity(format!(
                "payload for {key}@{version} already stored"
            )));
        }
        std::fs::create_dir_all(&dir)?;
        let mut shapes = BTreeMap::new();
        for (field, array) in fields {
            write_array(&dir.join(format!("{}.parquet", encode_key(field))), array)?;
            shapes.insert(field.clone(), array.shape().to_vec());
        }
        std::fs::write(dir.join(SHAPES_FILE), serde_json::to_vec(&shapes)?)?;
        tracing::debug!(key, version, fields = fields.len(), "payload version written");
        Ok(())
    }
}

impl PayloadStore for ParquetPayloadStore {
    fn add(&self, key: &str, version: u64, fields: &Fields) -> Result<()> {
        self.write_version(key, version, fields)
    }

    fn append(&self, key: &str, prev_version: u64, new_version: u64, rows: &Fields) -> Result<()> {
        let base = self.get(key, prev_version)?;
        let merged = concat_fields(key, prev_version, &base, rows)?;
        self.write_version(key, new_version, &merged)
    }

    fn get(&self, key: &str, version: u64) -> Result<Fields> {
        let dir = self.version_dir(key, version);
        let shapes_path = dir.join(SHAPES_FILE);
        if !shapes_path.exists() {
            return Err(Error::not_found(key, Some(version)));
        }
        let shapes: BTreeMap<String, Vec<usize>> =
            serde_json::from_slice(&std::fs::read(shapes_path)?)?;
        shapes
            .into_iter()
            .map(|(field, shape)| {
                let path = dir.join(format!("{}.parquet", encode_key(&field)));
                Ok((field, read_array(&path, shape)?))
            })
            .collect()
    }

    fn contains(&self, key: &str, version: u64) -> Result<bool> {
        Ok(self.version_dir(key, version).join(SHAPES_FILE).exists())
    }

    fn remove(&self, key: &str, version: u64) -> Result<()> {
        let dir = self.version_dir(key, version);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_array(path: &Path, array: &NumericArray) -> Result<()> {
    let width = array.row_width();
    let schema = Arc::new(Schema::new(
        (0..width)
            .map(|j| Field::new(format!("c{j}"), DataType::Float32, false))
            .collect::<Vec<_>>(),
    ));
    if width == 0 {
        // nothing to store; the shape alone reconstructs the array
        return Ok(());
    }
    let columns: Vec<ArrayRef> = (0..width)
        .map(|j| {
            Arc::new(Float32Array::from_iter_values(
                array.data().iter().skip(j).step_by(width).copied(),
            )) as ArrayRef
        })
        .collect();
    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let file = File::create(path).map_err(|e| {
        Error::StorageError(format!("Failed to create Parquet file {}: {e}", path.display()))
    })?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn read_array(path: &Path, shape: Vec<usize>) -> Result<NumericArray> {
    let total: usize = shape.iter().product();
    let rows = shape.first().copied().unwrap_or(0);
    if total == 0 {
        return NumericArray::new(shape, Vec::new());
    }
    let width = total / rows;

    let file = File::open(path).map_err(|e| {
        Error::StorageError(format!("Failed to open Parquet file {}: {e}", path.display()))
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut data = vec![0.0_f32; total];
    let mut row_offset = 0;
    for batch in reader {
        let batch = batch?;
        for j in 0..batch.num_columns().min(width) {
            let column = batch
                .column(j)
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| {
                    Error::StorageError(format!(
                        "column c{j} of {} is not Float32",
                        path.display()
                    ))
                })?;
            for (i, value) in column.values().iter().enumerate() {
                let row = row_offset + i;
                if row < rows {
                    data[row * width + j] = *value;
                }
            }
        }
        row_offset += batch.num_rows();
    }
    if row_offset != rows {
        return Err(Error::StorageError(format!(
            "{} holds {row_offset} rows, expected {rows}",
            path.display()
        )));
    }
    NumericArray::new(shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPayloadStore::open(dir.path()).unwrap();
        let rows: Vec<Vec<f32>> = (0..50).map(|i| vec![i as f32, -(i as f32), 0.5]).collect();
        let x = NumericArray::from_rows(&rows).unwrap();
        let fields = Fields::from([("x_data".to_string(), x.clone())]);

        store.add("model/eval/data", 0, &fields).unwrap();
        assert!(store.contains("model/eval/data", 0).unwrap());
        assert_eq!(store.get("model/eval/data", 0).unwrap()["x_data"], x);
    }

    #[test]
    fn test_three_dimensional_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPayloadStore::open(dir.path()).unwrap();
        let cube = NumericArray::new(vec![2, 2, 3], (0..12).map(|v| v as f32).collect()).unwrap();
        store
            .add("k", 4, &Fields::from([("w".to_string(), cube.clone())]))
            .unwrap();
        assert_eq!(store.get("k", 4).unwrap()["w"], cube);
    }

    #[test]
    fn test_missing_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPayloadStore::open(dir.path()).unwrap();
        assert!(store.get("nope", 0).unwrap_err().is_not_found());

        let fields = Fields::from([("d".to_string(), NumericArray::vector(vec![1.0]))]);
        store.add("k", 0, &fields).unwrap();
        assert!(matches!(store.add("k", 0, &fields), Err(Error::Integrity(_))));
        store.remove("k", 0).unwrap();
        assert!(!store.contains("k", 0).unwrap());
        store.remove("k", 0).unwrap();
    }

    #[test]
    fn test_empty_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetPayloadStore::open(dir.path()).unwrap();
        let empty = NumericArray::zeros(vec![0, 4]);
        store
            .add("k", 0, &Fields::from([("x".to_string(), empty.clone())]))
            .unwrap();
        assert_eq!(store.get("k", 0).unwrap()["x"], empty);
    }
}
