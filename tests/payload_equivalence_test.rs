//! Payload backend equivalence
//!
//! Toyota Way: Jidoka (built-in quality)
//! The memory backend replays append chains, the Parquet backend
//! materializes every version. Both must return identical arrays for every
//! version of every chain.

use quickcheck::{QuickCheck, TestResult};
use trueno_mlrepo::array::NumericArray;
use trueno_mlrepo::payload::{Fields, MemoryPayloadStore, ParquetPayloadStore, PayloadStore};
use trueno_mlrepo::Error;

const WIDTH: usize = 3;

fn block(values: &[f32], rows: usize) -> NumericArray {
    let data: Vec<f32> = (0..rows * WIDTH)
        .map(|i| values.get(i % values.len().max(1)).copied().unwrap_or(0.0))
        .collect();
    NumericArray::new(vec![rows, WIDTH], data).unwrap()
}

fn fields(array: NumericArray) -> Fields {
    Fields::from([("x_data".to_string(), array)])
}

/// Build the same chain in both backends and compare every version.
fn chain_equivalent(seed: Vec<f32>, appends: Vec<u8>) -> TestResult {
    if seed.iter().any(|v| !v.is_finite()) || appends.len() > 12 {
        return TestResult::discard();
    }
    let dir = tempfile::tempdir().unwrap();
    let memory = MemoryPayloadStore::new();
    let parquet = ParquetPayloadStore::open(dir.path()).unwrap();

    let first = fields(block(&seed, 2));
    memory.add("raw", 0, &first).unwrap();
    parquet.add("raw", 0, &first).unwrap();

    let mut expected_rows = 2;
    for (i, rows) in appends.iter().enumerate() {
        let rows = usize::from(rows % 4) + 1;
        let next = fields(block(&seed, rows));
        let (prev, version) = (i as u64, i as u64 + 1);
        memory.append("raw", prev, version, &next).unwrap();
        parquet.append("raw", prev, version, &next).unwrap();
        expected_rows += rows;
    }

    for version in 0..=appends.len() as u64 {
        let m = memory.get("raw", version).unwrap();
        let p = parquet.get("raw", version).unwrap();
        if m != p {
            return TestResult::error(format!("version {version} differs"));
        }
    }
    let last = memory.get("raw", appends.len() as u64).unwrap();
    TestResult::from_bool(last["x_data"].rows() == expected_rows)
}

#[test]
fn prop_memory_and_parquet_chains_agree() {
    QuickCheck::new()
        .tests(40)
        .quickcheck(chain_equivalent as fn(Vec<f32>, Vec<u8>) -> TestResult);
}

#[test]
fn test_both_backends_reject_wrong_width() {
    let dir = tempfile::tempdir().unwrap();
    let backends: Vec<Box<dyn Fn() -> Box<dyn PayloadStore>>> = vec![
        Box::new(|| Box::new(MemoryPayloadStore::new())),
        Box::new(move || Box::new(ParquetPayloadStore::open(dir.path().join("p")).unwrap())),
    ];
    for make in &backends {
        let store = make();
        store.add("raw", 0, &fields(block(&[1.0], 2))).unwrap();
        let narrow = fields(NumericArray::new(vec![1, 2], vec![0.0, 0.0]).unwrap());
        assert!(matches!(
            store.append("raw", 0, 1, &narrow),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(!store.contains("raw", 1).unwrap());
    }
}

#[test]
fn test_both_backends_refuse_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let parquet = ParquetPayloadStore::open(dir.path()).unwrap();
    let memory = MemoryPayloadStore::new();
    let one = fields(block(&[1.0], 1));
    for store in [&parquet as &dyn PayloadStore, &memory] {
        store.add("raw", 0, &one).unwrap();
        assert!(matches!(store.add("raw", 0, &one), Err(Error::Integrity(_))));
        assert!(matches!(store.get("raw", 9), Err(Error::NotFound { .. })));
    }
}
