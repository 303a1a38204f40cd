//! Payload store and measure benchmarks
//!
//! - Append chains: memory replay vs. materialized Parquet reads
//! - Built-in SIMD measure reductions
//!
//! Toyota Way: Measure before optimizing (Genchi Genbutsu)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use trueno_mlrepo::array::NumericArray;
use trueno_mlrepo::measure::{reduce, MeasureKind};
use trueno_mlrepo::payload::{Fields, MemoryPayloadStore, ParquetPayloadStore, PayloadStore};

const WIDTH: usize = 8;

fn random_block(rows: usize) -> Fields {
    let mut rng = rand::thread_rng();
    let data: Vec<f32> = (0..rows * WIDTH).map(|_| rng.gen_range(-1.0..1.0)).collect();
    Fields::from([(
        "x_data".to_string(),
        NumericArray::new(vec![rows, WIDTH], data).unwrap(),
    )])
}

/// Build `key` with `links` appends of 1 000 rows each
fn build_chain<P: PayloadStore>(store: &P, links: u64) {
    store.add("raw", 0, &random_block(1_000)).unwrap();
    for v in 1..=links {
        store.append("raw", v - 1, v, &random_block(1_000)).unwrap();
    }
}

/// Benchmark reading the latest version of an append chain
fn bench_chain_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_chain_read");

    for links in [1_u64, 8, 32].iter() {
        let memory = MemoryPayloadStore::new();
        build_chain(&memory, *links);
        group.bench_with_input(BenchmarkId::new("memory", links), links, |b, &links| {
            b.iter(|| black_box(memory.get("raw", links).unwrap()));
        });

        let dir = tempfile::tempdir().unwrap();
        let parquet = ParquetPayloadStore::open(dir.path()).unwrap();
        build_chain(&parquet, *links);
        group.bench_with_input(BenchmarkId::new("parquet", links), links, |b, &links| {
            b.iter(|| black_box(parquet.get("raw", links).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark a single append onto a long chain
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_rows");
    let rows = random_block(100);

    group.bench_function("memory", |b| {
        let memory = MemoryPayloadStore::new();
        build_chain(&memory, 16);
        let mut next = 17;
        b.iter(|| {
            memory.append("raw", 16, next, &rows).unwrap();
            next += 1;
        });
    });

    group.finish();
}

/// Benchmark the built-in measure reductions
fn bench_reductions(c: &mut Criterion) {
    let mut group = c.benchmark_group("measure_reduce");
    let mut rng = rand::thread_rng();

    for size in [1_000, 100_000, 1_000_000].iter() {
        let predicted: Vec<f32> = (0..*size).map(|_| rng.gen_range(-10.0..10.0)).collect();
        let actual: Vec<f32> = (0..*size).map(|_| rng.gen_range(-10.0..10.0)).collect();
        for kind in [MeasureKind::MaxError, MeasureKind::MeanSquaredError] {
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), size),
                size,
                |b, _| b.iter(|| black_box(reduce(&kind, &predicted, &actual).unwrap())),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_chain_read, bench_append, bench_reductions);
criterion_main!(benches);
