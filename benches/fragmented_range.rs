//! Benchmarks for FragmentedRange operations

use bunkr_rs::FragmentedRange;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Every other block occupied: worst case for extent count
fn checkerboard(size: i64) -> FragmentedRange {
    let mut range = FragmentedRange::new();
    for i in (0..size).step_by(2) {
        range.add_one(i);
    }
    range
}

fn benchmark_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_add");

    for size in [100i64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential", size), size, |b, &size| {
            b.iter(|| {
                let mut range = FragmentedRange::new();
                for i in 0..size {
                    range.add_one(black_box(i));
                }
                range
            });
        });
        group.bench_with_input(BenchmarkId::new("scattered", size), size, |b, &size| {
            b.iter(|| checkerboard(black_box(size)));
        });
    }

    group.finish();
}

fn benchmark_set_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_set_ops");

    for size in [1000i64, 10000].iter() {
        let a = checkerboard(*size);
        let b_range = FragmentedRange::with_range(*size / 4, *size / 2);

        group.bench_with_input(BenchmarkId::new("union", size), size, |b, _| {
            b.iter(|| FragmentedRange::union_of(black_box(&a), black_box(&b_range)));
        });
        group.bench_with_input(BenchmarkId::new("difference", size), size, |b, _| {
            b.iter(|| FragmentedRange::difference(black_box(&a), black_box(&b_range)));
        });
        group.bench_with_input(BenchmarkId::new("invert", size), size, |b, _| {
            b.iter(|| black_box(&a).invert());
        });
    }

    group.finish();
}

fn benchmark_pop_min(c: &mut Criterion) {
    c.bench_function("range_pop_min_10000", |b| {
        b.iter(|| {
            let mut range = checkerboard(20000);
            while let Some(v) = range.pop_min() {
                black_box(v);
            }
        });
    });
}

criterion_group!(benches, benchmark_add, benchmark_set_ops, benchmark_pop_min);
criterion_main!(benches);
