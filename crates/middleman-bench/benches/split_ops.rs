//! Criterion micro-benchmarks for block partitioning.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use middleman_core::Rank;
use middleman_engine::split;

/// Benchmark: every rank's range for 10K blocks over 64 workers.
fn bench_split_all_ranks(c: &mut Criterion) {
    c.bench_function("split_10k_blocks_64_workers", |b| {
        b.iter(|| {
            let mut covered = 0;
            for r in 0..64 {
                covered += split(black_box(10_000), 64, Rank(r)).unwrap().len();
            }
            black_box(covered);
        });
    });
}

criterion_group!(benches, bench_split_all_ranks);
criterion_main!(benches);
