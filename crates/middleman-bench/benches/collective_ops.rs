//! Criterion micro-benchmarks for ThreadComm collectives.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use middleman_bench::{particles, REFERENCE_TRIANGLES};
use middleman_comm::run_world;
use middleman_core::{Communicator, Rank};
use middleman_engine::ingest::SpeciesColumns;
use middleman_engine::merge::gather_species;

/// Benchmark: sum-reduce one triangle channel over 4 workers.
fn bench_reduce_4_workers(c: &mut Criterion) {
    c.bench_function("reduce_50k_f64_4_workers", |b| {
        b.iter(|| {
            let sums = run_world(4, |mut comm| {
                let mut data = vec![comm.rank().0 as f64; REFERENCE_TRIANGLES];
                comm.reduce_sum(&mut data, Rank::ROOT).unwrap();
                data[0]
            });
            black_box(sums);
        });
    });
}

/// Benchmark: gather 4 x 2.5K escaped records to the coordinator.
fn bench_gather_4_workers(c: &mut Criterion) {
    let locals: Vec<SpeciesColumns> = (0..4)
        .map(|r| SpeciesColumns::from_particles(&particles(r, 2_500, r as i64 * 10_000, 1.0)))
        .collect();

    c.bench_function("gather_10k_records_4_workers", |b| {
        b.iter(|| {
            let gathered = run_world(4, |mut comm| {
                let local = &locals[comm.rank().0];
                gather_species(&mut comm, local).unwrap().map(|g| g.len())
            });
            black_box(gathered);
        });
    });
}

criterion_group!(benches, bench_reduce_4_workers, bench_gather_4_workers);
criterion_main!(benches);
