//! Criterion micro-benchmarks for per-step pipeline work on one worker.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use middleman_bench::{particles, table_blocks, REFERENCE_TRIANGLES};
use middleman_comm::SelfComm;
use middleman_core::{Column, DType, Species, StepId, StepWriter, VariableDef};
use middleman_engine::diffusion::{NCOL, TABLE_VAR};
use middleman_engine::ingest::SpeciesColumns;
use middleman_engine::{DiffusionPipeline, EscapedRegistry, Pipeline, TriangleAccumulator};
use middleman_stream::StreamHub;

/// Benchmark: accumulate 64K table rows.
fn bench_accumulate_rows(c: &mut Criterion) {
    let blocks = table_blocks(3, 64, 1024, REFERENCE_TRIANGLES);
    let mut acc = TriangleAccumulator::new(REFERENCE_TRIANGLES);

    c.bench_function("accumulate_64k_rows", |b| {
        b.iter(|| {
            acc.reset();
            for block in &blocks {
                for row in block.chunks_exact(NCOL) {
                    black_box(acc.add_row(row));
                }
            }
        });
    });
}

/// Benchmark: classify 100K particles, 5% escaped.
fn bench_classify(c: &mut Criterion) {
    let cols = SpeciesColumns::from_particles(&particles(5, 100_000, 0, 0.05));

    c.bench_function("classify_100k_particles", |b| {
        b.iter(|| black_box(cols.classify()));
    });
}

/// Benchmark: upsert 10K candidates into a registry already holding 100K.
fn bench_registry_upsert(c: &mut Criterion) {
    let mut seeded = EscapedRegistry::new(Species::Ion);
    seeded.upsert(StepId(0), particles(9, 100_000, 0, 1.0));
    let candidates = particles(10, 10_000, 95_000, 1.0);

    c.bench_function("registry_upsert_10k_into_100k", |b| {
        b.iter_batched(
            || seeded.clone(),
            |mut reg| black_box(reg.upsert(StepId(1), candidates.iter().copied())),
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: one full diffusion step (ingest, reduce, emit) on one worker.
fn bench_diffusion_step(c: &mut Criterion) {
    let blocks = table_blocks(4, 16, 1024, REFERENCE_TRIANGLES);
    let input = StreamHub::new();
    {
        let mut w = input.writer();
        w.define_variable(VariableDef::local(TABLE_VAR, DType::F64, &[0, NCOL]))
            .unwrap();
        w.begin_step().unwrap();
        for block in &blocks {
            let nrow = block.len() / NCOL;
            w.put(TABLE_VAR, Column::F64(block.clone()), Some(&[nrow, NCOL]))
                .unwrap();
        }
        w.end_step().unwrap();
        w.close().unwrap();
    }

    c.bench_function("diffusion_step_16k_rows", |b| {
        b.iter_batched(
            || {
                let out = StreamHub::new();
                DiffusionPipeline::new(
                    SelfComm::new(),
                    Box::new(input.reader()),
                    Box::new(StreamHub::new().writer()),
                    Box::new(move || Ok(Box::new(out.writer()) as Box<dyn StepWriter>)),
                    REFERENCE_TRIANGLES,
                )
                .unwrap()
            },
            |mut p| black_box(p.step().unwrap()),
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_accumulate_rows,
    bench_classify,
    bench_registry_upsert,
    bench_diffusion_step
);
criterion_main!(benches);
