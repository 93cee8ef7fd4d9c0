//! Criterion micro-benchmarks for the step file codec.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use middleman_bench::{table_blocks, table_frame, REFERENCE_TRIANGLES};
use middleman_stream::codec::{decode_record, encode_frame, Record};

/// Benchmark: encode a 16-block, 16K-row table step.
fn bench_encode_table_frame(c: &mut Criterion) {
    let frame = table_frame(&table_blocks(1, 16, 1024, REFERENCE_TRIANGLES)).unwrap();

    c.bench_function("codec_encode_table_16x1024", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(2 << 20);
            encode_frame(&mut buf, &frame).unwrap();
            black_box(&buf);
        });
    });
}

/// Benchmark: decode the same step.
fn bench_decode_table_frame(c: &mut Criterion) {
    let frame = table_frame(&table_blocks(1, 16, 1024, REFERENCE_TRIANGLES)).unwrap();
    let mut encoded = Vec::new();
    encode_frame(&mut encoded, &frame).unwrap();

    c.bench_function("codec_decode_table_16x1024", |b| {
        b.iter(|| {
            let mut cursor = encoded.as_slice();
            match decode_record(&mut cursor).unwrap() {
                Some(Record::Frame(f)) => black_box(f),
                other => panic!("expected a frame, got {other:?}"),
            };
        });
    });
}

criterion_group!(benches, bench_encode_table_frame, bench_decode_table_frame);
criterion_main!(benches);
