//! Benchmark profiles for the Middleman diagnostics coupler.
//!
//! Deterministic synthetic inputs, seeded through ChaCha8:
//!
//! - [`table_blocks`]: diffusion table blocks over a triangle mesh
//! - [`particles`]: particle records with a given escaped fraction
//! - [`table_frame`]: a ready-made step frame for codec benchmarks

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use middleman_core::{Column, Particle, ParticleFlags, Shape, StepId, StreamError, PHASE_WIDTH};
use middleman_engine::diffusion::{NCOL, TABLE_VAR};
use middleman_stream::StepFrame;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Reference mesh size.
pub const REFERENCE_TRIANGLES: usize = 50_000;

fn unit(rng: &mut ChaCha8Rng) -> f64 {
    (rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
}

/// `nblocks` table blocks of `rows` rows each, triangle ids uniform in
/// `[0, ntriangle)`.
pub fn table_blocks(seed: u64, nblocks: usize, rows: usize, ntriangle: usize) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..nblocks)
        .map(|_| {
            let mut block = Vec::with_capacity(rows * NCOL);
            for _ in 0..rows {
                block.push((rng.next_u64() % ntriangle.max(1) as u64) as f64);
                block.extend((1..NCOL).map(|_| unit(&mut rng)));
            }
            block
        })
        .collect()
}

/// `n` particles with ids starting at `first_gid`; each is escaped with
/// probability `escaped_fraction`, otherwise a divertor particle.
pub fn particles(seed: u64, n: usize, first_gid: i64, escaped_fraction: f64) -> Vec<Particle> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let flag = if unit(&mut rng) < escaped_fraction {
                ParticleFlags::ESCAPED
            } else {
                0
            };
            let mut phase = [0.0f32; PHASE_WIDTH];
            for v in &mut phase {
                *v = unit(&mut rng) as f32;
            }
            Particle::from_row(first_gid + i as i64, flag as i32, 0, 0.0, &phase)
        })
        .collect()
}

/// A step frame holding `blocks` as the local `table` variable.
pub fn table_frame(blocks: &[Vec<f64>]) -> Result<StepFrame, StreamError> {
    let mut frame = StepFrame::new(StepId(0));
    for block in blocks {
        let count = Shape::from_slice(&[block.len() / NCOL, NCOL]);
        frame.push_block(TABLE_VAR, &[], Shape::new(), count, Column::F64(block.clone()))?;
    }
    Ok(frame)
}
