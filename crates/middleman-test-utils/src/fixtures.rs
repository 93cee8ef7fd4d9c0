//! Upstream stream fixtures.
//!
//! - Mesh: one step holding the `n_t` triangle count.
//! - Diffusion table: a local `table` of rows of 11 `f64`
//!   (`triangle, i_* x5, e_* x5`), one block per inner vector.
//! - Particles: local `{i,e}{gid,flag,step,dw,phase}` columns, one
//!   block per inner vector.

use middleman_core::{
    Column, DType, Particle, Species, StepWriter, StreamError, VariableDef, PHASE_WIDTH,
};
use middleman_stream::StreamHub;

const TABLE_WIDTH: usize = 11;

// ── Mesh ───────────────────────────────────────────────────────────

/// Write a one-step mesh stream holding `n_t` and close the writer.
pub fn write_mesh(writer: &mut dyn StepWriter, n_t: i32) -> Result<(), StreamError> {
    writer.define_variable(VariableDef::global_1d("n_t", DType::I32, 1))?;
    writer.begin_step()?;
    writer.put("n_t", Column::I32(vec![n_t]), None)?;
    writer.end_step()?;
    writer.close()
}

/// A closed in-memory mesh stream.
pub fn mesh_hub(n_t: i32) -> StreamHub {
    let hub = StreamHub::new();
    write_mesh(&mut hub.writer(), n_t).expect("mesh fixture");
    hub
}

// ── Diffusion table ────────────────────────────────────────────────

/// One table row for `triangle` whose ten channel values are
/// `value, value + 1, ..., value + 9`.
pub fn table_row(triangle: usize, value: f64) -> Vec<f64> {
    let mut row = Vec::with_capacity(TABLE_WIDTH);
    row.push(triangle as f64);
    row.extend((0..TABLE_WIDTH - 1).map(|k| value + k as f64));
    row
}

/// Define the local `table` variable.
pub fn define_table(writer: &mut dyn StepWriter) -> Result<(), StreamError> {
    writer.define_variable(VariableDef::local("table", DType::F64, &[0, TABLE_WIDTH]))
}

/// Write one step; each inner vector is one block of flattened rows.
pub fn write_table_step(
    writer: &mut dyn StepWriter,
    blocks: &[Vec<f64>],
) -> Result<(), StreamError> {
    writer.begin_step()?;
    for block in blocks {
        let nrow = block.len() / TABLE_WIDTH;
        writer.put("table", Column::F64(block.clone()), Some(&[nrow, TABLE_WIDTH]))?;
    }
    writer.end_step()
}

/// A closed in-memory table stream, one entry of `steps` per step.
pub fn table_hub(steps: &[Vec<Vec<f64>>]) -> StreamHub {
    let hub = StreamHub::new();
    let mut w = hub.writer();
    define_table(&mut w).expect("define table");
    for blocks in steps {
        write_table_step(&mut w, blocks).expect("table step");
    }
    w.close().expect("close table stream");
    hub
}

// ── Particles ──────────────────────────────────────────────────────

/// A particle with deterministic phase values derived from `gid`.
///
/// `psi` is `0.1 * (gid mod 10)` so records spread over a unit tally.
pub fn particle(gid: i64, flag: i32) -> Particle {
    let mut phase = [0.0f32; PHASE_WIDTH];
    for (k, v) in phase.iter_mut().enumerate() {
        *v = gid as f32 + k as f32 * 0.01;
    }
    phase[4] = 1.0; // w1
    phase[6] = 0.5; // mu
    phase[7] = 2.0; // w0
    phase[9] = 0.1 * gid.rem_euclid(10) as f32; // psi
    phase[10] = 1.5; // B
    Particle::from_row(gid, flag, 0, 0.0, &phase)
}

/// Blocks of both species for one step.
#[derive(Clone, Debug, Default)]
pub struct ParticleStep {
    pub ions: Vec<Vec<Particle>>,
    pub electrons: Vec<Vec<Particle>>,
}

impl ParticleStep {
    pub fn blocks(&self, species: Species) -> &[Vec<Particle>] {
        match species {
            Species::Ion => &self.ions,
            Species::Electron => &self.electrons,
        }
    }
}

/// Define the five local columns of both species.
pub fn define_particles(writer: &mut dyn StepWriter) -> Result<(), StreamError> {
    for species in Species::ALL {
        writer.define_variable(VariableDef::local(species.var("gid"), DType::I64, &[0]))?;
        writer.define_variable(VariableDef::local(species.var("flag"), DType::I32, &[0]))?;
        writer.define_variable(VariableDef::local(species.var("step"), DType::I32, &[0]))?;
        writer.define_variable(VariableDef::local(species.var("dw"), DType::F32, &[0]))?;
        writer.define_variable(VariableDef::local(
            species.var("phase"),
            DType::F32,
            &[0, PHASE_WIDTH],
        ))?;
    }
    Ok(())
}

/// Write one step of particle blocks, ions first.
pub fn write_particle_step(
    writer: &mut dyn StepWriter,
    step: &ParticleStep,
) -> Result<(), StreamError> {
    writer.begin_step()?;
    for species in Species::ALL {
        for block in step.blocks(species) {
            let n = block.len();
            let gid = block.iter().map(|p| p.gid).collect();
            let flag = block.iter().map(|p| p.flags.raw()).collect();
            let esc = block.iter().map(|p| p.esc_step).collect();
            let dw = block.iter().map(|p| p.dw).collect();
            let phase = block.iter().flat_map(|p| p.phase()).collect();
            writer.put(&species.var("gid"), Column::I64(gid), Some(&[n]))?;
            writer.put(&species.var("flag"), Column::I32(flag), Some(&[n]))?;
            writer.put(&species.var("step"), Column::I32(esc), Some(&[n]))?;
            writer.put(&species.var("dw"), Column::F32(dw), Some(&[n]))?;
            writer.put(&species.var("phase"), Column::F32(phase), Some(&[n, PHASE_WIDTH]))?;
        }
    }
    writer.end_step()
}

/// A closed in-memory particle stream.
pub fn particle_hub(steps: &[ParticleStep]) -> StreamHub {
    let hub = StreamHub::new();
    let mut w = hub.writer();
    define_particles(&mut w).expect("define particles");
    for step in steps {
        write_particle_step(&mut w, step).expect("particle step");
    }
    w.close().expect("close particle stream");
    hub
}
