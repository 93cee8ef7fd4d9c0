//! Block ingestion: choosing this worker's blocks, fetching co-indexed
//! columns, and buffering particle columns for the step.

use middleman_core::{
    BlockId, BlockInfo, Column, Communicator, Particle, Species, StepId, StepReader, StreamError,
    PHASE_WIDTH,
};

use crate::error::PipelineError;
use crate::split::split;

/// The blocks of `var` assigned to this worker in the open step.
///
/// A variable not published this step has zero blocks. Every worker
/// calls this with the same inputs, so the assignment is consistent.
pub fn assigned_blocks<C: Communicator>(
    reader: &dyn StepReader,
    comm: &C,
    var: &str,
    step: StepId,
) -> Result<Vec<BlockInfo>, PipelineError> {
    let blocks = match reader.inquire_variable(var)? {
        Some(_) => reader.blocks_info(var)?,
        None => Vec::new(),
    };
    let range = split(blocks.len(), comm.size(), comm.rank())?;
    log::debug!(
        "step {step}: {var} offset,nblock = {} {} of {}",
        range.start,
        range.len(),
        blocks.len()
    );
    Ok(blocks[range].to_vec())
}

/// Whether a fetch error concerns only the requested block, so the block
/// can be skipped without desynchronizing workers.
pub fn is_block_fault(err: &StreamError) -> bool {
    matches!(
        err,
        StreamError::UnknownVariable { .. }
            | StreamError::UnknownBlock { .. }
            | StreamError::TypeMismatch { .. }
            | StreamError::ShapeMismatch { .. }
    )
}

/// Queue one get per name for `block` and flush them together.
///
/// Returns the columns in `names` order. On failure the get queue is
/// drained so the next block starts clean.
pub fn fetch_block(
    reader: &mut dyn StepReader,
    names: &[String],
    block: BlockId,
) -> Result<Vec<Column>, StreamError> {
    for name in names {
        if let Err(e) = reader.get(name, block) {
            let _ = reader.perform_gets();
            return Err(e);
        }
    }
    reader.perform_gets()
}

// ── Particle columns ────────────────────────────────────────────

/// Per-species column names, in fetch order.
pub const PARTICLE_COLUMNS: [&str; 5] = ["gid", "flag", "step", "dw", "phase"];

/// Stream variable names of one species' columns, e.g. `igid`, `iflag`.
pub fn particle_vars(species: Species) -> Vec<String> {
    PARTICLE_COLUMNS.iter().map(|c| species.var(c)).collect()
}

/// Step-local particle columns for one species, index-aligned.
///
/// `phase` holds [`PHASE_WIDTH`] values per record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpeciesColumns {
    /// Global ids.
    pub gid: Vec<i64>,
    /// Raw flag bitfields.
    pub flag: Vec<i32>,
    /// Escape steps.
    pub step: Vec<i32>,
    /// Weight changes.
    pub dw: Vec<f32>,
    /// Phase rows, row-major.
    pub phase: Vec<f32>,
}

impl SpeciesColumns {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.gid.len()
    }

    /// Whether there are no records.
    pub fn is_empty(&self) -> bool {
        self.gid.is_empty()
    }

    /// Append one fetched block (columns in [`PARTICLE_COLUMNS`] order).
    ///
    /// The block is taken whole or not at all: a type or length mismatch
    /// between its columns rejects it and leaves `self` unchanged.
    pub fn append_block(&mut self, columns: Vec<Column>) -> Result<usize, String> {
        let [gid, flag, step, dw, phase]: [Column; 5] = columns
            .try_into()
            .map_err(|v: Vec<Column>| format!("expected 5 columns, got {}", v.len()))?;
        let gid = gid
            .into_vec::<i64>()
            .map_err(|c| format!("gid holds {}", c.dtype()))?;
        let flag = flag
            .into_vec::<i32>()
            .map_err(|c| format!("flag holds {}", c.dtype()))?;
        let step = step
            .into_vec::<i32>()
            .map_err(|c| format!("step holds {}", c.dtype()))?;
        let dw = dw
            .into_vec::<f32>()
            .map_err(|c| format!("dw holds {}", c.dtype()))?;
        let phase = phase
            .into_vec::<f32>()
            .map_err(|c| format!("phase holds {}", c.dtype()))?;

        let n = gid.len();
        if flag.len() != n || step.len() != n || dw.len() != n || phase.len() != n * PHASE_WIDTH {
            return Err(format!(
                "column lengths disagree: gid {n}, flag {}, step {}, dw {}, phase {} (want {})",
                flag.len(),
                step.len(),
                dw.len(),
                phase.len(),
                n * PHASE_WIDTH
            ));
        }
        self.gid.extend(gid);
        self.flag.extend(flag);
        self.step.extend(step);
        self.dw.extend(dw);
        self.phase.extend(phase);
        Ok(n)
    }

    /// Record `i` as a particle.
    pub fn particle(&self, i: usize) -> Particle {
        let row = &self.phase[i * PHASE_WIDTH..(i + 1) * PHASE_WIDTH];
        Particle::from_row(self.gid[i], self.flag[i], self.step[i], self.dw[i], row)
    }

    /// All records as particles, in column order.
    pub fn particles(&self) -> impl Iterator<Item = Particle> + '_ {
        (0..self.len()).map(|i| self.particle(i))
    }

    /// Append one particle.
    pub fn push(&mut self, p: &Particle) {
        self.gid.push(p.gid);
        self.flag.push(p.flags.raw());
        self.step.push(p.esc_step);
        self.dw.push(p.dw);
        self.phase.extend_from_slice(&p.phase());
    }

    /// Columns holding exactly `particles`, in order.
    pub fn from_particles<'a>(particles: impl IntoIterator<Item = &'a Particle>) -> Self {
        let mut cols = Self::default();
        for p in particles {
            cols.push(p);
        }
        cols
    }

    /// Split into escaped records (as columns, ready to gather) and
    /// divertor particles (everything else).
    pub fn classify(&self) -> (SpeciesColumns, Vec<Particle>) {
        let mut escaped = SpeciesColumns::default();
        let mut divertor = Vec::new();
        for p in self.particles() {
            if p.escaped() {
                escaped.push(&p);
            } else {
                divertor.push(p);
            }
        }
        (escaped, divertor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleman_core::ParticleFlags;

    fn block(gids: &[i64], flags: &[i32]) -> Vec<Column> {
        let n = gids.len();
        vec![
            Column::I64(gids.to_vec()),
            Column::I32(flags.to_vec()),
            Column::I32(vec![7; n]),
            Column::F32(vec![0.5; n]),
            Column::F32((0..n * PHASE_WIDTH).map(|k| k as f32).collect()),
        ]
    }

    #[test]
    fn append_keeps_columns_aligned() {
        let mut cols = SpeciesColumns::default();
        assert_eq!(cols.append_block(block(&[1, 2], &[0, 1])).unwrap(), 2);
        assert_eq!(cols.append_block(block(&[3], &[1])).unwrap(), 1);
        assert_eq!(cols.len(), 3);
        let p = cols.particle(1);
        assert_eq!(p.gid, 2);
        assert!(p.escaped());
        assert_eq!(p.r, PHASE_WIDTH as f32);
        assert_eq!(p.b, (2 * PHASE_WIDTH - 1) as f32);
        // third record restarts the phase numbering of its own block
        assert_eq!(cols.particle(2).r, 0.0);
    }

    #[test]
    fn mismatched_block_is_rejected_whole() {
        let mut cols = SpeciesColumns::default();
        cols.append_block(block(&[1], &[0])).unwrap();
        let mut bad = block(&[2, 3], &[0, 0]);
        bad[2] = Column::I32(vec![1]);
        let err = cols.append_block(bad).unwrap_err();
        assert!(err.contains("disagree"), "{err}");
        assert_eq!(cols.len(), 1);
        assert_eq!(cols.phase.len(), PHASE_WIDTH);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut cols = SpeciesColumns::default();
        let mut bad = block(&[1], &[0]);
        bad[0] = Column::I32(vec![1]);
        assert_eq!(cols.append_block(bad).unwrap_err(), "gid holds i32");
    }

    #[test]
    fn classify_separates_escaped() {
        let mut cols = SpeciesColumns::default();
        let esc = ParticleFlags::ESCAPED as i32;
        cols.append_block(block(&[1, 2, 3, 4], &[esc, 0x2, esc | 0x100, 0]))
            .unwrap();
        let (escaped, divertor) = cols.classify();
        assert_eq!(escaped.gid, vec![1, 3]);
        assert_eq!(escaped.phase.len(), 2 * PHASE_WIDTH);
        let ids: Vec<_> = divertor.iter().map(|p| p.gid).collect();
        assert_eq!(ids, vec![2, 4]);
        // escaped columns rebuild the same particles
        assert_eq!(escaped.particle(1), cols.particle(2));
    }

    #[test]
    fn particle_vars_are_prefixed() {
        assert_eq!(
            particle_vars(Species::Electron),
            vec!["egid", "eflag", "estep", "edw", "ephase"]
        );
    }
}
