//! Collective merge helpers shared by the pipelines.
//!
//! Every function here is a collective: all workers must call it in the
//! same order with their (possibly empty) contribution.

use middleman_core::{CommError, Communicator, GatherLayout, Particle, Rank, PHASE_WIDTH};

use crate::ingest::SpeciesColumns;

/// Sum each channel elementwise into the coordinator's copy.
///
/// Channels are reduced one collective each, in slice order. Non-root
/// channels are unspecified afterwards.
pub fn reduce_channels<C: Communicator>(
    comm: &mut C,
    channels: &mut [&mut [f64]],
) -> Result<(), CommError> {
    for channel in channels.iter_mut() {
        comm.reduce_sum(channel, Rank::ROOT)?;
    }
    Ok(())
}

/// Gather every worker's records to the coordinator.
///
/// Counts are shared first; each scalar column is then gathered with
/// the same layout and the phase column with the layout scaled by
/// [`PHASE_WIDTH`]. The coordinator receives the rank-major
/// concatenation; other workers receive `None`.
pub fn gather_species<C: Communicator>(
    comm: &mut C,
    local: &SpeciesColumns,
) -> Result<Option<SpeciesColumns>, CommError> {
    let counts = comm.all_gather_count(local.len())?;
    let layout = GatherLayout::from_counts(counts);
    let phase_layout = layout.scaled(PHASE_WIDTH);

    let gid = comm.gatherv(&local.gid, &layout, Rank::ROOT)?;
    let flag = comm.gatherv(&local.flag, &layout, Rank::ROOT)?;
    let step = comm.gatherv(&local.step, &layout, Rank::ROOT)?;
    let dw = comm.gatherv(&local.dw, &layout, Rank::ROOT)?;
    let phase = comm.gatherv(&local.phase, &phase_layout, Rank::ROOT)?;

    Ok(match (gid, flag, step, dw, phase) {
        (Some(gid), Some(flag), Some(step), Some(dw), Some(phase)) => Some(SpeciesColumns {
            gid,
            flag,
            step,
            dw,
            phase,
        }),
        _ => None,
    })
}

/// Send the coordinator's `records` to every worker.
///
/// Non-root arguments are ignored. Every worker returns the
/// coordinator's records in order.
pub fn broadcast_records<C: Communicator>(
    comm: &mut C,
    records: &[Particle],
) -> Result<Vec<Particle>, CommError> {
    let cols = if comm.is_root() {
        SpeciesColumns::from_particles(records)
    } else {
        SpeciesColumns::default()
    };
    let received = SpeciesColumns {
        gid: comm.broadcast(cols.gid, Rank::ROOT)?,
        flag: comm.broadcast(cols.flag, Rank::ROOT)?,
        step: comm.broadcast(cols.step, Rank::ROOT)?,
        dw: comm.broadcast(cols.dw, Rank::ROOT)?,
        phase: comm.broadcast(cols.phase, Rank::ROOT)?,
    };
    let n = received.len();
    if received.flag.len() != n
        || received.step.len() != n
        || received.dw.len() != n
        || received.phase.len() != n * PHASE_WIDTH
    {
        return Err(CommError::CountMismatch {
            source: Rank::ROOT,
            expected: n,
            actual: received.flag.len(),
        });
    }
    Ok(received.particles().collect())
}
