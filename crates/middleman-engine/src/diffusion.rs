//! The binned-reduction (diffusion) pipeline.
//!
//! Each step the producer publishes a `table` of rows, one row per
//! triangle observation:
//!
//! ```text
//! triangle, i_dr_avg, i_dr_squared_average, i_dE_avg, i_dE_squared_average, i_marker_den,
//!           e_dr_avg, e_dr_squared_average, e_dE_avg, e_dE_squared_average, e_marker_den
//! ```
//!
//! Workers sum their rows into a per-triangle [`TriangleAccumulator`],
//! the ten channels are sum-reduced to the coordinator, and the
//! coordinator writes them as global arrays of length `ntriangle`.
//! Every non-empty block is mirrored verbatim to a per-worker stream
//! before it is validated. A worker's mirror step is committed only
//! after the coordinator has written that step.

use std::time::Instant;

use middleman_core::{
    element_count, BlockInfo, Column, Communicator, DType, StepId, StepReader, StepStatus,
    StepWriter, VariableDef,
};

use crate::driver::{Pipeline, PipelineState};
use crate::error::PipelineError;
use crate::ingest::{assigned_blocks, fetch_block, is_block_fault};
use crate::merge::reduce_channels;
use crate::metrics::{micros_since, StepMetrics};
use crate::output::{LazyOutput, WriterFactory};

/// Name of the input (and mirror) table variable.
pub const TABLE_VAR: &str = "table";

/// Values per table row: the triangle id followed by the channels.
pub const NCOL: usize = 11;

/// Accumulator channels, in table column order (after the triangle id).
/// These are also the output variable names.
pub const CHANNELS: [&str; NCOL - 1] = [
    "i_dr_avg",
    "i_dr_squared_average",
    "i_dE_avg",
    "i_dE_squared_average",
    "i_marker_den",
    "e_dr_avg",
    "e_dr_squared_average",
    "e_dE_avg",
    "e_dE_squared_average",
    "e_marker_den",
];

// ── TriangleAccumulator ────────────────────────────────────────────

/// Ten per-triangle sums, one per entry of [`CHANNELS`].
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleAccumulator {
    channels: Vec<Vec<f64>>,
    ntriangle: usize,
}

impl TriangleAccumulator {
    /// Zeroed accumulator over `ntriangle` triangles.
    pub fn new(ntriangle: usize) -> Self {
        Self {
            channels: vec![vec![0.0; ntriangle]; CHANNELS.len()],
            ntriangle,
        }
    }

    /// Number of triangles.
    pub fn ntriangle(&self) -> usize {
        self.ntriangle
    }

    /// Zero every channel.
    pub fn reset(&mut self) {
        for c in &mut self.channels {
            c.fill(0.0);
        }
    }

    /// Add one table row. Returns `false` (and changes nothing) if the
    /// row is short or its triangle id is not a valid index.
    pub fn add_row(&mut self, row: &[f64]) -> bool {
        if row.len() != NCOL {
            return false;
        }
        let tri = row[0];
        if !tri.is_finite() || tri < 0.0 || tri >= self.ntriangle as f64 {
            return false;
        }
        let itri = tri as usize;
        for (channel, &v) in self.channels.iter_mut().zip(&row[1..]) {
            channel[itri] += v;
        }
        true
    }

    /// One channel by index into [`CHANNELS`].
    pub fn channel(&self, index: usize) -> Option<&[f64]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// One channel by name.
    pub fn channel_by_name(&self, name: &str) -> Option<&[f64]> {
        CHANNELS
            .iter()
            .position(|&c| c == name)
            .and_then(|i| self.channel(i))
    }

    fn channels_mut(&mut self) -> Vec<&mut [f64]> {
        self.channels.iter_mut().map(Vec::as_mut_slice).collect()
    }
}

/// Output schema: every channel as a global `f64` array of `ntriangle`.
pub fn output_schema(ntriangle: usize) -> Vec<VariableDef> {
    CHANNELS
        .iter()
        .map(|&name| VariableDef::global_1d(name, DType::F64, ntriangle))
        .collect()
}

// ── DiffusionPipeline ──────────────────────────────────────────────

/// Diffusion pipeline for one worker.
pub struct DiffusionPipeline<C: Communicator> {
    comm: C,
    reader: Box<dyn StepReader>,
    mirror: Box<dyn StepWriter>,
    output: LazyOutput,
    acc: TriangleAccumulator,
    step: StepId,
    state: PipelineState,
    metrics: StepMetrics,
    finalized: bool,
}

impl<C: Communicator> DiffusionPipeline<C> {
    /// Build a worker's pipeline and define the mirror's `table`.
    ///
    /// `output` is only invoked on the coordinator, on its first
    /// emitted step.
    pub fn new(
        comm: C,
        reader: Box<dyn StepReader>,
        mut mirror: Box<dyn StepWriter>,
        output: WriterFactory,
        ntriangle: usize,
    ) -> Result<Self, PipelineError> {
        mirror.define_variable(VariableDef::local(TABLE_VAR, DType::F64, &[0, NCOL]))?;
        let output = LazyOutput::new(comm.rank(), output);
        log::info!(
            "diffusion: rank {} of {}, {ntriangle} triangles",
            comm.rank(),
            comm.size()
        );
        Ok(Self {
            comm,
            reader,
            mirror,
            output,
            acc: TriangleAccumulator::new(ntriangle),
            step: StepId(0),
            state: PipelineState::AwaitingStep,
            metrics: StepMetrics::default(),
            finalized: false,
        })
    }

    /// The accumulator. After a step, the coordinator's copy holds the
    /// step's global sums.
    pub fn accumulator(&self) -> &TriangleAccumulator {
        &self.acc
    }

    /// This worker's communicator.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    fn try_step(&mut self) -> Result<StepStatus, PipelineError> {
        let started = Instant::now();
        match self.reader.begin_step()? {
            StepStatus::Ok => {}
            StepStatus::NotReady => return Ok(StepStatus::NotReady),
            StepStatus::EndOfStream => {
                log::info!("diffusion: end of stream at step {}", self.step);
                return Ok(StepStatus::EndOfStream);
            }
        }
        let mut metrics = StepMetrics {
            step: self.step,
            ..Default::default()
        };

        self.state = PipelineState::Consuming;
        let t = Instant::now();
        self.acc.reset();
        self.mirror.begin_step()?;
        let blocks = assigned_blocks(self.reader.as_ref(), &self.comm, TABLE_VAR, self.step)?;
        for block in &blocks {
            self.consume_block(block, &mut metrics)?;
        }
        self.reader.end_step()?;
        metrics.ingest_us = micros_since(t);

        self.state = PipelineState::Merging;
        let t = Instant::now();
        log::debug!(
            "step {}: reducing {} rows over {} triangles",
            self.step,
            metrics.rows_ingested,
            self.acc.ntriangle()
        );
        reduce_channels(&mut self.comm, &mut self.acc.channels_mut())?;
        metrics.merge_us = micros_since(t);

        self.state = PipelineState::Emitting;
        if self.comm.is_root() {
            let t = Instant::now();
            let ntriangle = self.acc.ntriangle();
            let values = CHANNELS
                .iter()
                .zip(&self.acc.channels)
                .map(|(&name, data)| (name.to_string(), Column::F64(data.clone())))
                .collect();
            self.output.emit(|| output_schema(ntriangle), values)?;
            metrics.emit_us = micros_since(t);
        }
        // Non-root reduces only send; hold every worker until the
        // coordinator has written this step.
        self.comm.barrier()?;
        self.mirror.end_step()?;

        self.step = self.step.next();
        metrics.total_us = micros_since(started);
        self.metrics = metrics;
        Ok(StepStatus::Ok)
    }

    fn consume_block(
        &mut self,
        block: &BlockInfo,
        metrics: &mut StepMetrics,
    ) -> Result<(), PipelineError> {
        if element_count(&block.count) == 0 {
            return Ok(());
        }
        let names = [TABLE_VAR.to_string()];
        let column = match fetch_block(self.reader.as_mut(), &names, block.id) {
            Ok(c) => c.into_iter().next(),
            Err(e) if is_block_fault(&e) => {
                log::warn!("step {}: table block {} skipped: {e}", self.step, block.id);
                metrics.blocks_rejected += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let Some(column) = column else {
            return Ok(());
        };

        // The raw block goes to the mirror before it is validated.
        match self
            .mirror
            .put(TABLE_VAR, column.clone(), Some(block.count.as_slice()))
        {
            Ok(()) => {}
            Err(e) if is_block_fault(&e) => {
                log::warn!("step {}: table block {} not mirrored: {e}", self.step, block.id);
            }
            Err(e) => return Err(e.into()),
        }

        let table = match column.into_vec::<f64>() {
            Ok(t) if t.len() % NCOL == 0 => t,
            Ok(t) => {
                log::warn!(
                    "step {}: table block {} has {} values, not a multiple of {NCOL}",
                    self.step,
                    block.id,
                    t.len()
                );
                metrics.blocks_rejected += 1;
                return Ok(());
            }
            Err(c) => {
                log::warn!(
                    "step {}: table block {} holds {}, expected f64",
                    self.step,
                    block.id,
                    c.dtype()
                );
                metrics.blocks_rejected += 1;
                return Ok(());
            }
        };
        metrics.blocks_read += 1;

        let mut rejected = 0u64;
        for row in table.chunks_exact(NCOL) {
            if self.acc.add_row(row) {
                metrics.rows_ingested += 1;
            } else {
                rejected += 1;
            }
        }
        if rejected > 0 {
            metrics.rows_rejected += rejected;
            log::warn!(
                "step {}: table block {} dropped {rejected} rows outside the mesh ({} triangles)",
                self.step,
                block.id,
                self.acc.ntriangle()
            );
        }
        Ok(())
    }
}

impl<C: Communicator> Pipeline for DiffusionPipeline<C> {
    fn name(&self) -> &str {
        "diffusion"
    }

    fn step(&mut self) -> Result<StepStatus, PipelineError> {
        if self.state == PipelineState::Done {
            return Err(PipelineError::Finished);
        }
        let result = self.try_step();
        self.state = match result {
            Ok(StepStatus::Ok) | Ok(StepStatus::NotReady) => PipelineState::AwaitingStep,
            Ok(StepStatus::EndOfStream) | Err(_) => PipelineState::Done,
        };
        result
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn current_step(&self) -> StepId {
        self.step
    }

    fn last_metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        self.state = PipelineState::Done;
        let reader = self.reader.close();
        let mirror = self.mirror.close();
        let output = self.output.close();
        log::info!(
            "diffusion: finalized rank {} after {} steps",
            self.comm.rank(),
            self.step
        );
        reader?;
        mirror?;
        output?;
        Ok(())
    }
}
