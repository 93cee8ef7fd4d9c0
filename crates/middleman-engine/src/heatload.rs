//! The classification-and-history (heatload) pipeline.
//!
//! Each step the producer publishes per-particle columns for ions and
//! electrons (`igid`, `iflag`, `istep`, `idw`, `iphase`, and the `e`
//! equivalents). Per species, every worker:
//!
//! 1. reads its share of the blocks,
//! 2. splits the records into escaped candidates and local divertor
//!    particles by their flags,
//! 3. gathers the escaped candidates to the coordinator, which upserts
//!    them into the species' [`EscapedRegistry`] (and, under
//!    [`RegistrySync::Broadcast`], sends the newly inserted records back
//!    out),
//! 4. runs the [`HeatloadIntegrator`] over its divertor particles, and
//! 5. sum-reduces the resulting [`HeatLoad`] to the coordinator.
//!
//! The coordinator then writes `i_energy`, `i_weight`, `e_energy` and
//! `e_weight`, and a closing barrier keeps every worker on that step
//! until it is written.

use std::time::Instant;

use middleman_core::{
    element_count, BlockInfo, Column, Communicator, DType, Particle, Species, StepId,
    StepReader, StepStatus, VariableDef,
};

use crate::config::RegistrySync;
use crate::driver::{Pipeline, PipelineState};
use crate::error::PipelineError;
use crate::ingest::{assigned_blocks, fetch_block, is_block_fault, particle_vars, SpeciesColumns};
use crate::integrator::{HeatLoad, HeatloadIntegrator};
use crate::merge::{broadcast_records, gather_species, reduce_channels};
use crate::metrics::{micros_since, StepMetrics};
use crate::output::{LazyOutput, WriterFactory};
use crate::registry::EscapedRegistry;

fn slot(species: Species) -> usize {
    match species {
        Species::Ion => 0,
        Species::Electron => 1,
    }
}

/// Output schema: energy and weight per species, each a global `f64`
/// array of `cells`.
pub fn output_schema(cells: usize) -> Vec<VariableDef> {
    Species::ALL
        .iter()
        .flat_map(|&s| {
            let (energy, weight) = HeatLoad::new(s, 0).var_names();
            [
                VariableDef::global_1d(energy, DType::F64, cells),
                VariableDef::global_1d(weight, DType::F64, cells),
            ]
        })
        .collect()
}

/// Heatload pipeline for one worker.
pub struct HeatloadPipeline<C: Communicator> {
    comm: C,
    reader: Box<dyn StepReader>,
    output: LazyOutput,
    integrator: Box<dyn HeatloadIntegrator>,
    sync: RegistrySync,
    registries: [EscapedRegistry; 2],
    heatloads: [HeatLoad; 2],
    divertor: [Vec<Particle>; 2],
    step: StepId,
    state: PipelineState,
    metrics: StepMetrics,
    finalized: bool,
}

impl<C: Communicator> HeatloadPipeline<C> {
    /// Build a worker's pipeline with heatload tallies of `cells` cells.
    ///
    /// `output` is only invoked on the coordinator, on its first
    /// emitted step.
    pub fn new(
        comm: C,
        reader: Box<dyn StepReader>,
        output: WriterFactory,
        integrator: Box<dyn HeatloadIntegrator>,
        cells: usize,
        sync: RegistrySync,
    ) -> Self {
        let output = LazyOutput::new(comm.rank(), output);
        log::info!(
            "heatload: rank {} of {}, {cells} cells, registry sync {sync}",
            comm.rank(),
            comm.size()
        );
        Self {
            comm,
            reader,
            output,
            integrator,
            sync,
            registries: Species::ALL.map(EscapedRegistry::new),
            heatloads: Species::ALL.map(|s| HeatLoad::new(s, cells)),
            divertor: [Vec::new(), Vec::new()],
            step: StepId(0),
            state: PipelineState::AwaitingStep,
            metrics: StepMetrics::default(),
            finalized: false,
        }
    }

    /// This worker's view of a species' escaped registry.
    pub fn registry(&self, species: Species) -> &EscapedRegistry {
        &self.registries[slot(species)]
    }

    /// This worker's divertor particles of the last completed step.
    pub fn divertor(&self, species: Species) -> &[Particle] {
        &self.divertor[slot(species)]
    }

    /// A species' heatload. After a step, the coordinator's copy holds
    /// the sum over all workers.
    pub fn heatload(&self, species: Species) -> &HeatLoad {
        &self.heatloads[slot(species)]
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
                log::info!("heatload: end of stream at step {}", self.step);
                return Ok(StepStatus::EndOfStream);
            }
        }
        let mut metrics = StepMetrics {
            step: self.step,
            ..Default::default()
        };

        self.state = PipelineState::Consuming;
        let t = Instant::now();
        let mut local = [SpeciesColumns::default(), SpeciesColumns::default()];
        for species in Species::ALL {
            local[slot(species)] = self.ingest_species(species, &mut metrics)?;
        }
        self.reader.end_step()?;
        metrics.ingest_us = micros_since(t);

        self.state = PipelineState::Merging;
        let t = Instant::now();
        for species in Species::ALL {
            let (escaped, divertor) = local[slot(species)].classify();
            log::debug!(
                "step {}: {species} escaped {} divertor {}",
                self.step,
                escaped.len(),
                divertor.len()
            );
            self.merge_escaped(species, &escaped, &mut metrics)?;
            self.divertor[slot(species)] = divertor;
            self.integrate(species)?;
        }
        metrics.merge_us = micros_since(t);

        self.state = PipelineState::Emitting;
        if self.comm.is_root() {
            let t = Instant::now();
            for species in Species::ALL {
                log::debug!(
                    "step {}: {species} registry holds {}",
                    self.step,
                    self.registry(species).len()
                );
            }
            let cells = self.heatloads[0].cells();
            let mut values = Vec::with_capacity(4);
            for hl in &self.heatloads {
                let (energy, weight) = hl.var_names();
                values.push((energy, Column::F64(hl.energy().to_vec())));
                values.push((weight, Column::F64(hl.weight().to_vec())));
            }
            self.output.emit(|| output_schema(cells), values)?;
            metrics.emit_us = micros_since(t);
        }
        self.comm.barrier()?;

        self.step = self.step.next();
        metrics.total_us = micros_since(started);
        self.metrics = metrics;
        Ok(StepStatus::Ok)
    }

    fn ingest_species(
        &mut self,
        species: Species,
        metrics: &mut StepMetrics,
    ) -> Result<SpeciesColumns, PipelineError> {
        let names = particle_vars(species);
        let blocks = assigned_blocks(self.reader.as_ref(), &self.comm, &names[0], self.step)?;
        let mut cols = SpeciesColumns::default();
        for block in &blocks {
            self.ingest_block(species, &names, block, &mut cols, metrics)?;
        }
        Ok(cols)
    }

    fn ingest_block(
        &mut self,
        species: Species,
        names: &[String],
        block: &BlockInfo,
        cols: &mut SpeciesColumns,
        metrics: &mut StepMetrics,
    ) -> Result<(), PipelineError> {
        if element_count(&block.count) == 0 {
            return Ok(());
        }
        let fetched = match fetch_block(self.reader.as_mut(), names, block.id) {
            Ok(f) => f,
            Err(e) if is_block_fault(&e) => {
                log::warn!("step {}: {species} block {} skipped: {e}", self.step, block.id);
                metrics.blocks_rejected += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match cols.append_block(fetched) {
            Ok(n) => {
                metrics.blocks_read += 1;
                metrics.rows_ingested += n as u64;
            }
            Err(reason) => {
                log::warn!(
                    "step {}: {species} block {} rejected: {reason}",
                    self.step,
                    block.id
                );
                metrics.blocks_rejected += 1;
            }
        }
        Ok(())
    }

    fn merge_escaped(
        &mut self,
        species: Species,
        escaped: &SpeciesColumns,
        metrics: &mut StepMetrics,
    ) -> Result<(), PipelineError> {
        let step = self.step;
        let gathered = gather_species(&mut self.comm, escaped)?;
        let registry = &mut self.registries[slot(species)];
        if let Some(all) = gathered {
            metrics.records_gathered += all.len() as u64;
            let report = registry.upsert(step, all.particles());
            metrics.registry_inserts += report.inserted as u64;
            metrics.registry_duplicates += report.duplicates as u64;
        }
        if self.sync == RegistrySync::Broadcast {
            let fresh: Vec<Particle> = if self.comm.is_root() {
                registry.records_inserted_at(step).copied().collect()
            } else {
                Vec::new()
            };
            let received = broadcast_records(&mut self.comm, &fresh)?;
            if !self.comm.is_root() {
                registry.upsert(step, received);
            }
        }
        Ok(())
    }

    fn integrate(&mut self, species: Species) -> Result<(), PipelineError> {
        let i = slot(species);
        let acc = &mut self.heatloads[i];
        acc.reset();
        self.integrator
            .integrate(&self.divertor[i], species, &self.registries[i], acc);
        let (energy, weight) = acc.tallies_mut();
        reduce_channels(&mut self.comm, &mut [energy, weight])?;
        Ok(())
    }
}

impl<C: Communicator> Pipeline for HeatloadPipeline<C> {
    fn name(&self) -> &str {
        "heatload"
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
        let output = self.output.close();
        log::info!(
            "heatload: finalized rank {} after {} steps, escaped ions {} electrons {}",
            self.comm.rank(),
            self.step,
            self.registry(Species::Ion).len(),
            self.registry(Species::Electron).len()
        );
        reader?;
        output?;
        Ok(())
    }
}
