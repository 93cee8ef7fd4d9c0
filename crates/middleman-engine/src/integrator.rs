//! Heatload accumulation.
//!
//! The heatload physics is pluggable through [`HeatloadIntegrator`]: it
//! receives the worker's divertor particles for one species together
//! with the escaped registry, and deposits into a per-cell
//! [`HeatLoad`]. [`PsiTally`] is a reference integrator that bins by
//! poloidal flux.

use middleman_core::{Particle, Species};

use crate::config::TallyConfig;
use crate::registry::EscapedRegistry;

/// Per-cell energy and particle-weight tallies for one species.
#[derive(Clone, Debug, PartialEq)]
pub struct HeatLoad {
    species: Species,
    energy: Vec<f64>,
    weight: Vec<f64>,
}

impl HeatLoad {
    /// Zeroed tallies over `cells` cells.
    pub fn new(species: Species, cells: usize) -> Self {
        Self {
            species,
            energy: vec![0.0; cells],
            weight: vec![0.0; cells],
        }
    }

    /// Species this accumulator belongs to.
    pub fn species(&self) -> Species {
        self.species
    }

    /// Number of cells.
    pub fn cells(&self) -> usize {
        self.energy.len()
    }

    /// Zero every tally.
    pub fn reset(&mut self) {
        self.energy.fill(0.0);
        self.weight.fill(0.0);
    }

    /// Add one deposit to `cell`. Out-of-range cells are ignored and
    /// reported as `false`.
    pub fn deposit(&mut self, cell: usize, energy: f64, weight: f64) -> bool {
        match (self.energy.get_mut(cell), self.weight.get_mut(cell)) {
            (Some(e), Some(w)) => {
                *e += energy;
                *w += weight;
                true
            }
            _ => false,
        }
    }

    /// Energy tally per cell.
    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    /// Weight tally per cell.
    pub fn weight(&self) -> &[f64] {
        &self.weight
    }

    /// Mutable tallies, `(energy, weight)`, for in-place reduction.
    pub fn tallies_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.energy, &mut self.weight)
    }

    /// Output variable names, `(energy, weight)`, e.g. `i_energy`.
    pub fn var_names(&self) -> (String, String) {
        let p = self.species.prefix();
        (format!("{p}_energy"), format!("{p}_weight"))
    }
}

/// Deposits divertor particles into a heatload accumulator.
pub trait HeatloadIntegrator: Send {
    /// Integrate one species for one step.
    ///
    /// `divertor` holds this worker's non-escaped particles of the step;
    /// `escaped` is this worker's view of the species registry after the
    /// step's merge. `acc` is zeroed before the call.
    fn integrate(
        &mut self,
        divertor: &[Particle],
        species: Species,
        escaped: &EscapedRegistry,
        acc: &mut HeatLoad,
    );
}

/// Reference integrator: bins by ψ over `[psi_min, psi_max)`.
///
/// Each particle deposits weight `w0·w1` and energy `w0·w1·μ·B` into
/// its ψ bin. Particles with non-finite fields or ψ outside the range
/// are skipped. This is a tally, not a physics model of the divertor
/// deposition.
#[derive(Clone, Debug)]
pub struct PsiTally {
    psi_min: f64,
    psi_max: f64,
    cells: usize,
    skipped: u64,
}

impl PsiTally {
    /// A tally over the configured geometry.
    pub fn new(config: &TallyConfig) -> Self {
        Self {
            psi_min: config.psi_min,
            psi_max: config.psi_max,
            cells: config.cells,
            skipped: 0,
        }
    }

    /// Bin index for `psi`, if inside the range.
    pub fn cell_of(&self, psi: f64) -> Option<usize> {
        if !psi.is_finite() || psi < self.psi_min || psi >= self.psi_max {
            return None;
        }
        let frac = (psi - self.psi_min) / (self.psi_max - self.psi_min);
        Some(((frac * self.cells as f64) as usize).min(self.cells - 1))
    }

    /// Particles skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl HeatloadIntegrator for PsiTally {
    fn integrate(
        &mut self,
        divertor: &[Particle],
        _species: Species,
        _escaped: &EscapedRegistry,
        acc: &mut HeatLoad,
    ) {
        for p in divertor {
            let weight = f64::from(p.w0) * f64::from(p.w1);
            let energy = weight * f64::from(p.mu) * f64::from(p.b);
            let deposited = energy.is_finite()
                && self
                    .cell_of(f64::from(p.psi))
                    .is_some_and(|cell| acc.deposit(cell, energy, weight));
            if !deposited {
                self.skipped += 1;
            }
        }
    }
}
