//! Particle records, species, and flag decoding.
//!
//! The upstream simulation publishes particles as parallel columns: a
//! global id, a flag bitfield, the escape step, a weight-loss scalar,
//! and an `n x PHASE_WIDTH` phase block. [`Particle`] is one row of
//! those columns and [`ParticleFlags`] turns the bitfield into named
//! accessors once per record.

use std::fmt;

/// Number of `f32` fields per particle in the phase column.
///
/// Field order: `r, z, phi, rho, w1, w2, mu, w0, f0, psi, B`.
pub const PHASE_WIDTH: usize = 11;

/// Particle species tracked by the heatload pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Species {
    /// Ions (variable prefix `i`).
    Ion,
    /// Electrons (variable prefix `e`).
    Electron,
}

impl Species {
    /// Both species, in processing order.
    pub const ALL: [Species; 2] = [Species::Ion, Species::Electron];

    /// Single-letter prefix used in stream variable names.
    pub fn prefix(self) -> char {
        match self {
            Self::Ion => 'i',
            Self::Electron => 'e',
        }
    }

    /// Stream variable name for a per-species column, e.g. `igid`.
    pub fn var(self, column: &str) -> String {
        format!("{}{}", self.prefix(), column)
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ion => f.write_str("ion"),
            Self::Electron => f.write_str("electron"),
        }
    }
}

/// Decoded particle flag bitfield.
///
/// Only the escaped bit is interpreted. Any other bit pattern is kept
/// in [`raw`](Self::raw) and otherwise ignored; decoding never fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ParticleFlags(u32);

impl ParticleFlags {
    /// The particle left the confined domain and hit the boundary.
    pub const ESCAPED: u32 = 1 << 0;

    /// Decode a raw flag value as published by the simulation.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw as u32)
    }

    /// The raw bitfield, including uninterpreted bits.
    pub fn raw(self) -> i32 {
        self.0 as i32
    }

    /// Whether the escaped bit is set.
    pub fn escaped(self) -> bool {
        self.0 & Self::ESCAPED != 0
    }
}

/// One particle row assembled from the published columns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    /// Species-scoped global id.
    pub gid: i64,
    /// Decoded flag bitfield.
    pub flags: ParticleFlags,
    /// Simulation step at which the particle escaped.
    pub esc_step: i32,
    /// Major radius.
    pub r: f32,
    /// Vertical position.
    pub z: f32,
    /// Toroidal angle.
    pub phi: f32,
    /// Gyroradius.
    pub rho: f32,
    /// First weight.
    pub w1: f32,
    /// Second weight.
    pub w2: f32,
    /// Magnetic moment.
    pub mu: f32,
    /// Initial weight.
    pub w0: f32,
    /// Initial distribution value.
    pub f0: f32,
    /// Poloidal flux.
    pub psi: f32,
    /// Magnetic field magnitude.
    pub b: f32,
    /// Accumulated weight loss.
    pub dw: f32,
}

impl Particle {
    /// Assemble a particle from its scalar columns and one phase row.
    ///
    /// `phase` must hold exactly [`PHASE_WIDTH`] values; callers slice
    /// it out of the phase column with `chunks_exact(PHASE_WIDTH)`.
    pub fn from_row(gid: i64, flag: i32, esc_step: i32, dw: f32, phase: &[f32]) -> Self {
        debug_assert_eq!(phase.len(), PHASE_WIDTH);
        Self {
            gid,
            flags: ParticleFlags::from_raw(flag),
            esc_step,
            r: phase[0],
            z: phase[1],
            phi: phase[2],
            rho: phase[3],
            w1: phase[4],
            w2: phase[5],
            mu: phase[6],
            w0: phase[7],
            f0: phase[8],
            psi: phase[9],
            b: phase[10],
            dw,
        }
    }

    /// Whether the escaped bit is set.
    pub fn escaped(&self) -> bool {
        self.flags.escaped()
    }

    /// The phase fields in column order.
    pub fn phase(&self) -> [f32; PHASE_WIDTH] {
        [
            self.r, self.z, self.phi, self.rho, self.w1, self.w2, self.mu, self.w0, self.f0,
            self.psi, self.b,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn species_variable_names() {
        assert_eq!(Species::Ion.var("gid"), "igid");
        assert_eq!(Species::Electron.var("phase"), "ephase");
    }

    #[test]
    fn escaped_bit_decodes() {
        assert!(ParticleFlags::from_raw(1).escaped());
        assert!(!ParticleFlags::from_raw(2).escaped());
        assert!(ParticleFlags::from_raw(3).escaped());
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let flags = ParticleFlags::from_raw(-1);
        assert!(flags.escaped());
        assert_eq!(flags.raw(), -1);
        let flags = ParticleFlags::from_raw(0x7f00);
        assert!(!flags.escaped());
    }

    #[test]
    fn from_row_maps_phase_fields() {
        let phase: Vec<f32> = (0..PHASE_WIDTH).map(|i| i as f32).collect();
        let p = Particle::from_row(9, 1, 40, 0.5, &phase);
        assert_eq!(p.gid, 9);
        assert!(p.escaped());
        assert_eq!(p.esc_step, 40);
        assert_eq!(p.r, 0.0);
        assert_eq!(p.psi, 9.0);
        assert_eq!(p.b, 10.0);
        assert_eq!(p.dw, 0.5);
        assert_eq!(p.phase().to_vec(), phase);
    }

    proptest! {
        #[test]
        fn flag_decoding_is_pure(raw in any::<i32>()) {
            let a = ParticleFlags::from_raw(raw);
            let b = ParticleFlags::from_raw(raw);
            prop_assert_eq!(a.escaped(), b.escaped());
            prop_assert_eq!(a.escaped(), raw & 1 != 0);
            prop_assert_eq!(a.raw(), raw);
        }
    }
}
