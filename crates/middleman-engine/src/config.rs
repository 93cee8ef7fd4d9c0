//! Coupler configuration, validation, and error types.
//!
//! [`CouplerConfig`] collects everything a worker set needs to run the
//! pipelines: where the upstream streams live, where output goes, how
//! many workers to use, and how to poll a producer that is behind.
//! [`validate()`](CouplerConfig::validate) checks structural invariants
//! at startup, before any stream is opened.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use middleman_core::Rank;

// ── Stream file names ──────────────────────────────────────────────

/// Mesh metadata stream (holds `n_t`).
pub const MESH_FILE: &str = "xgc.mesh.steps";
/// Per-triangle diffusion statistics produced upstream.
pub const TRACER_DIAG_FILE: &str = "xgc.tracer_diag.steps";
/// Escaped/divertor particle records produced upstream.
pub const ESCAPED_PTLS_FILE: &str = "xgc.escaped_ptls.steps";
/// Reduced diffusion output.
pub const DIFFUSION_OUTPUT_FILE: &str = "xgc.diffusion.steps";
/// Heatload output.
pub const HEATLOAD_OUTPUT_FILE: &str = "xgc.heatload.steps";

// ── PollConfig ─────────────────────────────────────────────────────

/// Sleep schedule used while the producer has not published the next
/// step.
///
/// The first sleep after progress is `initial`; each further NotReady
/// multiplies it by `growth` up to `max`.
#[derive(Clone, Debug, PartialEq)]
pub struct PollConfig {
    /// Sleep after the first NotReady. Default: 10 ms.
    pub initial: Duration,
    /// Upper bound on a single sleep. Default: 1 s.
    pub max: Duration,
    /// Multiplicative growth per consecutive NotReady. Default: 2.0.
    pub growth: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            growth: 2.0,
        }
    }
}

// ── RegistrySync ───────────────────────────────────────────────────

/// Which workers see the escaped-particle registry update of a step
/// before integration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegistrySync {
    /// The coordinator broadcasts newly inserted records, so every
    /// worker integrates against the same registry.
    #[default]
    Broadcast,
    /// Only the coordinator's registry is updated; other workers keep
    /// an empty registry.
    RootOnly,
}

impl fmt::Display for RegistrySync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => f.write_str("broadcast"),
            Self::RootOnly => f.write_str("root-only"),
        }
    }
}

impl FromStr for RegistrySync {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broadcast" => Ok(Self::Broadcast),
            "root-only" | "root" => Ok(Self::RootOnly),
            other => Err(ConfigError::UnknownValue {
                what: "registry sync",
                value: other.to_string(),
            }),
        }
    }
}

// ── PipelineSelection ──────────────────────────────────────────────

/// Which pipelines the coupler runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineSelection {
    /// Binned-reduction (diffusion) only.
    Diffusion,
    /// Classification-and-history (heatload) only.
    Heatload,
    /// Both, each on its own worker group.
    #[default]
    Both,
}

impl PipelineSelection {
    /// Whether the diffusion pipeline is selected.
    pub fn diffusion(self) -> bool {
        matches!(self, Self::Diffusion | Self::Both)
    }

    /// Whether the heatload pipeline is selected.
    pub fn heatload(self) -> bool {
        matches!(self, Self::Heatload | Self::Both)
    }
}

impl fmt::Display for PipelineSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diffusion => f.write_str("diffusion"),
            Self::Heatload => f.write_str("heatload"),
            Self::Both => f.write_str("both"),
        }
    }
}

impl FromStr for PipelineSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diffusion" => Ok(Self::Diffusion),
            "heatload" => Ok(Self::Heatload),
            "both" => Ok(Self::Both),
            other => Err(ConfigError::UnknownValue {
                what: "pipeline",
                value: other.to_string(),
            }),
        }
    }
}

// ── TallyConfig ────────────────────────────────────────────────────

/// Geometry of the heatload tally: `cells` equal bins over
/// `[psi_min, psi_max)`.
#[derive(Clone, Debug, PartialEq)]
pub struct TallyConfig {
    /// Number of bins. Default: 256.
    pub cells: usize,
    /// Lower edge of the first bin. Default: 0.0.
    pub psi_min: f64,
    /// Upper edge of the last bin. Default: 1.0.
    pub psi_max: f64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            cells: 256,
            psi_min: 0.0,
            psi_max: 1.0,
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`CouplerConfig::validate()`] or while parsing
/// a configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// PollConfig invariant violated.
    InvalidPoll {
        /// Description of which invariant was violated.
        reason: String,
    },
    /// TallyConfig invariant violated.
    InvalidTally {
        /// Description of which invariant was violated.
        reason: String,
    },
    /// The communicator timeout is zero.
    ZeroCommTimeout,
    /// An explicit worker count of zero.
    ZeroWorkers,
    /// A named option had an unrecognised value.
    UnknownValue {
        /// The option being parsed.
        what: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPoll { reason } => write!(f, "invalid poll config: {reason}"),
            Self::InvalidTally { reason } => write!(f, "invalid tally config: {reason}"),
            Self::ZeroCommTimeout => write!(f, "communicator timeout must be non-zero"),
            Self::ZeroWorkers => write!(f, "worker count must be at least 1"),
            Self::UnknownValue { what, value } => write!(f, "unknown {what} '{value}'"),
        }
    }
}

impl Error for ConfigError {}

// ── CouplerConfig ──────────────────────────────────────────────────

/// Complete configuration of a coupler run.
#[derive(Clone, Debug, PartialEq)]
pub struct CouplerConfig {
    /// Directory holding the upstream streams. Default: `.`.
    pub data_dir: PathBuf,
    /// Directory for output streams. Default: `.`.
    pub output_dir: PathBuf,
    /// Pipelines to run. Default: both.
    pub pipelines: PipelineSelection,
    /// Workers per pipeline. `None` = auto-detect
    /// (`available_parallelism / 2`, clamped to `[1, 16]`).
    pub worker_count: Option<usize>,
    /// Backoff while the producer is behind.
    pub poll: PollConfig,
    /// How long `begin_step` itself may block before reporting NotReady.
    /// Default: 0 (return immediately and let the driver back off).
    pub begin_step_wait: Duration,
    /// Bound on any single collective wait. Default: 300 s.
    pub comm_timeout: Duration,
    /// Registry visibility policy. Default: broadcast.
    pub registry_sync: RegistrySync,
    /// Heatload tally geometry.
    pub tally: TallyConfig,
}

impl Default for CouplerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            pipelines: PipelineSelection::default(),
            worker_count: None,
            poll: PollConfig::default(),
            begin_step_wait: Duration::ZERO,
            comm_timeout: Duration::from_secs(300),
            registry_sync: RegistrySync::default(),
            tally: TallyConfig::default(),
        }
    }
}

impl CouplerConfig {
    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Worker count, if explicit, must be positive.
        if self.worker_count == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        // 2. Poll schedule.
        let p = &self.poll;
        if p.initial.is_zero() {
            return Err(ConfigError::InvalidPoll {
                reason: "initial sleep must be non-zero".to_string(),
            });
        }
        if p.initial > p.max {
            return Err(ConfigError::InvalidPoll {
                reason: format!("initial ({:?}) exceeds max ({:?})", p.initial, p.max),
            });
        }
        if !p.growth.is_finite() || p.growth < 1.0 {
            return Err(ConfigError::InvalidPoll {
                reason: format!("growth must be finite and >= 1.0, got {}", p.growth),
            });
        }
        // 3. Collectives need a bounded, non-zero wait.
        if self.comm_timeout.is_zero() {
            return Err(ConfigError::ZeroCommTimeout);
        }
        // 4. Tally geometry.
        let t = &self.tally;
        if t.cells == 0 {
            return Err(ConfigError::InvalidTally {
                reason: "cells must be at least 1".to_string(),
            });
        }
        if !t.psi_min.is_finite() || !t.psi_max.is_finite() || t.psi_min >= t.psi_max {
            return Err(ConfigError::InvalidTally {
                reason: format!(
                    "psi range must be finite and increasing, got [{}, {})",
                    t.psi_min, t.psi_max
                ),
            });
        }
        Ok(())
    }

    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, 64),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(2);
                (cpus / 2).clamp(1, 16)
            }
        }
    }

    /// Path of the mesh stream.
    pub fn mesh_path(&self) -> PathBuf {
        self.data_dir.join(MESH_FILE)
    }

    /// Path of the upstream diffusion table stream.
    pub fn tracer_diag_path(&self) -> PathBuf {
        self.data_dir.join(TRACER_DIAG_FILE)
    }

    /// Path of the upstream particle stream.
    pub fn escaped_ptls_path(&self) -> PathBuf {
        self.data_dir.join(ESCAPED_PTLS_FILE)
    }

    /// Path of the reduced diffusion output.
    pub fn diffusion_output_path(&self) -> PathBuf {
        self.output_dir.join(DIFFUSION_OUTPUT_FILE)
    }

    /// Path of the heatload output.
    pub fn heatload_output_path(&self) -> PathBuf {
        self.output_dir.join(HEATLOAD_OUTPUT_FILE)
    }

    /// Path of one worker's raw-table mirror.
    pub fn mirror_path(&self, rank: Rank, workers: usize) -> PathBuf {
        mirror_path(&self.output_dir, rank, workers)
    }
}

/// Mirror file for `rank`: one shared name for a single worker, one file
/// per rank otherwise.
pub fn mirror_path(dir: &Path, rank: Rank, workers: usize) -> PathBuf {
    if workers <= 1 {
        dir.join("xgc.tracer_diag.copy.steps")
    } else {
        dir.join(format!("xgc.tracer_diag.copy.r{rank}.steps"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CouplerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = CouplerConfig {
            worker_count: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn poll_growth_below_one_rejected() {
        let mut cfg = CouplerConfig::default();
        cfg.poll.growth = 0.5;
        match cfg.validate() {
            Err(ConfigError::InvalidPoll { .. }) => {}
            other => panic!("expected InvalidPoll, got {other:?}"),
        }
    }

    #[test]
    fn poll_initial_above_max_rejected() {
        let mut cfg = CouplerConfig::default();
        cfg.poll.initial = Duration::from_secs(5);
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPoll { .. })));
    }

    #[test]
    fn inverted_psi_range_rejected() {
        let mut cfg = CouplerConfig::default();
        cfg.tally.psi_min = 2.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTally { .. })));
        cfg.tally.psi_min = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTally { .. })));
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = CouplerConfig {
            comm_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCommTimeout));
    }

    #[test]
    fn worker_count_is_clamped() {
        let mut cfg = CouplerConfig {
            worker_count: Some(500),
            ..Default::default()
        };
        assert_eq!(cfg.resolved_worker_count(), 64);
        cfg.worker_count = None;
        let auto = cfg.resolved_worker_count();
        assert!((1..=16).contains(&auto));
    }

    #[test]
    fn enum_values_parse() {
        assert_eq!("root-only".parse::<RegistrySync>(), Ok(RegistrySync::RootOnly));
        assert_eq!("both".parse::<PipelineSelection>(), Ok(PipelineSelection::Both));
        assert!("sideways".parse::<PipelineSelection>().is_err());
        assert!(PipelineSelection::Heatload.heatload());
        assert!(!PipelineSelection::Heatload.diffusion());
    }

    #[test]
    fn mirror_names_are_per_rank() {
        let dir = Path::new("/out");
        assert_eq!(
            mirror_path(dir, Rank(0), 1),
            PathBuf::from("/out/xgc.tracer_diag.copy.steps")
        );
        assert_eq!(
            mirror_path(dir, Rank(3), 4),
            PathBuf::from("/out/xgc.tracer_diag.copy.r3.steps")
        );
    }
}
