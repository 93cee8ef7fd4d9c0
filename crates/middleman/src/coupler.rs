//! File-backed coupler run: the mesh, the pipelines, and their worker
//! groups.
//!
//! Each selected pipeline gets its own [`ThreadComm`] world of
//! `resolved_worker_count()` workers, so the two pipelines never share
//! a collective sequence. Inputs are followed while the producer is
//! still writing them.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::thread::ScopedJoinHandle;

use middleman_comm::{run_world_with, ThreadComm};
use middleman_core::{Communicator, Rank, StepWriter};
use middleman_engine::{
    load_triangle_count, run_to_end, ConfigError, CouplerConfig, DiffusionPipeline,
    HeatloadPipeline, PipelineError, PsiTally, RunSummary, WriterFactory,
};
use middleman_stream::{FileStepReader, FileStepWriter};

// ── Errors ─────────────────────────────────────────────────────────

/// Errors that end a coupler run.
#[derive(Debug)]
pub enum CouplerError {
    /// The configuration is invalid.
    Config(ConfigError),
    /// The output directory could not be created.
    Io {
        /// The directory.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The mesh stream could not be read.
    Mesh(PipelineError),
    /// A pipeline worker failed.
    Pipeline {
        /// Pipeline name.
        pipeline: &'static str,
        /// The lowest failing rank.
        rank: Rank,
        /// What failed.
        source: PipelineError,
    },
}

impl fmt::Display for CouplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Mesh(e) => write!(f, "mesh: {e}"),
            Self::Pipeline {
                pipeline,
                rank,
                source,
            } => write!(f, "{pipeline} rank {rank}: {source}"),
        }
    }
}

impl Error for CouplerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::Mesh(e) => Some(e),
            Self::Pipeline { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for CouplerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ── Run ────────────────────────────────────────────────────────────

/// What a completed run did, as seen by the coordinating workers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouplerReport {
    /// Workers per pipeline.
    pub workers: usize,
    /// Mesh triangle count, if the diffusion pipeline ran.
    pub ntriangle: Option<usize>,
    /// Diffusion run summary, if selected.
    pub diffusion: Option<RunSummary>,
    /// Heatload run summary, if selected.
    pub heatload: Option<RunSummary>,
}

/// Validate `config`, then run every selected pipeline to end of stream.
pub fn run(config: &CouplerConfig) -> Result<CouplerReport, CouplerError> {
    config.validate()?;
    let workers = config.resolved_worker_count();
    std::fs::create_dir_all(&config.output_dir).map_err(|source| CouplerError::Io {
        path: config.output_dir.clone(),
        source,
    })?;
    log::info!(
        "coupler: {} with {workers} workers each, data {} -> output {}",
        config.pipelines,
        config.data_dir.display(),
        config.output_dir.display()
    );

    let ntriangle = if config.pipelines.diffusion() {
        let mut mesh = FileStepReader::follow(config.mesh_path(), config.begin_step_wait);
        Some(load_triangle_count(&mut mesh, &config.poll).map_err(CouplerError::Mesh)?)
    } else {
        None
    };

    let (diffusion, heatload) = std::thread::scope(|scope| {
        let diffusion = ntriangle.map(|n| scope.spawn(move || run_diffusion(config, workers, n)));
        let heatload = config
            .pipelines
            .heatload()
            .then(|| scope.spawn(move || run_heatload(config, workers)));
        (diffusion.map(join), heatload.map(join))
    });

    Ok(CouplerReport {
        workers,
        ntriangle,
        diffusion: diffusion.transpose()?,
        heatload: heatload.transpose()?,
    })
}

fn join<T>(handle: ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
}

fn file_output(path: PathBuf) -> WriterFactory {
    Box::new(move || Ok(Box::new(FileStepWriter::create(path)?) as Box<dyn StepWriter>))
}

/// The root's summary, or the error of the lowest failing rank.
fn collect(
    pipeline: &'static str,
    results: Vec<Result<RunSummary, PipelineError>>,
) -> Result<RunSummary, CouplerError> {
    let mut summaries = Vec::with_capacity(results.len());
    for (rank, result) in results.into_iter().enumerate() {
        summaries.push(result.map_err(|source| CouplerError::Pipeline {
            pipeline,
            rank: Rank(rank),
            source,
        })?);
    }
    summaries
        .into_iter()
        .next()
        .ok_or(CouplerError::Config(ConfigError::ZeroWorkers))
}

fn run_diffusion(
    config: &CouplerConfig,
    workers: usize,
    ntriangle: usize,
) -> Result<RunSummary, CouplerError> {
    let comms = ThreadComm::world_with_timeout(workers, config.comm_timeout);
    let results = run_world_with(comms, |comm| -> Result<RunSummary, PipelineError> {
        let rank = comm.rank();
        let reader = FileStepReader::follow(config.tracer_diag_path(), config.begin_step_wait);
        let mirror = FileStepWriter::create(config.mirror_path(rank, workers))?;
        let mut pipeline = DiffusionPipeline::new(
            comm,
            Box::new(reader),
            Box::new(mirror),
            file_output(config.diffusion_output_path()),
            ntriangle,
        )?;
        run_to_end(&mut pipeline, &config.poll)
    });
    collect("diffusion", results)
}

fn run_heatload(config: &CouplerConfig, workers: usize) -> Result<RunSummary, CouplerError> {
    let comms = ThreadComm::world_with_timeout(workers, config.comm_timeout);
    let results = run_world_with(comms, |comm| -> Result<RunSummary, PipelineError> {
        let reader = FileStepReader::follow(config.escaped_ptls_path(), config.begin_step_wait);
        let mut pipeline = HeatloadPipeline::new(
            comm,
            Box::new(reader),
            file_output(config.heatload_output_path()),
            Box::new(PsiTally::new(&config.tally)),
            config.tally.cells,
            config.registry_sync,
        );
        run_to_end(&mut pipeline, &config.poll)
    });
    collect("heatload", results)
}
