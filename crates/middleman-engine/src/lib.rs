//! Step-synchronized pipelines for the Middleman diagnostics coupler.
//!
//! A fixed group of workers runs one pipeline instance each, in
//! lock-step. Every step each worker reads its [`split`] share of the
//! producer's blocks, the group merges through collectives, and the
//! coordinating worker (rank 0) writes the result:
//!
//! - [`DiffusionPipeline`] sums per-triangle table rows into ten
//!   channels and sum-reduces them.
//! - [`HeatloadPipeline`] classifies particles by their flags, gathers
//!   escaped particles into a persistent [`EscapedRegistry`], and
//!   integrates divertor particles into a [`HeatLoad`].
//!
//! [`run_to_end`] drives any [`Pipeline`] until the producer closes its
//! stream, backing off while steps are not ready.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod diffusion;
pub mod driver;
pub mod error;
pub mod heatload;
pub mod ingest;
pub mod integrator;
pub mod merge;
pub mod mesh;
pub mod metrics;
pub mod output;
pub mod registry;
pub mod split;

pub use config::{
    ConfigError, CouplerConfig, PipelineSelection, PollConfig, RegistrySync, TallyConfig,
};
pub use diffusion::{DiffusionPipeline, TriangleAccumulator};
pub use driver::{run_to_end, Pipeline, PipelineState, PollBackoff, RunSummary};
pub use error::PipelineError;
pub use heatload::HeatloadPipeline;
pub use integrator::{HeatLoad, HeatloadIntegrator, PsiTally};
pub use mesh::load_triangle_count;
pub use metrics::StepMetrics;
pub use output::{LazyOutput, WriterFactory};
pub use registry::{EscapedRegistry, UpsertReport};
pub use split::{split, SplitError};
