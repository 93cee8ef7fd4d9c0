//! Middleman: a step-synchronized diagnostics coupler.
//!
//! Middleman sits between a simulation that streams diagnostic output
//! step by step and the consumers of reduced results. A fixed group of
//! workers reads each step's blocks in parallel, merges them through
//! collectives, and the coordinating worker writes the result.
//!
//! This is the facade crate: it re-exports the sub-crates and provides
//! [`coupler::run`], which wires the pipelines to step files the way the
//! `middleman` binary does.
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `middleman-core` | IDs, columns, particles, errors, `Communicator`, `StepReader`/`StepWriter` |
//! | [`comm`] | `middleman-comm` | `SelfComm`, `ThreadComm`, `run_world` |
//! | [`stream`] | `middleman-stream` | `StreamHub`, step files |
//! | [`engine`] | `middleman-engine` | Pipelines, registry, driver, config |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`middleman-core`).
pub use middleman_core as types;

/// Collective communicators (`middleman-comm`).
pub use middleman_comm as comm;

/// Step stream engines (`middleman-stream`).
pub use middleman_stream as stream;

/// Pipelines and their configuration (`middleman-engine`).
pub use middleman_engine as engine;

pub mod coupler;

/// Common imports for typical Middleman usage.
pub mod prelude {
    pub use middleman_core::{
        Communicator, Particle, Rank, Species, StepId, StepReader, StepStatus, StepWriter,
    };

    pub use middleman_comm::{run_world, SelfComm, ThreadComm};

    pub use middleman_stream::{FileStepReader, FileStepWriter, StreamHub};

    pub use middleman_engine::{
        run_to_end, CouplerConfig, DiffusionPipeline, EscapedRegistry, HeatloadIntegrator,
        HeatloadPipeline, Pipeline, PipelineError, RegistrySync, StepMetrics,
    };

    pub use crate::coupler::{run, CouplerError, CouplerReport};
}
