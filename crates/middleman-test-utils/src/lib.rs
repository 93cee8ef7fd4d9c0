//! Test fixtures for Middleman development.
//!
//! Builders for the upstream streams the pipelines consume: the mesh
//! stream, the per-triangle diffusion table, and per-species particle
//! columns. Each writer helper takes any
//! [`StepWriter`](middleman_core::StepWriter), so the same fixture can
//! feed a [`StreamHub`](middleman_stream::StreamHub) or a step file.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{
    define_particles, define_table, mesh_hub, particle, particle_hub, table_hub, table_row,
    write_mesh, write_particle_step, write_table_step, ParticleStep,
};
