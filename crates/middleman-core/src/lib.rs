//! Core types and traits for the Middleman diagnostics coupler.
//!
//! This is the leaf crate of the workspace. It defines the vocabulary
//! shared by every other crate: step/rank/block identifiers, typed
//! columns, particle records and their flag decoding, error types, and
//! the two collaborator traits the pipelines are written against:
//! [`Communicator`] (collective message passing) and
//! [`StepReader`]/[`StepWriter`] (step-oriented streaming I/O).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod block;
pub mod column;
pub mod comm;
pub mod error;
pub mod id;
pub mod particle;
pub mod stream;

pub use block::{element_count, BlockInfo, Shape};
pub use column::{Column, DType, Scalar};
pub use comm::{Communicator, GatherLayout};
pub use error::{CommError, StreamError};
pub use id::{BlockId, Rank, StepId};
pub use particle::{Particle, ParticleFlags, Species, PHASE_WIDTH};
pub use stream::{StepReader, StepStatus, StepWriter, VariableDef, VariableInfo};
