//! In-process collective communicators for Middleman workers.
//!
//! Two implementations of [`Communicator`](middleman_core::Communicator):
//!
//! - [`SelfComm`]: a group of one; every collective is a local copy.
//! - [`ThreadComm`]: a group of worker threads connected by crossbeam
//!   channels, with sequence-tagged collectives, bounded waits, and
//!   rank-ordered reductions. [`run_world`] spawns one scoped thread per
//!   rank and collects their results in rank order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod local;
pub mod thread;

pub use local::SelfComm;
pub use thread::{run_world, run_world_with, ThreadComm, DEFAULT_TIMEOUT};
