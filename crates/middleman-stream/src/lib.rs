//! Step-oriented stream engines for Middleman.
//!
//! Both engines implement the [`StepReader`](middleman_core::StepReader)
//! and [`StepWriter`](middleman_core::StepWriter) traits over the same
//! in-memory [`StepFrame`]:
//!
//! - [`StreamHub`] is an in-process staging stream with any number of
//!   writers and readers. Pipelines, tests and the benches couple through it.
//! - [`FileStepWriter`] / [`FileStepReader`] persist frames in the
//!   `.steps` binary format (see [`codec`]). The reader can follow a
//!   file that its producer is still appending to.
//!
//! # Format
//!
//! ```text
//! [MAGIC "MMST"] [VERSION u8] [FRAME]* [END]
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod file;
pub mod frame;
pub mod hub;

pub use file::{FileStepReader, FileStepWriter};
pub use frame::{FrameBuilder, FrameVar, OpenStep, StepFrame};
pub use hub::{HubReader, HubWriter, StreamHub};

/// Magic bytes at the start of every step file.
pub const MAGIC: [u8; 4] = *b"MMST";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;
