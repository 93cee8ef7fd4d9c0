//! Pipeline-level errors.

use std::error::Error;
use std::fmt;

use middleman_core::{CommError, StreamError};

use crate::split::SplitError;

/// Errors that abort a pipeline step.
///
/// Malformed blocks and rows are not errors; they are logged, counted in
/// [`StepMetrics`](crate::StepMetrics) and skipped. Everything here is
/// fatal to the worker set: the caller should finalize and exit.
#[derive(Debug)]
pub enum PipelineError {
    /// A collective operation failed.
    Comm(CommError),
    /// The input or output stream failed.
    Stream(StreamError),
    /// Block partitioning was given an invalid worker layout.
    Split(SplitError),
    /// The mesh stream did not provide a usable triangle count.
    Mesh {
        /// What was wrong with the mesh stream.
        detail: String,
    },
    /// Output was attempted on a worker other than the coordinator.
    NotCoordinator,
    /// `step()` was called after the pipeline reached end of stream or
    /// failed.
    Finished,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comm(e) => write!(f, "collective: {e}"),
            Self::Stream(e) => write!(f, "stream: {e}"),
            Self::Split(e) => write!(f, "split: {e}"),
            Self::Mesh { detail } => write!(f, "mesh: {detail}"),
            Self::NotCoordinator => write!(f, "only the coordinating worker writes output"),
            Self::Finished => write!(f, "pipeline has finished"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comm(e) => Some(e),
            Self::Stream(e) => Some(e),
            Self::Split(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommError> for PipelineError {
    fn from(e: CommError) -> Self {
        Self::Comm(e)
    }
}

impl From<StreamError> for PipelineError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

impl From<SplitError> for PipelineError {
    fn from(e: SplitError) -> Self {
        Self::Split(e)
    }
}
