//! Error types shared across the Middleman workspace.
//!
//! Organized by collaborator: [`CommError`] for collective message
//! passing and [`StreamError`] for step-oriented streaming I/O.
//! Pipeline-level errors live in `middleman-engine` and wrap these.

use std::error::Error;
use std::fmt;
use std::io;

use crate::column::DType;
use crate::id::{BlockId, Rank};

/// Errors from a collective operation.
///
/// Every variant is fatal to the step in progress: a collective that
/// failed on one worker leaves its peers blocked or desynchronized, so
/// callers abort the whole worker set rather than retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommError {
    /// A peer did not deliver its contribution within the timeout.
    Timeout {
        /// The worker that was waiting.
        rank: Rank,
        /// The peer it was waiting for.
        peer: Rank,
        /// Collective sequence number being waited on.
        seq: u64,
    },
    /// A peer's channel closed (the peer exited or panicked).
    Disconnected {
        /// The peer that went away.
        peer: Rank,
    },
    /// Workers entered different collectives at the same sequence number.
    CollectiveMismatch {
        /// Collective sequence number.
        seq: u64,
        /// Operation this worker is executing.
        expected: &'static str,
        /// Operation the peer sent.
        found: &'static str,
    },
    /// A peer contributed data of a different element type.
    TypeMismatch {
        /// Element type this worker expected.
        expected: DType,
        /// Element type received.
        found: DType,
    },
    /// A contribution's length disagrees with the agreed count.
    CountMismatch {
        /// The contributing worker.
        source: Rank,
        /// Length announced for that worker.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },
    /// The root rank is outside the communicator.
    InvalidRoot {
        /// The requested root.
        root: Rank,
        /// Communicator size.
        size: usize,
    },
    /// A gather layout does not describe this communicator.
    LayoutMismatch {
        /// Number of per-worker entries in the layout.
        entries: usize,
        /// Communicator size.
        size: usize,
    },
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { rank, peer, seq } => {
                write!(f, "rank {rank} timed out waiting for rank {peer} (collective #{seq})")
            }
            Self::Disconnected { peer } => write!(f, "rank {peer} disconnected"),
            Self::CollectiveMismatch {
                seq,
                expected,
                found,
            } => write!(
                f,
                "collective #{seq} mismatch: executing {expected}, peer sent {found}"
            ),
            Self::TypeMismatch { expected, found } => {
                write!(f, "element type mismatch: expected {expected}, got {found}")
            }
            Self::CountMismatch {
                source,
                expected,
                actual,
            } => write!(
                f,
                "rank {source} contributed {actual} elements, layout expects {expected}"
            ),
            Self::InvalidRoot { root, size } => {
                write!(f, "root rank {root} outside communicator of size {size}")
            }
            Self::LayoutMismatch { entries, size } => {
                write!(
                    f,
                    "gather layout has {entries} entries for communicator of size {size}"
                )
            }
        }
    }
}

impl Error for CommError {}

/// Errors from a step-oriented stream engine.
#[derive(Debug)]
pub enum StreamError {
    /// An I/O error from the underlying file.
    Io(io::Error),
    /// The file does not start with the expected magic bytes.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u8,
    },
    /// A frame could not be decoded.
    MalformedFrame {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// The variable does not exist in the current step or schema.
    UnknownVariable {
        /// Variable name.
        name: String,
    },
    /// The variable exists but has no block with this id.
    UnknownBlock {
        /// Variable name.
        name: String,
        /// Requested block.
        block: BlockId,
    },
    /// The variable was defined twice on a writer.
    AlreadyDefined {
        /// Variable name.
        name: String,
    },
    /// Data does not match the variable's element type.
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Element type of the variable.
        expected: DType,
        /// Element type supplied or requested.
        found: DType,
    },
    /// Data does not match the variable's shape.
    ShapeMismatch {
        /// Variable name.
        name: String,
        /// Description of the mismatch.
        detail: String,
    },
    /// An operation that needs an open step was called outside one.
    NoActiveStep,
    /// `begin_step` was called while a step is already open.
    StepInProgress,
    /// The stream has been closed.
    Closed,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes (expected b\"MMST\")"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported format version {found}")
            }
            Self::MalformedFrame { detail } => write!(f, "malformed frame: {detail}"),
            Self::UnknownVariable { name } => write!(f, "unknown variable '{name}'"),
            Self::UnknownBlock { name, block } => {
                write!(f, "variable '{name}' has no block {block}")
            }
            Self::AlreadyDefined { name } => write!(f, "variable '{name}' already defined"),
            Self::TypeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "variable '{name}' holds {expected}, got {found}"
            ),
            Self::ShapeMismatch { name, detail } => {
                write!(f, "variable '{name}' shape mismatch: {detail}")
            }
            Self::NoActiveStep => write!(f, "no step is open"),
            Self::StepInProgress => write!(f, "a step is already open"),
            Self::Closed => write!(f, "stream is closed"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
