//! Contiguous partition of a step's blocks across workers.

use std::error::Error;
use std::fmt;
use std::ops::Range;

use middleman_core::Rank;

/// Invalid arguments to [`split`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitError {
    /// The worker count is zero.
    NoWorkers,
    /// The rank is not below the worker count.
    RankOutOfRange {
        /// The requested rank.
        rank: Rank,
        /// Number of workers.
        workers: usize,
    },
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWorkers => write!(f, "cannot split across zero workers"),
            Self::RankOutOfRange { rank, workers } => {
                write!(f, "rank {rank} out of range for {workers} workers")
            }
        }
    }
}

impl Error for SplitError {}

/// The half-open range of block indices assigned to `rank`.
///
/// Ranges over all ranks partition `0..n_blocks` in rank order. The
/// first `n_blocks % workers` ranks take one extra block, so share sizes
/// differ by at most one. Ranks beyond the block count get empty ranges.
///
/// ```
/// use middleman_core::Rank;
/// use middleman_engine::split;
///
/// assert_eq!(split(10, 3, Rank(0)).unwrap(), 0..4);
/// assert_eq!(split(10, 3, Rank(1)).unwrap(), 4..7);
/// assert_eq!(split(10, 3, Rank(2)).unwrap(), 7..10);
/// assert_eq!(split(1, 3, Rank(2)).unwrap(), 1..1);
/// ```
pub fn split(n_blocks: usize, workers: usize, rank: Rank) -> Result<Range<usize>, SplitError> {
    if workers == 0 {
        return Err(SplitError::NoWorkers);
    }
    if rank.0 >= workers {
        return Err(SplitError::RankOutOfRange { rank, workers });
    }
    let base = n_blocks / workers;
    let rem = n_blocks % workers;
    let r = rank.0;
    let offset = r * base + r.min(rem);
    let count = base + usize::from(r < rem);
    Ok(offset..offset + count)
}
