//! Collective message passing between workers.
//!
//! The pipelines never talk to a transport directly; they are written
//! against [`Communicator`], which exposes exactly the collectives they
//! need. Every worker must call the same collectives in the same order
//! each step, even with zero-length contributions.

use std::ops::Range;

use crate::column::Scalar;
use crate::error::CommError;
use crate::id::Rank;

/// Per-worker lengths and displacements for a variable-count gather.
///
/// Displacements are the running prefix sum of the counts in rank
/// order, so worker `r`'s contribution lands at
/// `displs[r]..displs[r] + counts[r]` in the gathered sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatherLayout {
    counts: Vec<usize>,
    displs: Vec<usize>,
}

impl GatherLayout {
    /// Build a layout from per-worker counts.
    pub fn from_counts(counts: Vec<usize>) -> Self {
        let mut displs = Vec::with_capacity(counts.len());
        let mut total = 0;
        for &n in &counts {
            displs.push(total);
            total += n;
        }
        Self { counts, displs }
    }

    /// Per-worker element counts.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Per-worker displacements.
    pub fn displs(&self) -> &[usize] {
        &self.displs
    }

    /// Number of workers described.
    pub fn workers(&self) -> usize {
        self.counts.len()
    }

    /// Total number of gathered elements.
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Index range of one worker's contribution.
    pub fn range(&self, rank: Rank) -> Range<usize> {
        let start = self.displs[rank.0];
        start..start + self.counts[rank.0]
    }

    /// The same layout with every count multiplied by `width`.
    ///
    /// Used for block-structured columns that carry `width` values per
    /// record.
    pub fn scaled(&self, width: usize) -> Self {
        Self::from_counts(self.counts.iter().map(|&n| n * width).collect())
    }
}

/// Collective operations over a fixed group of workers.
///
/// Methods take `&mut self` because implementations track a collective
/// sequence number. Results that only the root owns are returned as
/// `Option`, `None` on every other worker.
pub trait Communicator: Send {
    /// This worker's rank.
    fn rank(&self) -> Rank;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Whether this worker is the coordinating worker (rank 0).
    fn is_root(&self) -> bool {
        self.rank().is_root()
    }

    /// Elementwise sum of `data` across all workers into `root`'s buffer.
    ///
    /// Contributions are summed in rank order. Non-root buffers are
    /// left in an unspecified state and must not be read.
    fn reduce_sum(&mut self, data: &mut [f64], root: Rank) -> Result<(), CommError>;

    /// Share one count per worker with every worker, in rank order.
    fn all_gather_count(&mut self, count: usize) -> Result<Vec<usize>, CommError>;

    /// Gather variable-length contributions to `root`.
    ///
    /// `layout` must be identical on every worker and `send.len()` must
    /// equal this worker's count in it. Returns the concatenation in
    /// rank order on `root`, `None` elsewhere.
    fn gatherv<T: Scalar>(
        &mut self,
        send: &[T],
        layout: &GatherLayout,
        root: Rank,
    ) -> Result<Option<Vec<T>>, CommError>;

    /// Send `data` from `root` to every worker.
    ///
    /// The argument is ignored on non-root workers; every worker returns
    /// the root's data.
    fn broadcast<T: Scalar>(&mut self, data: Vec<T>, root: Rank) -> Result<Vec<T>, CommError>;

    /// Block until every worker has reached this call.
    fn barrier(&mut self) -> Result<(), CommError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacements_are_prefix_sums() {
        let layout = GatherLayout::from_counts(vec![3, 0, 2, 5]);
        assert_eq!(layout.displs(), &[0, 3, 3, 5]);
        assert_eq!(layout.total(), 10);
        assert_eq!(layout.range(Rank(2)), 3..5);
        assert_eq!(layout.range(Rank(1)), 3..3);
    }

    #[test]
    fn scaled_layout_multiplies_counts_and_offsets() {
        let layout = GatherLayout::from_counts(vec![2, 1]).scaled(11);
        assert_eq!(layout.counts(), &[22, 11]);
        assert_eq!(layout.displs(), &[0, 22]);
        assert_eq!(layout.total(), 33);
    }

    #[test]
    fn empty_layout() {
        let layout = GatherLayout::from_counts(vec![0, 0]);
        assert_eq!(layout.total(), 0);
        assert_eq!(layout.workers(), 2);
    }
}
