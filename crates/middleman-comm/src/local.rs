//! Single-worker communicator.

use middleman_core::{CommError, Communicator, GatherLayout, Rank, Scalar};

/// A communicator whose group contains only the calling worker.
///
/// Used when the coupler runs with one worker and in unit tests that
/// exercise a pipeline without threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelfComm;

impl SelfComm {
    /// Create a single-worker communicator.
    pub fn new() -> Self {
        SelfComm
    }

    fn check_root(root: Rank) -> Result<(), CommError> {
        if root.0 != 0 {
            return Err(CommError::InvalidRoot { root, size: 1 });
        }
        Ok(())
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> Rank {
        Rank::ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn reduce_sum(&mut self, _data: &mut [f64], root: Rank) -> Result<(), CommError> {
        Self::check_root(root)
    }

    fn all_gather_count(&mut self, count: usize) -> Result<Vec<usize>, CommError> {
        Ok(vec![count])
    }

    fn gatherv<T: Scalar>(
        &mut self,
        send: &[T],
        layout: &GatherLayout,
        root: Rank,
    ) -> Result<Option<Vec<T>>, CommError> {
        Self::check_root(root)?;
        if layout.workers() != 1 {
            return Err(CommError::LayoutMismatch {
                entries: layout.workers(),
                size: 1,
            });
        }
        if layout.counts()[0] != send.len() {
            return Err(CommError::CountMismatch {
                source: Rank::ROOT,
                expected: layout.counts()[0],
                actual: send.len(),
            });
        }
        Ok(Some(send.to_vec()))
    }

    fn broadcast<T: Scalar>(&mut self, data: Vec<T>, root: Rank) -> Result<Vec<T>, CommError> {
        Self::check_root(root)?;
        Ok(data)
    }

    fn barrier(&mut self) -> Result<(), CommError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_leaves_data_untouched() {
        let mut comm = SelfComm::new();
        let mut data = vec![1.0, 2.0];
        comm.reduce_sum(&mut data, Rank::ROOT).unwrap();
        assert_eq!(data, vec![1.0, 2.0]);
    }

    #[test]
    fn gatherv_returns_own_contribution() {
        let mut comm = SelfComm::new();
        let layout = GatherLayout::from_counts(vec![3]);
        let out = comm.gatherv(&[1i64, 2, 3], &layout, Rank::ROOT).unwrap();
        assert_eq!(out, Some(vec![1, 2, 3]));
    }

    #[test]
    fn gatherv_checks_count() {
        let mut comm = SelfComm::new();
        let layout = GatherLayout::from_counts(vec![2]);
        let err = comm.gatherv(&[1i64, 2, 3], &layout, Rank::ROOT).unwrap_err();
        assert!(matches!(err, CommError::CountMismatch { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn non_zero_root_is_rejected() {
        let mut comm = SelfComm::new();
        let err = comm.broadcast(vec![1.0f32], Rank(1)).unwrap_err();
        assert_eq!(err, CommError::InvalidRoot { root: Rank(1), size: 1 });
    }
}
