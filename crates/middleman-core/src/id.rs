//! Strongly-typed identifiers for steps, workers, and blocks.

use std::fmt;

/// Monotonically increasing step counter.
///
/// A pipeline starts at `StepId(0)` and advances only after a step has
/// been consumed, merged, and emitted. Stream frames carry the step
/// index they were written at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(pub u64);

impl StepId {
    /// The step after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StepId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Index of a worker within a communicator.
///
/// `Rank(0)` is the coordinating worker: it owns merged state and is
/// the only worker that writes pipeline output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(pub usize);

impl Rank {
    /// The coordinating worker.
    pub const ROOT: Rank = Rank(0);

    /// Whether this is the coordinating worker.
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<usize> for Rank {
    fn from(v: usize) -> Self {
        Self(v)
    }
}

/// Identifies one block of a variable within a single step.
///
/// Block ids are dense and start at 0 for every variable in every step,
/// in the order the blocks were published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BlockId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_next_increments() {
        assert_eq!(StepId(0).next(), StepId(1));
        assert_eq!(StepId(41).next().to_string(), "42");
    }

    #[test]
    fn root_rank_is_zero() {
        assert!(Rank::ROOT.is_root());
        assert!(!Rank(3).is_root());
        assert_eq!(Rank::from(3usize), Rank(3));
    }
}
