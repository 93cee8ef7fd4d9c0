//! Block descriptors and shape arithmetic.

use smallvec::SmallVec;

use crate::id::BlockId;

/// Dimensions of a variable or block.
///
/// Uses `SmallVec<[usize; 4]>` so every shape this workspace handles
/// (scalars, vectors, `rows x columns` tables) stays inline.
pub type Shape = SmallVec<[usize; 4]>;

/// Number of elements described by a block `count` vector.
///
/// An empty `count` describes a scalar and has one element. Any zero
/// dimension yields zero elements.
pub fn element_count(count: &[usize]) -> usize {
    count.iter().product()
}

/// One block of a variable as published for a step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block id within the step, dense from 0.
    pub id: BlockId,
    /// Offset of the block in the global shape (empty for local arrays).
    pub start: Shape,
    /// Extent of the block in each dimension.
    pub count: Shape,
}

impl BlockInfo {
    /// Number of elements in this block.
    pub fn element_count(&self) -> usize {
        element_count(&self.count)
    }

    /// Whether this block carries no data.
    pub fn is_empty(&self) -> bool {
        self.element_count() == 0
    }
}
