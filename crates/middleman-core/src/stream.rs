//! Step-oriented streaming I/O.
//!
//! Upstream data arrives as a sequence of steps. Within a step each
//! variable is published as one or more blocks; a reader enumerates the
//! blocks, queues deferred gets, and flushes them with
//! [`perform_gets`](StepReader::perform_gets). Writers define their
//! variables once, then emit data between `begin_step`/`end_step`.

use crate::block::{element_count, BlockInfo, Shape};
use crate::column::{Column, DType};
use crate::error::StreamError;
use crate::id::{BlockId, StepId};

/// Outcome of [`StepReader::begin_step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StepStatus {
    /// A step is open and its blocks can be read.
    Ok,
    /// The producer has not published the next step yet; try again.
    NotReady,
    /// The producer closed the stream; no further steps will arrive.
    EndOfStream,
}

/// Definition of an output variable.
///
/// Global arrays carry a non-empty `shape` with `start`/`count`
/// selecting this writer's part. Local arrays leave `shape` and `start`
/// empty and give a per-put `count`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableDef {
    /// Variable name.
    pub name: String,
    /// Element type.
    pub dtype: DType,
    /// Global shape, empty for local arrays.
    pub shape: Shape,
    /// Offset of this writer's selection in the global shape.
    pub start: Shape,
    /// Default extent of this writer's selection.
    pub count: Shape,
}

impl VariableDef {
    /// A one-dimensional global array of `len` elements written whole.
    pub fn global_1d(name: impl Into<String>, dtype: DType, len: usize) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: Shape::from_slice(&[len]),
            start: Shape::from_slice(&[0]),
            count: Shape::from_slice(&[len]),
        }
    }

    /// A local array whose default block extent is `count`.
    pub fn local(name: impl Into<String>, dtype: DType, count: &[usize]) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape: Shape::new(),
            start: Shape::new(),
            count: Shape::from_slice(count),
        }
    }

    /// Whether this is a local (unshaped) array.
    pub fn is_local(&self) -> bool {
        self.shape.is_empty()
    }

    /// Validate a put of `data` with an optional per-put `count`.
    ///
    /// Returns the effective block count. Global arrays only accept
    /// their defined count; local arrays accept any count whose element
    /// total matches the data.
    pub fn check_put(&self, data: &Column, count: Option<&[usize]>) -> Result<Shape, StreamError> {
        if data.dtype() != self.dtype {
            return Err(StreamError::TypeMismatch {
                name: self.name.clone(),
                expected: self.dtype,
                found: data.dtype(),
            });
        }
        let count: Shape = match count {
            Some(c) => Shape::from_slice(c),
            None => self.count.clone(),
        };
        if !self.is_local() && count != self.count {
            return Err(StreamError::ShapeMismatch {
                name: self.name.clone(),
                detail: format!("count {:?} differs from defined {:?}", count, self.count),
            });
        }
        let expected = element_count(&count);
        if expected != data.len() {
            return Err(StreamError::ShapeMismatch {
                name: self.name.clone(),
                detail: format!("count {:?} needs {expected} elements, got {}", count, data.len()),
            });
        }
        Ok(count)
    }
}

/// Metadata about a variable in the current step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableInfo {
    /// Variable name.
    pub name: String,
    /// Element type.
    pub dtype: DType,
    /// Global shape, empty for local arrays.
    pub shape: Shape,
    /// Number of blocks published this step.
    pub block_count: usize,
}

/// Reading side of a step stream.
pub trait StepReader: Send {
    /// Try to open the next step.
    fn begin_step(&mut self) -> Result<StepStatus, StreamError>;

    /// Index of the open step, if any.
    fn current_step(&self) -> Option<StepId>;

    /// Look up a variable in the open step. `Ok(None)` if the producer
    /// did not publish it this step.
    fn inquire_variable(&self, name: &str) -> Result<Option<VariableInfo>, StreamError>;

    /// Blocks of a variable in the open step, in publication order.
    fn blocks_info(&self, name: &str) -> Result<Vec<BlockInfo>, StreamError>;

    /// Queue a deferred read of one block.
    fn get(&mut self, name: &str, block: BlockId) -> Result<(), StreamError>;

    /// Execute all queued gets, returning their data in queue order.
    fn perform_gets(&mut self) -> Result<Vec<Column>, StreamError>;

    /// Release the open step.
    fn end_step(&mut self) -> Result<(), StreamError>;

    /// Close the reader. Further calls fail with [`StreamError::Closed`].
    fn close(&mut self) -> Result<(), StreamError>;
}

/// Writing side of a step stream.
pub trait StepWriter: Send {
    /// Define a variable. Must happen before the first put of it.
    fn define_variable(&mut self, def: VariableDef) -> Result<(), StreamError>;

    /// Open a new output step.
    fn begin_step(&mut self) -> Result<(), StreamError>;

    /// Write one block of a defined variable into the open step.
    ///
    /// `count` overrides the defined extent for local arrays; `None`
    /// uses the definition. Data is taken by value, so every put has
    /// synchronous semantics.
    fn put(&mut self, name: &str, data: Column, count: Option<&[usize]>)
        -> Result<(), StreamError>;

    /// Publish the open step.
    fn end_step(&mut self) -> Result<(), StreamError>;

    /// Number of steps published so far.
    fn steps_written(&self) -> u64;

    /// Close the writer, signalling end of stream to readers.
    fn close(&mut self) -> Result<(), StreamError>;
}
