//! In-memory representation of one published step.
//!
//! Writers build a [`StepFrame`] through a [`FrameBuilder`]; readers
//! serve gets from an [`OpenStep`] over a shared frame. Both stream
//! engines in this crate are thin transports around these types.

use std::sync::Arc;

use indexmap::IndexMap;
use middleman_core::{
    BlockId, BlockInfo, Column, DType, Shape, StepId, StreamError, VariableDef, VariableInfo,
};

/// One variable's data within a step.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameVar {
    /// Element type shared by every block.
    pub dtype: DType,
    /// Global shape, empty for local arrays.
    pub shape: Shape,
    /// Blocks in publication order; `blocks[i].0.id == BlockId(i)`.
    pub blocks: Vec<(BlockInfo, Column)>,
}

/// All variables published in one step, in first-put order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StepFrame {
    /// Step index within the stream.
    pub step: StepId,
    /// Variables by name.
    pub vars: IndexMap<String, FrameVar>,
}

impl StepFrame {
    /// An empty frame for `step`.
    pub fn new(step: StepId) -> Self {
        Self {
            step,
            vars: IndexMap::new(),
        }
    }

    /// Append one block, assigning the next block id of its variable.
    pub fn push_block(
        &mut self,
        name: &str,
        shape: &[usize],
        start: Shape,
        count: Shape,
        data: Column,
    ) -> Result<BlockId, StreamError> {
        let var = self
            .vars
            .entry(name.to_string())
            .or_insert_with(|| FrameVar {
                dtype: data.dtype(),
                shape: Shape::from_slice(shape),
                blocks: Vec::new(),
            });
        if var.dtype != data.dtype() {
            return Err(StreamError::TypeMismatch {
                name: name.to_string(),
                expected: var.dtype,
                found: data.dtype(),
            });
        }
        if var.shape.as_slice() != shape {
            return Err(StreamError::ShapeMismatch {
                name: name.to_string(),
                detail: format!("global shape {shape:?} differs from {:?}", var.shape),
            });
        }
        let id = BlockId(var.blocks.len() as u32);
        var.blocks.push((BlockInfo { id, start, count }, data));
        Ok(id)
    }

    /// Append every block of `other` after this frame's blocks,
    /// renumbering block ids.
    pub fn append(&mut self, other: StepFrame) -> Result<(), StreamError> {
        for (name, var) in other.vars {
            for (info, data) in var.blocks {
                self.push_block(&name, &var.shape, info.start, info.count, data)?;
            }
        }
        Ok(())
    }

    /// Metadata for one variable, `None` if it was not published.
    pub fn variable_info(&self, name: &str) -> Option<VariableInfo> {
        self.vars.get(name).map(|var| VariableInfo {
            name: name.to_string(),
            dtype: var.dtype,
            shape: var.shape.clone(),
            block_count: var.blocks.len(),
        })
    }

    /// Block descriptors of one variable.
    pub fn blocks_info(&self, name: &str) -> Result<Vec<BlockInfo>, StreamError> {
        let var = self.var(name)?;
        Ok(var.blocks.iter().map(|(info, _)| info.clone()).collect())
    }

    /// Data of one block.
    pub fn block(&self, name: &str, block: BlockId) -> Result<&Column, StreamError> {
        self.var(name)?
            .blocks
            .get(block.0 as usize)
            .map(|(_, data)| data)
            .ok_or_else(|| StreamError::UnknownBlock {
                name: name.to_string(),
                block,
            })
    }

    fn var(&self, name: &str) -> Result<&FrameVar, StreamError> {
        self.vars.get(name).ok_or_else(|| StreamError::UnknownVariable {
            name: name.to_string(),
        })
    }
}

// ── Reader side ─────────────────────────────────────────────────

/// A step opened by a reader, with its queue of deferred gets.
#[derive(Debug)]
pub struct OpenStep {
    frame: Arc<StepFrame>,
    pending: Vec<(String, BlockId)>,
}

impl OpenStep {
    /// Open `frame` with an empty get queue.
    pub fn new(frame: Arc<StepFrame>) -> Self {
        Self {
            frame,
            pending: Vec::new(),
        }
    }

    /// The underlying frame.
    pub fn frame(&self) -> &StepFrame {
        &self.frame
    }

    /// Queue a get. The variable and block are checked immediately so a
    /// bad request fails at the call that made it.
    pub fn get(&mut self, name: &str, block: BlockId) -> Result<(), StreamError> {
        self.frame.block(name, block)?;
        self.pending.push((name.to_string(), block));
        Ok(())
    }

    /// Resolve all queued gets in queue order and clear the queue.
    pub fn perform_gets(&mut self) -> Result<Vec<Column>, StreamError> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .iter()
            .map(|(name, block)| self.frame.block(name, *block).cloned())
            .collect()
    }

    /// Number of gets still queued.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Reader-side step bookkeeping shared by the stream engines.
#[derive(Debug, Default)]
pub(crate) struct ReadCursor {
    pub(crate) open: Option<OpenStep>,
    pub(crate) closed: bool,
}

impl ReadCursor {
    pub(crate) fn check_can_begin(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.open.is_some() {
            return Err(StreamError::StepInProgress);
        }
        Ok(())
    }

    pub(crate) fn step(&self) -> Result<&OpenStep, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.open.as_ref().ok_or(StreamError::NoActiveStep)
    }

    pub(crate) fn step_mut(&mut self) -> Result<&mut OpenStep, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.open.as_mut().ok_or(StreamError::NoActiveStep)
    }

    pub(crate) fn end(&mut self) -> Result<(), StreamError> {
        let step = self.step_mut()?;
        if step.pending() > 0 {
            log::warn!(
                "step {} ended with {} unperformed gets",
                step.frame().step,
                step.pending()
            );
        }
        self.open = None;
        Ok(())
    }

    pub(crate) fn current_step(&self) -> Option<StepId> {
        self.open.as_ref().map(|s| s.frame().step)
    }
}

// ── Writer side ─────────────────────────────────────────────────

/// Writer-side schema and step assembly.
///
/// Holds the defined variables and the frame under construction.
/// Engines call [`end`](FrameBuilder::end) to take the finished frame
/// and publish it however they transport frames.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    defs: IndexMap<String, VariableDef>,
    open: Option<StepFrame>,
    next_step: StepId,
    closed: bool,
}

impl FrameBuilder {
    /// An empty builder with no variables defined.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a variable. Each name may be defined once.
    pub fn define(&mut self, def: VariableDef) -> Result<(), StreamError> {
        self.check_open_stream()?;
        if self.defs.contains_key(&def.name) {
            return Err(StreamError::AlreadyDefined { name: def.name });
        }
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    /// Start assembling the next step.
    pub fn begin(&mut self) -> Result<(), StreamError> {
        self.check_open_stream()?;
        if self.open.is_some() {
            return Err(StreamError::StepInProgress);
        }
        self.open = Some(StepFrame::new(self.next_step));
        Ok(())
    }

    /// Validate and record one put into the open step.
    pub fn put(&mut self, name: &str, data: Column, count: Option<&[usize]>) -> Result<(), StreamError> {
        self.check_open_stream()?;
        let def = self
            .defs
            .get(name)
            .ok_or_else(|| StreamError::UnknownVariable {
                name: name.to_string(),
            })?;
        let count = def.check_put(&data, count)?;
        let frame = self.open.as_mut().ok_or(StreamError::NoActiveStep)?;
        frame.push_block(name, &def.shape, def.start.clone(), count, data)?;
        Ok(())
    }

    /// Finish the open step and hand back its frame.
    pub fn end(&mut self) -> Result<StepFrame, StreamError> {
        self.check_open_stream()?;
        let frame = self.open.take().ok_or(StreamError::NoActiveStep)?;
        self.next_step = self.next_step.next();
        Ok(frame)
    }

    /// Mark the builder closed. A step still open is discarded.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if let Some(frame) = self.open.take() {
            log::warn!("closing writer with step {} still open; discarded", frame.step);
        }
        self.closed = true;
        true
    }

    /// Number of steps finished so far.
    pub fn steps_written(&self) -> u64 {
        self.next_step.0
    }

    /// Whether the builder has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_open_stream(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        Ok(())
    }
}
