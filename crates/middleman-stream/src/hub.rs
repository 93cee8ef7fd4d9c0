//! In-memory multi-writer, multi-reader step stream.
//!
//! A [`StreamHub`] plays the role of a staging engine between producers
//! and consumers running in the same process. Each registered writer
//! contributes its blocks to every step; a step is published once every
//! open writer has ended it, with blocks ordered by writer registration
//! order and then put order. The hub retains every published step, so
//! readers created at any time see the whole stream.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use middleman_core::{
    BlockId, BlockInfo, Column, StepId, StepReader, StepStatus, StepWriter, StreamError,
    VariableDef, VariableInfo,
};

use crate::frame::{FrameBuilder, OpenStep, ReadCursor, StepFrame};

#[derive(Default)]
struct WriterSlot {
    pending: VecDeque<StepFrame>,
    closed: bool,
}

#[derive(Default)]
struct HubState {
    writers: Vec<WriterSlot>,
    steps: Vec<Arc<StepFrame>>,
}

impl HubState {
    /// All writers registered and closed with nothing left to publish.
    fn ended(&self) -> bool {
        !self.writers.is_empty()
            && self
                .writers
                .iter()
                .all(|w| w.closed && w.pending.is_empty())
    }

    /// Publish every step all open writers have finished.
    fn publish_ready(&mut self) -> Result<usize, StreamError> {
        let mut published = 0;
        loop {
            let any_pending = self.writers.iter().any(|w| !w.pending.is_empty());
            let all_ready = self
                .writers
                .iter()
                .all(|w| w.closed || !w.pending.is_empty());
            if !any_pending || !all_ready {
                return Ok(published);
            }
            let mut merged = StepFrame::new(StepId(self.steps.len() as u64));
            for slot in &mut self.writers {
                if let Some(frame) = slot.pending.pop_front() {
                    merged.append(frame)?;
                }
            }
            self.steps.push(Arc::new(merged));
            published += 1;
        }
    }
}

struct HubInner {
    state: Mutex<HubState>,
    published: Condvar,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to an in-memory step stream.
///
/// Cloning the hub clones the handle, not the stream.
///
/// # Examples
///
/// ```
/// use middleman_core::{Column, DType, StepReader, StepStatus, StepWriter, VariableDef};
/// use middleman_stream::StreamHub;
///
/// let hub = StreamHub::new();
/// let mut writer = hub.writer();
/// let mut reader = hub.reader();
///
/// writer.define_variable(VariableDef::global_1d("n_t", DType::I32, 1)).unwrap();
/// writer.begin_step().unwrap();
/// writer.put("n_t", Column::I32(vec![12]), None).unwrap();
/// writer.end_step().unwrap();
/// writer.close().unwrap();
///
/// assert_eq!(reader.begin_step().unwrap(), StepStatus::Ok);
/// assert_eq!(reader.inquire_variable("n_t").unwrap().unwrap().block_count, 1);
/// reader.end_step().unwrap();
/// assert_eq!(reader.begin_step().unwrap(), StepStatus::EndOfStream);
/// ```
#[derive(Clone)]
pub struct StreamHub {
    inner: Arc<HubInner>,
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHub {
    /// An empty stream with no writers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                published: Condvar::new(),
            }),
        }
    }

    /// Register a new writer. Writers registered later contribute blocks
    /// after those of earlier writers in every step.
    pub fn writer(&self) -> HubWriter {
        let mut state = self.inner.lock();
        let index = state.writers.len();
        state.writers.push(WriterSlot::default());
        HubWriter {
            hub: Arc::clone(&self.inner),
            index,
            builder: FrameBuilder::new(),
        }
    }

    /// A reader that returns [`StepStatus::NotReady`] immediately when
    /// the next step is not published.
    pub fn reader(&self) -> HubReader {
        self.reader_with_wait(Duration::ZERO)
    }

    /// A reader whose `begin_step` waits up to `wait` for the next step.
    pub fn reader_with_wait(&self, wait: Duration) -> HubReader {
        HubReader {
            hub: Arc::clone(&self.inner),
            next: 0,
            wait,
            cursor: ReadCursor::default(),
        }
    }

    /// Number of steps published so far.
    pub fn published_steps(&self) -> u64 {
        self.inner.lock().steps.len() as u64
    }

    /// A published step by index.
    pub fn step(&self, step: StepId) -> Option<Arc<StepFrame>> {
        self.inner.lock().steps.get(step.0 as usize).cloned()
    }

    /// Whether every writer has closed and all steps are published.
    pub fn is_ended(&self) -> bool {
        self.inner.lock().ended()
    }
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("StreamHub")
            .field("writers", &state.writers.len())
            .field("steps", &state.steps.len())
            .field("ended", &state.ended())
            .finish()
    }
}

// ── Writer ──────────────────────────────────────────────────────

/// Writing endpoint of a [`StreamHub`].
#[derive(Debug)]
pub struct HubWriter {
    hub: Arc<HubInner>,
    index: usize,
    builder: FrameBuilder,
}

impl HubWriter {
    /// Registration index of this writer.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Debug for HubInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HubInner")
    }
}

impl StepWriter for HubWriter {
    fn define_variable(&mut self, def: VariableDef) -> Result<(), StreamError> {
        self.builder.define(def)
    }

    fn begin_step(&mut self) -> Result<(), StreamError> {
        self.builder.begin()
    }

    fn put(&mut self, name: &str, data: Column, count: Option<&[usize]>) -> Result<(), StreamError> {
        self.builder.put(name, data, count)
    }

    fn end_step(&mut self) -> Result<(), StreamError> {
        let frame = self.builder.end()?;
        let mut state = self.hub.lock();
        state.writers[self.index].pending.push_back(frame);
        if state.publish_ready()? > 0 {
            self.hub.published.notify_all();
        }
        Ok(())
    }

    fn steps_written(&self) -> u64 {
        self.builder.steps_written()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        if !self.builder.close() {
            return Ok(());
        }
        let mut state = self.hub.lock();
        state.writers[self.index].closed = true;
        let result = state.publish_ready();
        if state.ended() {
            log::debug!("stream hub ended after {} steps", state.steps.len());
        }
        self.hub.published.notify_all();
        result.map(|_| ())
    }
}

impl Drop for HubWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("hub writer {} failed to close: {e}", self.index);
        }
    }
}

// ── Reader ──────────────────────────────────────────────────────

/// Reading endpoint of a [`StreamHub`].
#[derive(Debug)]
pub struct HubReader {
    hub: Arc<HubInner>,
    next: usize,
    wait: Duration,
    cursor: ReadCursor,
}

impl HubReader {
    fn poll(&self, state: &HubState) -> Option<StepStatus> {
        if self.next < state.steps.len() {
            Some(StepStatus::Ok)
        } else if state.ended() {
            Some(StepStatus::EndOfStream)
        } else {
            None
        }
    }
}

impl StepReader for HubReader {
    fn begin_step(&mut self) -> Result<StepStatus, StreamError> {
        self.cursor.check_can_begin()?;
        let deadline = Instant::now() + self.wait;
        let mut state = self.hub.lock();
        let status = loop {
            if let Some(status) = self.poll(&state) {
                break status;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break StepStatus::NotReady;
            }
            state = self
                .hub
                .published
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };
        if status == StepStatus::Ok {
            let frame = Arc::clone(&state.steps[self.next]);
            self.cursor.open = Some(OpenStep::new(frame));
            self.next += 1;
        }
        Ok(status)
    }

    fn current_step(&self) -> Option<StepId> {
        self.cursor.current_step()
    }

    fn inquire_variable(&self, name: &str) -> Result<Option<VariableInfo>, StreamError> {
        Ok(self.cursor.step()?.frame().variable_info(name))
    }

    fn blocks_info(&self, name: &str) -> Result<Vec<BlockInfo>, StreamError> {
        self.cursor.step()?.frame().blocks_info(name)
    }

    fn get(&mut self, name: &str, block: BlockId) -> Result<(), StreamError> {
        self.cursor.step_mut()?.get(name, block)
    }

    fn perform_gets(&mut self) -> Result<Vec<Column>, StreamError> {
        self.cursor.step_mut()?.perform_gets()
    }

    fn end_step(&mut self) -> Result<(), StreamError> {
        self.cursor.end()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.cursor.open = None;
        self.cursor.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleman_core::DType;

    fn put_step(w: &mut HubWriter, values: &[f64]) {
        w.begin_step().unwrap();
        w.put("x", Column::F64(values.to_vec()), Some(&[values.len()]))
            .unwrap();
        w.end_step().unwrap();
    }

    fn define_x(w: &mut HubWriter) {
        w.define_variable(VariableDef::local("x", DType::F64, &[0]))
            .unwrap();
    }

    #[test]
    fn step_waits_for_every_writer() {
        let hub = StreamHub::new();
        let mut a = hub.writer();
        let mut b = hub.writer();
        define_x(&mut a);
        define_x(&mut b);
        let mut reader = hub.reader();

        put_step(&mut b, &[2.0]);
        assert_eq!(reader.begin_step().unwrap(), StepStatus::NotReady);
        put_step(&mut a, &[1.0, 1.5]);

        assert_eq!(reader.begin_step().unwrap(), StepStatus::Ok);
        let blocks = reader.blocks_info("x").unwrap();
        assert_eq!(blocks.len(), 2);
        reader.get("x", blocks[0].id).unwrap();
        reader.get("x", blocks[1].id).unwrap();
        let data = reader.perform_gets().unwrap();
        // writer a registered first, so its block comes first
        assert_eq!(data[0], Column::F64(vec![1.0, 1.5]));
        assert_eq!(data[1], Column::F64(vec![2.0]));
        reader.end_step().unwrap();
    }

    #[test]
    fn closing_all_writers_ends_stream() {
        let hub = StreamHub::new();
        let mut a = hub.writer();
        let mut b = hub.writer();
        define_x(&mut a);
        put_step(&mut a, &[1.0]);
        a.close().unwrap();
        let mut reader = hub.reader();
        // b is still open and has not finished step 0
        assert_eq!(reader.begin_step().unwrap(), StepStatus::NotReady);
        b.close().unwrap();
        assert_eq!(reader.begin_step().unwrap(), StepStatus::Ok);
        reader.end_step().unwrap();
        assert_eq!(reader.begin_step().unwrap(), StepStatus::EndOfStream);
        assert!(hub.is_ended());
    }

    #[test]
    fn dropped_writer_counts_as_closed() {
        let hub = StreamHub::new();
        {
            let mut w = hub.writer();
            define_x(&mut w);
            put_step(&mut w, &[3.0]);
        }
        assert_eq!(hub.published_steps(), 1);
        assert!(hub.is_ended());
    }

    #[test]
    fn no_writers_is_not_ready() {
        let hub = StreamHub::new();
        let mut reader = hub.reader();
        assert_eq!(reader.begin_step().unwrap(), StepStatus::NotReady);
    }

    #[test]
    fn waiting_reader_wakes_on_publish() {
        let hub = StreamHub::new();
        let mut w = hub.writer();
        define_x(&mut w);
        let mut reader = hub.reader_with_wait(Duration::from_secs(10));
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                put_step(&mut w, &[4.0]);
            });
            assert_eq!(reader.begin_step().unwrap(), StepStatus::Ok);
        });
        assert_eq!(reader.current_step(), Some(StepId(0)));
    }

    #[test]
    fn reader_step_protocol_is_enforced() {
        let hub = StreamHub::new();
        let mut w = hub.writer();
        define_x(&mut w);
        put_step(&mut w, &[1.0]);
        let mut reader = hub.reader();
        assert!(matches!(reader.blocks_info("x"), Err(StreamError::NoActiveStep)));
        reader.begin_step().unwrap();
        assert!(matches!(reader.begin_step(), Err(StreamError::StepInProgress)));
        assert_eq!(reader.inquire_variable("y").unwrap(), None);
        reader.close().unwrap();
        assert!(matches!(reader.begin_step(), Err(StreamError::Closed)));
    }

    #[test]
    fn readers_are_independent() {
        let hub = StreamHub::new();
        let mut w = hub.writer();
        define_x(&mut w);
        put_step(&mut w, &[1.0]);
        put_step(&mut w, &[2.0]);
        let mut r1 = hub.reader();
        let mut r2 = hub.reader();
        for r in [&mut r1, &mut r2] {
            assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
            assert_eq!(r.current_step(), Some(StepId(0)));
            r.end_step().unwrap();
        }
    }
}
