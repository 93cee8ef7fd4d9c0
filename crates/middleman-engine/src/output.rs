//! Rank-guarded, lazily opened pipeline output.
//!
//! The output writer belongs to the coordinating worker alone. It is
//! opened on the first emitted step, when its schema is defined, so a
//! run that ends before its first step never creates an output stream.

use middleman_core::{Column, Rank, StepWriter, StreamError, VariableDef};

use crate::error::PipelineError;

/// Deferred constructor for an output writer.
pub type WriterFactory =
    Box<dyn FnOnce() -> Result<Box<dyn StepWriter>, StreamError> + Send>;

/// Output handle that opens on first use and only on the coordinator.
pub struct LazyOutput {
    rank: Rank,
    factory: Option<WriterFactory>,
    writer: Option<Box<dyn StepWriter>>,
}

impl LazyOutput {
    /// An unopened output for `rank`. The factory is only ever called on
    /// the coordinating worker.
    pub fn new(rank: Rank, factory: WriterFactory) -> Self {
        Self {
            rank,
            factory: Some(factory),
            writer: None,
        }
    }

    /// Wrap an already constructed writer.
    pub fn with_writer(rank: Rank, writer: Box<dyn StepWriter>) -> Self {
        Self::new(rank, Box::new(move || Ok(writer)))
    }

    /// Whether the writer has been opened.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Steps written so far.
    pub fn steps_written(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.steps_written())
    }

    /// Write one output step.
    ///
    /// On the first call `schema` is evaluated, the writer is created and
    /// every definition is registered. `values` are put in order, each
    /// with its definition's default count.
    pub fn emit(
        &mut self,
        schema: impl FnOnce() -> Vec<VariableDef>,
        values: Vec<(String, Column)>,
    ) -> Result<(), PipelineError> {
        if !self.rank.is_root() {
            return Err(PipelineError::NotCoordinator);
        }
        if self.writer.is_none() {
            let factory = self.factory.take().ok_or(StreamError::Closed)?;
            let mut w = factory()?;
            for def in schema() {
                w.define_variable(def)?;
            }
            log::info!("output opened");
            self.writer = Some(w);
        }
        let writer = self.writer.as_mut().ok_or(StreamError::Closed)?;
        writer.begin_step()?;
        for (name, data) in values {
            writer.put(&name, data, None)?;
        }
        writer.end_step()?;
        Ok(())
    }

    /// Close the writer if it was opened. Idempotent.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.factory = None;
        match self.writer.take() {
            Some(mut w) => w.close(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LazyOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyOutput")
            .field("rank", &self.rank)
            .field("open", &self.is_open())
            .field("steps_written", &self.steps_written())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleman_core::{DType, StepReader, StepStatus};
    use middleman_stream::StreamHub;

    fn schema() -> Vec<VariableDef> {
        vec![VariableDef::global_1d("x", DType::F64, 2)]
    }

    #[test]
    fn non_root_cannot_emit() {
        let hub = StreamHub::new();
        let w = hub.writer();
        let mut out = LazyOutput::with_writer(Rank(1), Box::new(w));
        let err = out
            .emit(schema, vec![("x".into(), Column::F64(vec![1.0, 2.0]))])
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotCoordinator));
        assert!(!out.is_open());
    }

    #[test]
    fn opens_once_and_writes_each_step() {
        let hub = StreamHub::new();
        let w = hub.writer();
        let mut out = LazyOutput::with_writer(Rank::ROOT, Box::new(w));
        assert!(!out.is_open());
        for k in 0..2 {
            out.emit(schema, vec![("x".into(), Column::F64(vec![k as f64; 2]))])
                .unwrap();
        }
        assert_eq!(out.steps_written(), 2);
        out.close().unwrap();
        out.close().unwrap();

        let mut r = hub.reader();
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.end_step().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::Ok);
        r.get("x", middleman_core::BlockId(0)).unwrap();
        assert_eq!(r.perform_gets().unwrap(), vec![Column::F64(vec![1.0, 1.0])]);
        r.end_step().unwrap();
        assert_eq!(r.begin_step().unwrap(), StepStatus::EndOfStream);
    }

    #[test]
    fn close_without_emit_never_opens() {
        let mut out = LazyOutput::new(
            Rank::ROOT,
            Box::new(|| -> Result<Box<dyn StepWriter>, StreamError> {
                panic!("factory must not run")
            }),
        );
        out.close().unwrap();
        assert!(!out.is_open());
    }
}
