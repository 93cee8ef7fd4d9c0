//! Pipeline state machine, polling backoff, and the run-to-end loop.

use std::fmt;
use std::time::{Duration, Instant};

use middleman_core::{StepId, StepStatus};

use crate::config::PollConfig;
use crate::error::PipelineError;
use crate::metrics::StepMetrics;

// ── PipelineState ──────────────────────────────────────────────────

/// Where a pipeline is in its per-step cycle.
///
/// A call to [`Pipeline::step`] starts and ends in `AwaitingStep` unless
/// the stream ended or the step failed, in which case the pipeline is
/// `Done` for good.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Waiting for the producer's next step.
    #[default]
    AwaitingStep,
    /// Reading this worker's blocks of the open step.
    Consuming,
    /// Running the step's collectives.
    Merging,
    /// Writing output on the coordinator.
    Emitting,
    /// End of stream reached, or a step failed.
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AwaitingStep => "awaiting-step",
            Self::Consuming => "consuming",
            Self::Merging => "merging",
            Self::Emitting => "emitting",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// A step-synchronized pipeline driven one step at a time.
///
/// Every worker of a group drives its own instance in lock-step; the
/// collectives inside `step` keep them aligned.
pub trait Pipeline: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Advance by at most one step.
    ///
    /// `Ok(StepStatus::Ok)` means a step was consumed, merged and
    /// emitted; `NotReady` means nothing happened and the caller should
    /// retry later; `EndOfStream` is terminal. Calling again after
    /// `EndOfStream` or an error returns [`PipelineError::Finished`].
    fn step(&mut self) -> Result<StepStatus, PipelineError>;

    /// Current position in the step cycle.
    fn state(&self) -> PipelineState;

    /// Index of the next step to be processed; equals the number of
    /// steps completed.
    fn current_step(&self) -> StepId;

    /// Metrics of the most recently completed step.
    fn last_metrics(&self) -> &StepMetrics;

    /// Close the input, mirror and output streams. Idempotent.
    fn finalize(&mut self) -> Result<(), PipelineError>;
}

// ── PollBackoff ────────────────────────────────────────────────────

/// Sleep schedule while `begin_step` reports NotReady.
///
/// Grows geometrically from `initial` up to `max` on consecutive
/// NotReady results and resets as soon as a step makes progress.
#[derive(Clone, Debug)]
pub struct PollBackoff {
    config: PollConfig,
    current: Duration,
    consecutive: u64,
}

impl PollBackoff {
    /// Fresh backoff at the initial sleep.
    pub fn new(config: &PollConfig) -> Self {
        Self {
            config: config.clone(),
            current: config.initial,
            consecutive: 0,
        }
    }

    /// Record a NotReady and return how long to sleep before retrying.
    pub fn not_ready(&mut self) -> Duration {
        let sleep = self.current;
        self.consecutive += 1;
        self.current = self.current.mul_f64(self.config.growth).min(self.config.max);
        sleep
    }

    /// Record progress; the next NotReady sleeps `initial` again.
    pub fn progressed(&mut self) {
        self.current = self.config.initial;
        self.consecutive = 0;
    }

    /// NotReady results since the last progress.
    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }
}

// ── run_to_end ─────────────────────────────────────────────────────

/// What a completed [`run_to_end`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps processed.
    pub steps: u64,
    /// NotReady polls over the whole run.
    pub not_ready_polls: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// Step `pipeline` until end of stream, then finalize it.
///
/// NotReady results sleep according to `poll`. A failed step is fatal:
/// the pipeline is still finalized (errors from that are logged), and
/// the step error is returned.
pub fn run_to_end(
    pipeline: &mut dyn Pipeline,
    poll: &PollConfig,
) -> Result<RunSummary, PipelineError> {
    let start = Instant::now();
    let mut backoff = PollBackoff::new(poll);
    let mut summary = RunSummary::default();
    log::info!("{}: running", pipeline.name());

    loop {
        match pipeline.step() {
            Ok(StepStatus::Ok) => {
                backoff.progressed();
                summary.steps += 1;
                log::info!("{}: {}", pipeline.name(), pipeline.last_metrics());
            }
            Ok(StepStatus::NotReady) => {
                summary.not_ready_polls += 1;
                let sleep = backoff.not_ready();
                log::trace!(
                    "{}: step {} not ready ({} in a row), sleeping {sleep:?}",
                    pipeline.name(),
                    pipeline.current_step(),
                    backoff.consecutive()
                );
                std::thread::sleep(sleep);
            }
            Ok(StepStatus::EndOfStream) => break,
            Err(e) => {
                log::error!(
                    "{}: step {} failed: {e}",
                    pipeline.name(),
                    pipeline.current_step()
                );
                if let Err(fin) = pipeline.finalize() {
                    log::warn!("{}: finalize after failure: {fin}", pipeline.name());
                }
                return Err(e);
            }
        }
    }

    pipeline.finalize()?;
    summary.elapsed = start.elapsed();
    log::info!(
        "{}: end of stream after {} steps ({} not-ready polls, {:?})",
        pipeline.name(),
        summary.steps,
        summary.not_ready_polls,
        summary.elapsed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn fast_poll() -> PollConfig {
        PollConfig {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            growth: 2.0,
        }
    }

    #[test]
    fn backoff_grows_then_caps_then_resets() {
        let mut b = PollBackoff::new(&fast_poll());
        let sleeps: Vec<_> = (0..4).map(|_| b.not_ready().as_millis()).collect();
        assert_eq!(sleeps, vec![1, 2, 4, 4]);
        assert_eq!(b.consecutive(), 4);
        b.progressed();
        assert_eq!(b.not_ready(), Duration::from_millis(1));
    }

    /// Replays a fixed script of step outcomes.
    struct Scripted {
        script: VecDeque<Result<StepStatus, PipelineError>>,
        step: StepId,
        state: PipelineState,
        finalized: u32,
        metrics: StepMetrics,
    }

    impl Scripted {
        fn new(script: Vec<Result<StepStatus, PipelineError>>) -> Self {
            Self {
                script: script.into(),
                step: StepId(0),
                state: PipelineState::AwaitingStep,
                finalized: 0,
                metrics: StepMetrics::default(),
            }
        }
    }

    impl Pipeline for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn step(&mut self) -> Result<StepStatus, PipelineError> {
            if self.state == PipelineState::Done {
                return Err(PipelineError::Finished);
            }
            let next = self.script.pop_front().unwrap_or(Ok(StepStatus::EndOfStream));
            match next {
                Ok(StepStatus::Ok) => self.step = self.step.next(),
                Ok(StepStatus::NotReady) => {}
                _ => self.state = PipelineState::Done,
            }
            next
        }

        fn state(&self) -> PipelineState {
            self.state
        }

        fn current_step(&self) -> StepId {
            self.step
        }

        fn last_metrics(&self) -> &StepMetrics {
            &self.metrics
        }

        fn finalize(&mut self) -> Result<(), PipelineError> {
            self.finalized += 1;
            Ok(())
        }
    }

    #[test]
    fn runs_until_end_of_stream() {
        let mut p = Scripted::new(vec![
            Ok(StepStatus::NotReady),
            Ok(StepStatus::Ok),
            Ok(StepStatus::NotReady),
            Ok(StepStatus::NotReady),
            Ok(StepStatus::Ok),
        ]);
        let summary = run_to_end(&mut p, &fast_poll()).unwrap();
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.not_ready_polls, 3);
        assert_eq!(p.current_step(), StepId(2));
        assert_eq!(p.finalized, 1);
    }

    #[test]
    fn failure_finalizes_and_propagates() {
        let mut p = Scripted::new(vec![Ok(StepStatus::Ok), Err(PipelineError::NotCoordinator)]);
        let err = run_to_end(&mut p, &fast_poll()).unwrap_err();
        assert!(matches!(err, PipelineError::NotCoordinator));
        assert_eq!(p.finalized, 1);
        assert!(matches!(p.step(), Err(PipelineError::Finished)));
    }
}
