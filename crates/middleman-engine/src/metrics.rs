//! Per-step counters and timings for the pipelines.
//!
//! [`StepMetrics`] captures what one worker did during one step. Every
//! pipeline exposes the metrics of its most recent completed step; the
//! driver logs them.

use std::fmt;

use middleman_core::StepId;

/// Timing and volume metrics collected during a single step.
///
/// All durations are in microseconds and cover this worker only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepMetrics {
    /// The step these metrics describe.
    pub step: StepId,
    /// Wall-clock time for the entire step, in microseconds.
    pub total_us: u64,
    /// Time spent fetching and unpacking assigned blocks, in microseconds.
    pub ingest_us: u64,
    /// Time spent in collectives and registry merge, in microseconds.
    pub merge_us: u64,
    /// Time spent writing output (coordinator only), in microseconds.
    pub emit_us: u64,
    /// Non-empty blocks fetched.
    pub blocks_read: u64,
    /// Blocks dropped because their columns disagreed.
    pub blocks_rejected: u64,
    /// Rows accepted into step-local buffers.
    pub rows_ingested: u64,
    /// Rows dropped individually (e.g. triangle id out of range).
    pub rows_rejected: u64,
    /// Records received by the coordinator in the gather.
    pub records_gathered: u64,
    /// Records newly added to the escaped registries.
    pub registry_inserts: u64,
    /// Registry candidates whose id was already present.
    pub registry_duplicates: u64,
}

impl fmt::Display for StepMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {}: {} us (ingest {}, merge {}, emit {}), blocks {} (+{} rejected), rows {} (+{} rejected)",
            self.step,
            self.total_us,
            self.ingest_us,
            self.merge_us,
            self.emit_us,
            self.blocks_read,
            self.blocks_rejected,
            self.rows_ingested,
            self.rows_rejected,
        )?;
        if self.records_gathered > 0 || self.registry_inserts > 0 || self.registry_duplicates > 0 {
            write!(
                f,
                ", gathered {}, registry +{} ({} dup)",
                self.records_gathered, self.registry_inserts, self.registry_duplicates
            )?;
        }
        Ok(())
    }
}

/// Elapsed microseconds since `start`, saturating.
pub(crate) fn micros_since(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}
