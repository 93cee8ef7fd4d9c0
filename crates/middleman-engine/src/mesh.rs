//! Mesh metadata: the triangle count that sizes the diffusion
//! accumulator.

use middleman_core::{BlockId, Column, StepReader, StepStatus};

use crate::config::PollConfig;
use crate::driver::PollBackoff;
use crate::error::PipelineError;

/// Name of the triangle-count variable in the mesh stream.
pub const TRIANGLE_COUNT_VAR: &str = "n_t";

/// Read the triangle count from the first step of a mesh stream, then
/// close the reader.
///
/// Waits with `poll` backoff while the mesh step is not yet published.
/// A stream that ends without a step, or whose `n_t` is missing or
/// negative, is an error.
pub fn load_triangle_count(
    reader: &mut dyn StepReader,
    poll: &PollConfig,
) -> Result<usize, PipelineError> {
    let mut backoff = PollBackoff::new(poll);
    loop {
        match reader.begin_step()? {
            StepStatus::Ok => break,
            StepStatus::NotReady => std::thread::sleep(backoff.not_ready()),
            StepStatus::EndOfStream => {
                return Err(PipelineError::Mesh {
                    detail: "mesh stream ended before its first step".to_string(),
                })
            }
        }
    }

    if reader.inquire_variable(TRIANGLE_COUNT_VAR)?.is_none() {
        return Err(PipelineError::Mesh {
            detail: format!("variable '{TRIANGLE_COUNT_VAR}' missing"),
        });
    }
    reader.get(TRIANGLE_COUNT_VAR, BlockId(0))?;
    let data = reader.perform_gets()?;
    reader.end_step()?;
    reader.close()?;

    let value: i64 = match data.first() {
        Some(Column::I32(v)) if v.len() == 1 => i64::from(v[0]),
        Some(Column::I64(v)) if v.len() == 1 => v[0],
        Some(Column::U64(v)) if v.len() == 1 => i64::try_from(v[0]).unwrap_or(-1),
        Some(other) => {
            return Err(PipelineError::Mesh {
                detail: format!(
                    "'{TRIANGLE_COUNT_VAR}' must be one integer, got {} x {}",
                    other.len(),
                    other.dtype()
                ),
            })
        }
        None => {
            return Err(PipelineError::Mesh {
                detail: format!("'{TRIANGLE_COUNT_VAR}' returned no data"),
            })
        }
    };
    let count = usize::try_from(value).map_err(|_| PipelineError::Mesh {
        detail: format!("'{TRIANGLE_COUNT_VAR}' is negative ({value})"),
    })?;
    log::info!("mesh has {count} triangles");
    Ok(count)
}
