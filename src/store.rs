//! Durable, iteration-keyed storage of computed grids.

mod hdf5_store;
mod memory;

pub use hdf5_store::Hdf5Store;
pub use memory::MemoryStore;

use crate::{Error, GridState, SolverParameters};

/// What kind of record a write produces.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RecordTag {
    /// A plain per-iteration output grid.
    Output,
    /// A checkpoint carrying everything needed to resume the solver.
    Restart(SolverParameters),
}

/// The header of a restart record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RestartMetadata {
    pub iteration: u64,
    pub parameters: SolverParameters,
}

/// Persists grid snapshots keyed by iteration.
///
/// Output records and restart records live in separate key spaces: `exists` and `read`
/// only see outputs, `read_restart` only sees checkpoints.
pub trait ArtifactStore: Send + Sync {
    /// The `(width, height)` every record in this store has.
    fn dimensions(&self) -> (u32, u32);

    /// Persists `state` under its iteration. Readers never observe a partial record.
    fn write(&self, state: &GridState, tag: RecordTag) -> Result<(), Error>;

    /// Whether an output record exists for `iteration`. Never triggers computation.
    fn exists(&self, iteration: u64) -> bool;

    fn read(&self, iteration: u64) -> Result<GridState, Error>;

    fn read_restart(&self, iteration: u64) -> Result<(GridState, RestartMetadata), Error>;

    /// Iterations with a restart record, ascending.
    fn restart_points(&self) -> Vec<u64>;

    fn latest_restart_at_or_before(&self, iteration: u64) -> Option<u64> {
        self.restart_points()
            .into_iter()
            .take_while(|&point| point <= iteration)
            .last()
    }
}

/// Rejects grids that do not fit a store of the given dimensions.
pub(crate) fn check_fits(state: &GridState, (width, height): (u32, u32)) -> Result<(), Error> {
    if state.width() == width && state.height() == height {
        Ok(())
    } else {
        Err(Error::InvalidDimensions {
            width: state.width(),
            height: state.height(),
            expected: format!("{}x{}", width, height),
        })
    }
}

/// Checks a restart header against the grid it was stored with.
pub(crate) fn check_restart(
    state: &GridState,
    metadata: &RestartMetadata,
) -> Result<(), Error> {
    let params = &metadata.parameters;
    if params.width != state.width() || params.height != state.height() {
        return Err(Error::CorruptRecord {
            iteration: metadata.iteration,
            reason: format!(
                "header describes a {}x{} plate but the grid is {}x{}",
                params.width, params.height, state.width(), state.height(),
            ),
        });
    }
    if metadata.iteration != state.iteration() {
        return Err(Error::CorruptRecord {
            iteration: metadata.iteration,
            reason: format!("grid is tagged with iteration {}", state.iteration()),
        });
    }
    params.validate().map_err(|e| Error::CorruptRecord {
        iteration: metadata.iteration,
        reason: e.to_string(),
    })
}
