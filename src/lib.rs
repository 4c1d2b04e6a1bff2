//! A cache of heat equation solver output whose misses are serviced by running the solver.
//!
//! Consumers ask a [`CacheFront`] whether the grid for some iteration exists, request
//! ranges of iterations, and read finished grids back from an [`ArtifactStore`]. Missing
//! iterations are computed by a [`JobScheduler`] that steps a [`fdtd::HeatSolver`] forward
//! (or rewinds to a checkpoint) and persists every iteration it passes.
//!
//! To get started, refer to the `demos` directory in the main repository.

mod grid;

pub mod cache;
pub mod fdtd;
pub mod prelude;
pub mod scheduler;
pub mod store;

pub use cache::{CacheDescriptor, CacheFront, CacheStatus, PrefetchState};
pub use grid::{GridState, SolverParameters};
pub use scheduler::{
    Admission, DriveReport, JobScheduler, JobStatus, RangeRequest, SchedulerDescriptor,
    Statistics, SystemLoad,
};
pub use store::{ArtifactStore, RecordTag, RestartMetadata};

/// Represents an error in the cache or the simulation behind it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Grid dimensions are invalid \
        ( width: {width}, height: {height}, expected: {expected} )")]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected: String,
    },
    #[error("Invalid range request: {0}")]
    InvalidRange(String),
    #[error("No artifact recorded for iteration {0}")]
    NotFound(u64),
    #[error("Artifact for iteration {iteration} is corrupt: {reason}")]
    CorruptRecord {
        iteration: u64,
        reason: String,
    },
    #[error("Restart from iteration {iteration} failed")]
    RestartFailed {
        iteration: u64,
        #[source]
        source: Box<Error>,
    },
    #[error("Transient store failure: {0}")]
    TransientError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("The drive loop is running in the background")]
    LoopRunning,
    #[error("The drive loop thread panicked")]
    DriveLoopPanicked,
    #[error(transparent)]
    H5Error(#[from] hdf5::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Advances a grid by exactly one iteration.
pub trait Stepper: Send {
    /// Computes the grid following `state`, leaving `state` untouched.
    fn step(&self, state: &GridState) -> Result<GridState, Error>;

    /// The parameters this stepper was built from.
    fn parameters(&self) -> &SolverParameters;

    /// Rebuilds a stepper from parameters recovered out of a restart record.
    fn from_parameters(params: SolverParameters) -> Result<Self, Error>
    where
        Self: Sized;
}
