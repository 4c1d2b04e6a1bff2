//! Includes commonly used library components.

pub use crate::{
    Admission,
    ArtifactStore,
    CacheDescriptor,
    CacheFront,
    CacheStatus,
    GridState,
    JobScheduler,
    JobStatus,
    PrefetchState,
    RangeRequest,
    RecordTag,
    SchedulerDescriptor,
    SolverParameters,
    Stepper,
};
pub use crate::fdtd::{Boundary, HeatSolver};
pub use crate::store::{Hdf5Store, MemoryStore};
