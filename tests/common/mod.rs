//! Common utilities for integration tests
#![allow(dead_code)]

pub mod flaky_store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use heatcache::prelude::*;

pub use flaky_store::FlakyStore;

/// A cache over `store` with a default solver for the store's plate.
pub fn cache_over<A: ArtifactStore + 'static>(
    store: Arc<A>,
    desc: CacheDescriptor,
) -> CacheFront<HeatSolver, A> {
    let (width, height) = store.dimensions();
    let params = SolverParameters { width, height, ..Default::default() };
    let mut sched = SchedulerDescriptor::new(HeatSolver::new(params).unwrap(), store);
    sched.idle_poll = Duration::from_millis(5);
    CacheFront::new(JobScheduler::new(sched).unwrap(), desc).unwrap()
}

pub fn memory_cache(width: u32, height: u32) -> CacheFront<HeatSolver, MemoryStore> {
    cache_over(Arc::new(MemoryStore::new(width, height).unwrap()), CacheDescriptor::default())
}

/// Steps `state` forward `steps` times with a solver built from `params`.
pub fn step_from(params: SolverParameters, state: &GridState, steps: u64) -> GridState {
    let solver = HeatSolver::new(params).unwrap();
    let mut state = state.clone();
    for _ in 0..steps {
        state = solver.step(&state).unwrap();
    }
    state
}

/// Polls `key` until it exists, failing the test after `timeout`.
pub fn wait_for<S: Stepper + 'static, A: ArtifactStore + 'static>(
    cache: &CacheFront<S, A>,
    key: u64,
    timeout: Duration,
) {
    let start = Instant::now();
    while cache.test(key) != JobStatus::Exists {
        assert!(start.elapsed() < timeout, "iteration {} never appeared", key);
        std::thread::sleep(Duration::from_millis(2));
    }
}
