use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::SolverParameters;
use crate::scheduler::{Admission, JobStatus, Statistics, SystemLoad};
use crate::scheduler::range::ResolvedRange;

/// Limits a caller wants enforced when requests are admitted.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Limits {
    pub max_pending: usize,
    pub max_backlog: usize,
}

/// Job bookkeeping shared between request callers and the drive loop.
///
/// Every check-and-update happens under one lock so admission decisions are never made
/// against stale counts.
pub(crate) struct Tracker {
    state: Mutex<TrackerState>,
}

struct TrackerState {
    statuses: BTreeMap<u64, JobStatus>,
    /// Keys in `Scheduled` or `Producing`.
    pending: usize,
    horizon: u64,
    iteration: u64,
    parameters: SolverParameters,
    backlog: usize,
    stats: Statistics,
}

impl Tracker {
    pub fn new(iteration: u64, parameters: SolverParameters) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                statuses: BTreeMap::new(),
                pending: 0,
                horizon: iteration,
                iteration,
                parameters,
                backlog: 0,
                stats: Statistics::default(),
            }),
        }
    }

    /// Schedules every key in `ranges` not already produced, unless `limits` forbid it.
    ///
    /// `in_store` reports keys already persisted, which count as hits. Under `limits` the
    /// scan stops at the first key over capacity, so huge ranges are refused quickly.
    pub fn admit(
        &self,
        ranges: &[ResolvedRange],
        limits: Option<Limits>,
        in_store: impl Fn(u64) -> bool,
    ) -> Admission {
        let mut state = self.state.lock();
        state.stats.requests += 1;

        if let Some(limits) = limits {
            if state.pending > limits.max_pending || state.backlog >= limits.max_backlog {
                return state.reject(limits);
            }
        }

        let mut fresh = BTreeSet::new();
        let mut stored = BTreeSet::new();
        let mut hits = 0;
        let mut waiting = 0;
        for key in ranges.iter().flat_map(ResolvedRange::keys) {
            match state.status(key) {
                JobStatus::Exists => hits += 1,
                JobStatus::Scheduled | JobStatus::Producing => waiting += 1,
                JobStatus::NotScheduled => {
                    if fresh.contains(&key) || stored.contains(&key) {
                        continue;
                    }
                    if in_store(key) {
                        hits += 1;
                        stored.insert(key);
                        continue;
                    }
                    fresh.insert(key);
                    if let Some(limits) = limits {
                        if state.pending + fresh.len() > limits.max_pending {
                            return state.reject(limits);
                        }
                    }
                }
            }
        }

        for key in stored {
            state.statuses.insert(key, JobStatus::Exists);
        }
        for &key in &fresh {
            state.statuses.insert(key, JobStatus::Scheduled);
        }
        state.pending += fresh.len();
        if let Some(last) = ranges.iter().map(|range| range.last).max() {
            state.horizon = state.horizon.max(last);
        }

        state.stats.hits += hits;
        state.stats.waiting += waiting;
        state.stats.misses += fresh.len() as u64;

        Admission::Accepted {
            scheduled: fresh.len(),
            hits: hits as usize,
            waiting: waiting as usize,
        }
    }

    pub fn status(&self, key: u64) -> JobStatus {
        self.state.lock().status(key)
    }

    /// Marks `key` as being computed, if it was requested.
    pub fn begin(&self, key: u64) {
        self.state.lock().promote(key, JobStatus::Producing);
    }

    /// Marks `key` as persisted.
    pub fn complete(&self, key: u64) {
        let mut state = self.state.lock();
        state.promote(key, JobStatus::Exists);
        state.stats.writes += 1;
    }

    /// The smallest requested key behind `iteration` that nothing is producing.
    pub fn first_scheduled_before(&self, iteration: u64) -> Option<u64> {
        self.state.lock()
            .statuses
            .range(..iteration)
            .find(|(_, &status)| status == JobStatus::Scheduled)
            .map(|(&key, _)| key)
    }

    /// The largest requested key strictly between `low` and `high` that nothing is producing.
    pub fn last_scheduled_between(&self, low: u64, high: u64) -> Option<u64> {
        if high <= low + 1 {
            return None;
        }
        self.state.lock()
            .statuses
            .range((low + 1)..high)
            .rev()
            .find(|(_, &status)| status == JobStatus::Scheduled)
            .map(|(&key, _)| key)
    }

    pub fn horizon(&self) -> u64 {
        self.state.lock().horizon
    }

    pub fn iteration(&self) -> u64 {
        self.state.lock().iteration
    }

    pub fn parameters(&self) -> SolverParameters {
        self.state.lock().parameters
    }

    pub fn load(&self) -> SystemLoad {
        let state = self.state.lock();
        SystemLoad {
            pending: state.pending,
            backlog: state.backlog,
        }
    }

    pub fn stats(&self) -> Statistics {
        self.state.lock().stats
    }

    pub fn set_position(&self, iteration: u64) {
        self.state.lock().iteration = iteration;
    }

    pub fn set_parameters(&self, parameters: SolverParameters) {
        self.state.lock().parameters = parameters;
    }

    pub fn set_backlog(&self, backlog: usize) {
        self.state.lock().backlog = backlog;
    }

    pub fn record(&self, update: impl FnOnce(&mut Statistics)) {
        update(&mut self.state.lock().stats);
    }
}

impl TrackerState {
    fn status(&self, key: u64) -> JobStatus {
        self.statuses.get(&key).copied().unwrap_or(JobStatus::NotScheduled)
    }

    fn reject(&mut self, limits: Limits) -> Admission {
        self.stats.rejected += 1;
        Admission::Overloaded {
            pending: self.pending,
            capacity: limits.max_pending,
        }
    }

    /// Moves `key` forward to `next`. Statuses never move backwards.
    fn promote(&mut self, key: u64, next: JobStatus) {
        let current = self.status(key);
        if next <= current {
            return;
        }
        // only requested keys advance through Producing
        if next == JobStatus::Producing && current != JobStatus::Scheduled {
            return;
        }

        if current.is_pending() && !next.is_pending() {
            self.pending -= 1;
        }
        self.statuses.insert(key, next);
    }
}
