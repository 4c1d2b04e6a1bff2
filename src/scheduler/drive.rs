use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::{ArtifactStore, Error, GridState, RecordTag, Stepper};
use crate::scheduler::tracker::Tracker;

/// What a single pass of the drive loop did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Pass {
    Stepped,
    /// Jumped back to a checkpoint to recompute keys behind the front.
    Rewound,
    /// Returned to the front after recomputing.
    Resumed,
    /// Too many unpersisted grids to keep computing.
    Stalled,
    Idle,
}

/// The single writer of the authoritative grid.
///
/// Output grids are written as soon as they are computed. Grids the store refuses are
/// queued and retried on every pass; they never hold back the grids behind them.
pub(crate) struct DriveLoop<S, A> {
    solver: S,
    state: GridState,
    store: Arc<A>,
    tracker: Arc<Tracker>,
    wake: Receiver<()>,
    checkpoint_interval: u64,
    max_backlog: usize,
    backlog: VecDeque<GridState>,
    /// The front of the run, parked while older keys are recomputed.
    resume: Option<GridState>,
    /// The grid the run started from, used when no checkpoint precedes a rewind.
    origin: GridState,
    /// Whether the starting grid has been queued for persistence.
    primed: bool,
}

impl<S: Stepper, A: ArtifactStore> DriveLoop<S, A> {
    pub fn new(
        solver: S,
        state: GridState,
        store: Arc<A>,
        tracker: Arc<Tracker>,
        wake: Receiver<()>,
        checkpoint_interval: u64,
        max_backlog: usize,
    ) -> Self {
        Self {
            solver,
            origin: state.clone(),
            state,
            store,
            tracker,
            wake,
            checkpoint_interval,
            max_backlog,
            backlog: VecDeque::new(),
            resume: None,
            primed: false,
        }
    }

    /// Runs on the background thread until `stop` is raised, then hands itself back.
    pub fn run(mut self: Box<Self>, stop: Arc<AtomicBool>, idle_poll: Duration) -> Box<Self> {
        tracing::debug!(iteration = self.state.iteration(), "drive loop started");

        while !stop.load(Ordering::Acquire) {
            match self.pass() {
                Ok(Pass::Idle) => {
                    // woken early by new requests or by a stop
                    let _ = self.wake.recv_timeout(idle_poll);
                }
                Ok(Pass::Stalled) => std::thread::sleep(idle_poll),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        iteration = self.state.iteration(),
                        error = %e,
                        "drive loop pass failed",
                    );
                    std::thread::sleep(idle_poll);
                }
            }
        }

        tracing::debug!(iteration = self.state.iteration(), "drive loop stopped");
        self
    }

    /// Runs on the caller's thread until there is nothing left to compute.
    pub fn run_until_idle(&mut self, bar: Option<&indicatif::ProgressBar>) -> Result<(), Error> {
        loop {
            while self.wake.try_recv().is_ok() {}

            match self.pass()? {
                Pass::Stepped => {
                    if let Some(bar) = bar {
                        bar.inc(1);
                    }
                }
                Pass::Rewound | Pass::Resumed => {}
                Pass::Stalled | Pass::Idle if !self.backlog.is_empty() => {
                    return Err(Error::TransientError(format!(
                        "{} artifacts are waiting to be persisted",
                        self.backlog.len(),
                    )));
                }
                Pass::Stalled | Pass::Idle => return Ok(()),
            }
        }
    }

    pub fn pass(&mut self) -> Result<Pass, Error> {
        if !self.primed {
            self.primed = true;
            self.persist(self.state.clone());
        }

        self.flush();
        if self.backlog.len() >= self.max_backlog {
            return Ok(Pass::Stalled);
        }

        let iteration = self.state.iteration();
        if self.target().map_or(false, |target| target > iteration) {
            self.advance()?;
            return Ok(Pass::Stepped);
        }

        if let Some(front) = self.resume.take() {
            tracing::debug!(
                from = iteration,
                to = front.iteration(),
                "re-simulation done, resuming front",
            );
            self.state = front;
            self.tracker.set_position(self.state.iteration());
            return Ok(Pass::Resumed);
        }

        if let Some(key) = self.tracker.first_scheduled_before(iteration) {
            self.rewind(key)?;
            return Ok(Pass::Rewound);
        }

        Ok(Pass::Idle)
    }

    /// Swaps in a new solver and grid, as after a restart.
    pub fn reset(&mut self, solver: S, state: GridState) {
        self.tracker.set_parameters(*solver.parameters());
        self.tracker.set_position(state.iteration());
        self.solver = solver;
        self.origin = state.clone();
        self.state = state;
        self.resume = None;
        self.primed = false;
    }

    /// The iteration the loop is working toward.
    fn target(&self) -> Option<u64> {
        match &self.resume {
            Some(front) => self.tracker
                .last_scheduled_between(self.state.iteration(), front.iteration()),
            None => Some(self.tracker.horizon()),
        }
    }

    fn advance(&mut self) -> Result<(), Error> {
        let next = self.state.iteration() + 1;
        self.tracker.begin(next);

        self.state = self.solver.step(&self.state)?;
        self.tracker.set_position(next);
        self.tracker.record(|stats| stats.steps += 1);

        self.persist(self.state.clone());
        if self.checkpoint_interval > 0 && next % self.checkpoint_interval == 0 {
            self.checkpoint();
        }

        Ok(())
    }

    fn persist(&mut self, state: GridState) {
        // a requested key waiting in the backlog must not look unproduced
        self.tracker.begin(state.iteration());
        let queued = self.backlog
            .iter_mut()
            .find(|queued| queued.iteration() == state.iteration());
        if let Some(queued) = queued {
            *queued = state;
            return;
        }

        if !write_output(&*self.store, &self.tracker, &state) {
            self.backlog.push_back(state);
            self.tracker.set_backlog(self.backlog.len());
        }
    }

    /// Retries every queued grid once, keeping the ones the store refused again.
    fn flush(&mut self) {
        if self.backlog.is_empty() {
            return;
        }

        let (store, tracker) = (&*self.store, &self.tracker);
        self.backlog.retain(|state| !write_output(store, tracker, state));
        self.tracker.set_backlog(self.backlog.len());
    }

    fn checkpoint(&mut self) {
        let params = *self.solver.parameters();
        match self.store.write(&self.state, RecordTag::Restart(params)) {
            Ok(()) => {
                tracing::debug!(iteration = self.state.iteration(), "restart record written");
                self.tracker.record(|stats| stats.checkpoints += 1);
            }
            Err(e) => {
                tracing::warn!(
                    iteration = self.state.iteration(),
                    error = %e,
                    "restart record write failed",
                );
                self.tracker.record(|stats| stats.failed_writes += 1);
            }
        }
    }

    /// Parks the front and restarts from the latest usable checkpoint at or before `key`.
    ///
    /// Checkpoints written by a differently configured run are skipped. Without any, the
    /// computation restarts from the grid the run started from, or from the initial plate
    /// when that grid is already past `key`.
    fn rewind(&mut self, key: u64) -> Result<(), Error> {
        let params = *self.solver.parameters();
        let checkpoint = self.store
            .restart_points()
            .into_iter()
            .rev()
            .filter(|&point| point <= key)
            .find_map(|point| match self.store.read_restart(point) {
                Ok((state, metadata)) if metadata.parameters == params => Some(state),
                Ok(_) => {
                    tracing::debug!(point, "skipping checkpoint written with other parameters");
                    None
                }
                Err(e) => {
                    tracing::warn!(point, error = %e, "skipping unreadable checkpoint");
                    None
                }
            });
        let start = match checkpoint {
            Some(state) => state,
            None if self.origin.iteration() <= key => self.origin.clone(),
            None => params.initial_state()?,
        };

        tracing::info!(
            key,
            front = self.state.iteration(),
            start = start.iteration(),
            "rewinding to recompute missing artifacts",
        );
        self.tracker.record(|stats| stats.rewinds += 1);

        let front = std::mem::replace(&mut self.state, start);
        self.resume = Some(front);
        self.tracker.set_position(self.state.iteration());
        self.persist(self.state.clone());

        Ok(())
    }
}

/// Writes one output grid, returning whether the store took it.
fn write_output<A: ArtifactStore>(store: &A, tracker: &Tracker, state: &GridState) -> bool {
    match store.write(state, RecordTag::Output) {
        Ok(()) => {
            tracing::trace!(iteration = state.iteration(), "artifact persisted");
            tracker.complete(state.iteration());
            true
        }
        Err(e) => {
            tracing::warn!(
                iteration = state.iteration(),
                error = %e,
                "artifact write failed, will retry",
            );
            tracker.record(|stats| stats.failed_writes += 1);
            false
        }
    }
}
