//! Turns cache misses into solver work.
//!
//! A [`JobScheduler`] owns the one authoritative grid and a drive loop that steps it
//! toward the largest requested iteration, persisting every grid it passes. The loop
//! either runs on the caller's thread through [`JobScheduler::drive`] or on a background
//! thread between [`JobScheduler::start`] and [`JobScheduler::stop`].

mod drive;
mod range;
mod tracker;

pub use range::{RangeRequest, ResolvedRange};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::{ArtifactStore, Error, GridState, SolverParameters, Stepper};
use drive::DriveLoop;
pub(crate) use tracker::Limits;
use tracker::Tracker;

/// The production state of one iteration key.
///
/// Statuses only ever move forward through the order below.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStatus {
    NotScheduled,
    Scheduled,
    Producing,
    Exists,
}

impl JobStatus {
    /// The numeric status reported to polling consumers.
    #[inline]
    pub fn code(&self) -> i64 {
        *self as i64
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Producing)
    }
}

/// The outcome of a range request.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded.
    Accepted {
        /// Keys newly scheduled by this request.
        scheduled: usize,
        /// Keys already persisted.
        hits: usize,
        /// Keys some earlier request is already waiting on.
        waiting: usize,
    },
    /// The system is too busy. Nothing was scheduled.
    Overloaded {
        pending: usize,
        capacity: usize,
    },
}

impl Admission {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Running totals since the scheduler was created.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Range requests received, accepted or not.
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub waiting: u64,
    pub rejected: u64,
    pub steps: u64,
    /// Output records persisted.
    pub writes: u64,
    pub checkpoints: u64,
    /// Times the loop went back to recompute keys behind its front.
    pub rewinds: u64,
    pub failed_writes: u64,
}

/// How busy the scheduler is right now.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemLoad {
    /// Keys `Scheduled` or `Producing`.
    pub pending: usize,
    /// Computed grids not yet persisted.
    pub backlog: usize,
}

/// What a synchronous drive accomplished.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DriveReport {
    pub steps: u64,
    pub writes: u64,
    pub checkpoints: u64,
    pub rewinds: u64,
    pub failed_writes: u64,
    /// The iteration the authoritative grid ended on.
    pub iteration: u64,
}

impl DriveReport {
    fn between(before: &Statistics, after: &Statistics, iteration: u64) -> Self {
        Self {
            steps: after.steps - before.steps,
            writes: after.writes - before.writes,
            checkpoints: after.checkpoints - before.checkpoints,
            rewinds: after.rewinds - before.rewinds,
            failed_writes: after.failed_writes - before.failed_writes,
            iteration,
        }
    }
}

/// Describes a `JobScheduler`.
pub struct SchedulerDescriptor<S: Stepper, A: ArtifactStore> {
    /// The `Stepper` that computes each iteration.
    pub solver: S,
    /// Where computed grids are persisted.
    pub store: Arc<A>,
    /// The grid the run starts from. Defaults to the solver's initial plate.
    pub init_state: Option<GridState>,
    /// A restart record is written every this many iterations. `0` disables checkpoints.
    pub checkpoint_interval: u64,
    /// How many computed grids may wait for persistence before stepping stalls.
    pub max_backlog: usize,
    /// The simulated time of one iteration, for time based range requests. Defaults to
    /// the solver coefficient.
    pub timestep: Option<f64>,
    /// How long the background loop sleeps when there is nothing to do.
    pub idle_poll: Duration,
}

impl<S: Stepper, A: ArtifactStore> SchedulerDescriptor<S, A> {
    /// A descriptor with default settings for everything but the solver and store.
    pub fn new(solver: S, store: Arc<A>) -> Self {
        Self {
            solver,
            store,
            init_state: None,
            checkpoint_interval: 10,
            max_backlog: 64,
            timestep: None,
            idle_poll: Duration::from_millis(50),
        }
    }
}

enum DriveSlot<S, A> {
    Idle(Box<DriveLoop<S, A>>),
    Running(JoinHandle<Box<DriveLoop<S, A>>>),
    /// The loop thread panicked and took the grid with it.
    Lost,
}

/// Schedules and runs the solver for requested iterations.
pub struct JobScheduler<S: Stepper + 'static, A: ArtifactStore + 'static> {
    store: Arc<A>,
    tracker: Arc<Tracker>,
    slot: Mutex<DriveSlot<S, A>>,
    stop: Arc<AtomicBool>,
    running: AtomicBool,
    lost: AtomicBool,
    wake: Sender<()>,
    timestep: f64,
    idle_poll: Duration,
}

impl<S: Stepper + 'static, A: ArtifactStore + 'static> JobScheduler<S, A> {
    /// Creates a new `JobScheduler` instance. The drive loop does not run until
    /// [`drive`](Self::drive) or [`start`](Self::start) is called.
    pub fn new(desc: SchedulerDescriptor<S, A>) -> Result<Self, Error> {
        let params = *desc.solver.parameters();
        params.validate()?;

        let expected = format!("{}x{}", params.width, params.height);
        let (width, height) = desc.store.dimensions();
        if (width, height) != (params.width, params.height) {
            return Err(Error::InvalidDimensions { width, height, expected });
        }

        let state = match desc.init_state {
            Some(state) => state,
            None => params.initial_state()?,
        };
        if (state.width(), state.height()) != (params.width, params.height) {
            return Err(Error::InvalidDimensions {
                width: state.width(),
                height: state.height(),
                expected,
            });
        }

        if desc.max_backlog == 0 {
            return Err(Error::InvalidConfig("max_backlog must be at least 1".to_string()));
        }
        if desc.idle_poll.is_zero() {
            return Err(Error::InvalidConfig("idle_poll must be non-zero".to_string()));
        }
        let timestep = desc.timestep.unwrap_or_else(|| params.coefficient());
        if !(timestep.is_finite() && timestep > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "timestep must be positive, got {}",
                timestep,
            )));
        }

        let tracker = Arc::new(Tracker::new(state.iteration(), params));
        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let drive = DriveLoop::new(
            desc.solver,
            state,
            Arc::clone(&desc.store),
            Arc::clone(&tracker),
            wake_rx,
            desc.checkpoint_interval,
            desc.max_backlog,
        );

        tracing::debug!(
            width = params.width,
            height = params.height,
            checkpoint_interval = desc.checkpoint_interval,
            max_backlog = desc.max_backlog,
            "job scheduler created",
        );

        Ok(Self {
            store: desc.store,
            tracker,
            slot: Mutex::new(DriveSlot::Idle(Box::new(drive))),
            stop: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            wake,
            timestep,
            idle_poll: desc.idle_poll,
        })
    }

    /// Schedules every key of `request` that is not yet persisted.
    ///
    /// Never blocks on computation. Requesting the same range again is a no-op.
    pub fn request_range(&self, request: &RangeRequest) -> Result<Admission, Error> {
        self.admit(std::slice::from_ref(request), None)
    }

    /// Schedules several ranges as one request.
    pub fn request_multiple_ranges(&self, requests: &[RangeRequest]) -> Result<Admission, Error> {
        self.admit(requests, None)
    }

    pub(crate) fn admit(
        &self,
        requests: &[RangeRequest],
        limits: Option<Limits>,
    ) -> Result<Admission, Error> {
        let ranges = requests
            .iter()
            .map(|request| request.resolve(self.timestep))
            .collect::<Result<Vec<_>, _>>()?;

        let admission = self.tracker.admit(&ranges, limits, |key| self.store.exists(key));
        match admission {
            Admission::Accepted { scheduled, hits, waiting } => {
                tracing::debug!(
                    ranges = ranges.len(),
                    scheduled,
                    hits,
                    waiting,
                    "range request accepted",
                );
                // a full channel already holds a wake-up
                let _ = self.wake.try_send(());
            }
            Admission::Overloaded { pending, capacity } => {
                tracing::debug!(pending, capacity, "range request rejected, overloaded");
            }
        }

        Ok(admission)
    }

    /// The status of `key`. Never triggers computation.
    #[inline]
    pub fn status(&self, key: u64) -> JobStatus {
        self.tracker.status(key)
    }

    /// The iteration of the authoritative grid.
    pub fn current_iteration(&self) -> u64 {
        self.tracker.iteration()
    }

    /// The largest iteration requested so far.
    pub fn horizon(&self) -> u64 {
        self.tracker.horizon()
    }

    pub fn parameters(&self) -> SolverParameters {
        self.tracker.parameters()
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn load(&self) -> SystemLoad {
        self.tracker.load()
    }

    pub fn stats(&self) -> Statistics {
        self.tracker.stats()
    }

    pub fn store(&self) -> &Arc<A> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the background thread died and the loop can no longer run.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Runs the drive loop on this thread until every requested key is persisted.
    ///
    /// Fails with `TransientError` if the store kept refusing writes, leaving the
    /// unwritten grids queued for the next drive.
    pub fn drive(&self, verbose: bool) -> Result<DriveReport, Error> {
        let mut slot = self.slot.lock();
        let drive = match &mut *slot {
            DriveSlot::Idle(drive) => drive,
            DriveSlot::Running(_) => return Err(Error::LoopRunning),
            DriveSlot::Lost => return Err(Error::DriveLoopPanicked),
        };

        let before = self.tracker.stats();
        let bar = if verbose {
            let remaining = self.tracker.horizon().saturating_sub(self.tracker.iteration());
            Some(indicatif::ProgressBar::new(remaining))
        } else {
            None
        };

        let result = drive.run_until_idle(bar.as_ref());
        if let Some(bar) = &bar {
            bar.finish();
        }
        result?;

        let report = DriveReport::between(&before, &self.tracker.stats(), self.tracker.iteration());
        tracing::debug!(
            steps = report.steps,
            writes = report.writes,
            iteration = report.iteration,
            "drive finished",
        );
        Ok(report)
    }

    /// Moves the drive loop onto a background thread. Does nothing if it already runs.
    pub fn start(&self) -> Result<(), Error> {
        let mut slot = self.slot.lock();
        self.launch(&mut slot)
    }

    /// Stops the background thread and waits for it to hand the loop back.
    pub fn stop(&self) -> Result<(), Error> {
        let mut slot = self.slot.lock();
        self.halt(&mut slot)
    }

    /// Resumes computation from the restart record at `iteration`.
    ///
    /// The solver is rebuilt from the record's parameters. On failure the previous grid
    /// is kept and the loop stays stopped.
    pub fn restart(&self, iteration: u64) -> Result<(), Error> {
        let mut slot = self.slot.lock();
        let was_running = matches!(*slot, DriveSlot::Running(_));
        self.halt(&mut slot)?;

        let (solver, state) = self.reconstruct(iteration).map_err(|e| {
            tracing::error!(iteration, error = %e, "restart failed");
            Error::RestartFailed { iteration, source: Box::new(e) }
        })?;
        if let DriveSlot::Idle(drive) = &mut *slot {
            drive.reset(solver, state);
        }
        tracing::info!(iteration, resume = was_running, "restarted from checkpoint");

        if was_running {
            self.launch(&mut slot)?;
        }
        Ok(())
    }

    fn reconstruct(&self, iteration: u64) -> Result<(S, GridState), Error> {
        let (state, metadata) = self.store.read_restart(iteration)?;
        let params = metadata.parameters;
        if (params.width, params.height) != self.store.dimensions() {
            return Err(Error::CorruptRecord {
                iteration,
                reason: format!("restart describes a {}x{} plate", params.width, params.height),
            });
        }

        let solver = S::from_parameters(params)?;
        Ok((solver, state))
    }

    fn launch(&self, slot: &mut DriveSlot<S, A>) -> Result<(), Error> {
        match std::mem::replace(slot, DriveSlot::Lost) {
            DriveSlot::Idle(drive) => {
                self.stop.store(false, Ordering::Release);
                let stop = Arc::clone(&self.stop);
                let idle_poll = self.idle_poll;

                let spawned = thread::Builder::new()
                    .name("heatcache-drive".to_string())
                    .spawn(move || drive.run(stop, idle_poll));
                match spawned {
                    Ok(handle) => {
                        *slot = DriveSlot::Running(handle);
                        self.running.store(true, Ordering::Release);
                        Ok(())
                    }
                    Err(e) => {
                        self.lost.store(true, Ordering::Release);
                        tracing::error!(error = %e, "cannot spawn drive loop thread");
                        Err(e.into())
                    }
                }
            }
            running @ DriveSlot::Running(_) => {
                *slot = running;
                Ok(())
            }
            DriveSlot::Lost => Err(Error::DriveLoopPanicked),
        }
    }

    fn halt(&self, slot: &mut DriveSlot<S, A>) -> Result<(), Error> {
        match std::mem::replace(slot, DriveSlot::Lost) {
            DriveSlot::Running(handle) => {
                self.stop.store(true, Ordering::Release);
                let _ = self.wake.try_send(());

                let joined = handle.join();
                self.running.store(false, Ordering::Release);
                match joined {
                    Ok(drive) => {
                        *slot = DriveSlot::Idle(drive);
                        Ok(())
                    }
                    Err(_) => {
                        self.lost.store(true, Ordering::Release);
                        tracing::error!("drive loop thread panicked");
                        Err(Error::DriveLoopPanicked)
                    }
                }
            }
            DriveSlot::Lost => Err(Error::DriveLoopPanicked),
            idle => {
                *slot = idle;
                Ok(())
            }
        }
    }
}

impl<S: Stepper + 'static, A: ArtifactStore + 'static> Drop for JobScheduler<S, A> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, DriveSlot::Running(_)) {
            let _ = self.halt(&mut slot);
        }
    }
}
