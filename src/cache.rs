//! The request facing side of the cache.

mod prefetch;

pub use self::prefetch::PrefetchState;

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use self::prefetch::PrefetchContext;

use crate::scheduler::Limits;
use crate::{
    Admission, ArtifactStore, DriveReport, Error, GridState, JobScheduler, JobStatus,
    RangeRequest, Statistics, Stepper, SystemLoad,
};

/// Describes the limits a `CacheFront` enforces on requests.
#[derive(Copy, Clone, Debug)]
pub struct CacheDescriptor {
    /// Requests are refused while more keys than this are waiting to be produced.
    pub max_pending_jobs: usize,
    /// Requests are refused while this many computed grids wait for persistence.
    pub max_write_backlog: usize,
    /// How many strides ahead of a steady reader [`CacheFront::access`] schedules.
    /// `0` turns prefetching off.
    pub prefetch_window: u64,
}

impl Default for CacheDescriptor {
    fn default() -> Self {
        Self {
            max_pending_jobs: 1024,
            max_write_backlog: 32,
            prefetch_window: 4,
        }
    }
}

/// The advisory health of the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Ok,
    /// Grids are waiting on a failing store, or the drive loop died.
    TransientError,
    /// New requests would be refused.
    Overloaded,
}

impl CacheStatus {
    /// The numeric status reported to polling consumers.
    #[inline]
    pub fn code(&self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::TransientError => -1,
            Self::Overloaded => -2,
        }
    }
}

/// Answers consumer requests for solver output.
///
/// Every method takes `&self`; a `CacheFront` is meant to be shared behind an `Arc`.
pub struct CacheFront<S: Stepper + 'static, A: ArtifactStore + 'static> {
    scheduler: JobScheduler<S, A>,
    limits: Limits,
    info: RwLock<HashMap<String, i64>>,
    prefetch_window: u64,
    /// Access history per consumer.
    readers: Mutex<HashMap<String, PrefetchContext>>,
}

impl<S: Stepper + 'static, A: ArtifactStore + 'static> CacheFront<S, A> {
    /// Creates a new `CacheFront` instance.
    pub fn new(scheduler: JobScheduler<S, A>, desc: CacheDescriptor) -> Result<Self, Error> {
        if desc.max_pending_jobs == 0 {
            return Err(Error::InvalidConfig(
                "max_pending_jobs must be at least 1".to_string(),
            ));
        }
        if desc.max_write_backlog == 0 {
            return Err(Error::InvalidConfig(
                "max_write_backlog must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            scheduler,
            limits: Limits {
                max_pending: desc.max_pending_jobs,
                max_backlog: desc.max_write_backlog,
            },
            info: RwLock::new(HashMap::new()),
            prefetch_window: desc.prefetch_window,
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// The status of `key`. Never schedules anything.
    #[inline]
    pub fn test(&self, key: u64) -> JobStatus {
        self.scheduler.status(key)
    }

    pub fn status(&self) -> CacheStatus {
        let load = self.scheduler.load();
        if load.pending >= self.limits.max_pending || load.backlog >= self.limits.max_backlog {
            CacheStatus::Overloaded
        } else if load.backlog > 0 || self.scheduler.is_lost() {
            CacheStatus::TransientError
        } else {
            CacheStatus::Ok
        }
    }

    /// Requests every key of `request`, unless the cache is overloaded.
    pub fn request_range(&self, request: &RangeRequest) -> Result<Admission, Error> {
        self.scheduler.admit(std::slice::from_ref(request), Some(self.limits))
    }

    /// Requests several ranges. Either all of them are admitted or none are.
    pub fn request_multiple_ranges(&self, requests: &[RangeRequest]) -> Result<Admission, Error> {
        self.scheduler.admit(requests, Some(self.limits))
    }

    /// Notes that `consumer` read `key` and schedules what it is likely to read next.
    ///
    /// Once a consumer's last three accesses share a stride, every further access on that
    /// stride requests the next `prefetch_window` keys along it, subject to the usual
    /// admission limits. A broken stride starts the detection over. Returns the admission
    /// of the prefetch request, if one was made.
    pub fn access(&self, consumer: &str, key: u64) -> Result<Option<Admission>, Error> {
        let ahead = {
            let mut readers = self.readers.lock();
            readers
                .entry(consumer.to_string())
                .or_insert_with(|| PrefetchContext::new(self.prefetch_window))
                .observe(key)
        };
        let request = match ahead {
            Some(request) => request,
            None => return Ok(None),
        };

        let admission = self.request_range(&request)?;
        match admission {
            Admission::Accepted { scheduled, .. } => {
                tracing::debug!(consumer, key, ?request, scheduled, "prefetch requested");
            }
            Admission::Overloaded { pending, capacity } => {
                tracing::debug!(consumer, key, pending, capacity, "prefetch refused");
            }
        }
        Ok(Some(admission))
    }

    /// How far the access pattern of `consumer` has been recognised.
    pub fn prefetch_state(&self, consumer: &str) -> PrefetchState {
        self.readers
            .lock()
            .get(consumer)
            .map_or(PrefetchState::Disabled, PrefetchContext::state)
    }

    /// Drops the access history of `consumer`.
    pub fn forget_consumer(&self, consumer: &str) {
        if let Some(context) = self.readers.lock().get_mut(consumer) {
            context.reset();
        }
    }

    /// Records a consumer supplied value. The last write to a key wins.
    pub fn set_info<K: Into<String>>(&self, key: K, value: i64) {
        let key = key.into();
        tracing::trace!(key = %key, value, "info set");
        self.info.write().insert(key, value);
    }

    pub fn get_info(&self, key: &str) -> Option<i64> {
        self.info.read().get(key).copied()
    }

    /// Like [`get_info`](Self::get_info), falling back to `default` for unset keys.
    pub fn get_info_or(&self, key: &str, default: i64) -> i64 {
        self.get_info(key).unwrap_or(default)
    }

    /// Reads a persisted grid.
    pub fn read(&self, key: u64) -> Result<GridState, Error> {
        self.scheduler.store().read(key)
    }

    pub fn stats(&self) -> Statistics {
        self.scheduler.stats()
    }

    pub fn load(&self) -> SystemLoad {
        self.scheduler.load()
    }

    pub fn store(&self) -> &A {
        self.scheduler.store()
    }

    pub fn scheduler(&self) -> &JobScheduler<S, A> {
        &self.scheduler
    }

    /// See [`JobScheduler::drive`].
    pub fn drive(&self, verbose: bool) -> Result<DriveReport, Error> {
        self.scheduler.drive(verbose)
    }

    pub fn start(&self) -> Result<(), Error> {
        self.scheduler.start()
    }

    pub fn stop(&self) -> Result<(), Error> {
        self.scheduler.stop()
    }

    /// See [`JobScheduler::restart`].
    pub fn restart(&self, iteration: u64) -> Result<(), Error> {
        self.scheduler.restart(iteration)
    }
}
