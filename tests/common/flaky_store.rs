//! A store that refuses output writes on demand and remembers the order of the ones it took

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use heatcache::prelude::*;
use heatcache::{Error, RestartMetadata};

pub struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
    refused: Mutex<BTreeSet<u64>>,
    written: Mutex<Vec<u64>>,
}

impl FlakyStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: MemoryStore::new(width, height).unwrap(),
            failures: AtomicUsize::new(0),
            refused: Mutex::new(BTreeSet::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Fails the next `count` output writes.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Fails every output write of `iteration` until [`accept`](Self::accept) is called.
    pub fn refuse(&self, iteration: u64) {
        self.refused.lock().insert(iteration);
    }

    pub fn accept(&self, iteration: u64) {
        self.refused.lock().remove(&iteration);
    }

    pub fn heal(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    /// Iterations of every successful output write, in order.
    pub fn written(&self) -> Vec<u64> {
        self.written.lock().clone()
    }
}

impl ArtifactStore for FlakyStore {
    fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }

    fn write(&self, state: &GridState, tag: RecordTag) -> Result<(), Error> {
        if tag == RecordTag::Output {
            let refused = self.refused.lock().contains(&state.iteration())
                || self.failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
            if refused {
                return Err(Error::TransientError(format!(
                    "refusing iteration {}",
                    state.iteration(),
                )));
            }
        }

        self.inner.write(state, tag)?;
        if tag == RecordTag::Output {
            self.written.lock().push(state.iteration());
        }
        Ok(())
    }

    fn exists(&self, iteration: u64) -> bool {
        self.inner.exists(iteration)
    }

    fn read(&self, iteration: u64) -> Result<GridState, Error> {
        self.inner.read(iteration)
    }

    fn read_restart(&self, iteration: u64) -> Result<(GridState, RestartMetadata), Error> {
        self.inner.read_restart(iteration)
    }

    fn restart_points(&self) -> Vec<u64> {
        self.inner.restart_points()
    }
}
