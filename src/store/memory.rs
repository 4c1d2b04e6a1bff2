use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{Error, GridState, SolverParameters};
use crate::store::{check_fits, check_restart, ArtifactStore, RecordTag, RestartMetadata};

/// Keeps every record in memory. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryStore {
    width: u32,
    height: u32,
    outputs: RwLock<BTreeMap<u64, GridState>>,
    restarts: RwLock<BTreeMap<u64, (GridState, SolverParameters)>>,
}

impl MemoryStore {
    pub fn new(width: u32, height: u32) -> Result<Self, Error> {
        crate::grid::check_dimensions(width, height)?;

        Ok(Self {
            width,
            height,
            outputs: RwLock::new(BTreeMap::new()),
            restarts: RwLock::new(BTreeMap::new()),
        })
    }

    /// The number of output records.
    pub fn len(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.read().is_empty()
    }
}

impl ArtifactStore for MemoryStore {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write(&self, state: &GridState, tag: RecordTag) -> Result<(), Error> {
        check_fits(state, self.dimensions())?;

        match tag {
            RecordTag::Output => {
                self.outputs.write().insert(state.iteration(), state.clone());
            }
            RecordTag::Restart(params) => {
                let metadata = RestartMetadata {
                    iteration: state.iteration(),
                    parameters: params,
                };
                check_restart(state, &metadata)?;
                self.restarts.write().insert(state.iteration(), (state.clone(), params));
            }
        }

        Ok(())
    }

    fn exists(&self, iteration: u64) -> bool {
        self.outputs.read().contains_key(&iteration)
    }

    fn read(&self, iteration: u64) -> Result<GridState, Error> {
        self.outputs
            .read()
            .get(&iteration)
            .cloned()
            .ok_or(Error::NotFound(iteration))
    }

    fn read_restart(&self, iteration: u64) -> Result<(GridState, RestartMetadata), Error> {
        let (state, parameters) = self.restarts
            .read()
            .get(&iteration)
            .cloned()
            .ok_or(Error::NotFound(iteration))?;

        Ok((state, RestartMetadata { iteration, parameters }))
    }

    fn restart_points(&self) -> Vec<u64> {
        self.restarts.read().keys().copied().collect()
    }
}
