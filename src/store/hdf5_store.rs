use std::path::{Path, PathBuf};

use crate::{Error, GridState, SolverParameters};
use crate::fdtd::Boundary;
use crate::store::{check_fits, check_restart, ArtifactStore, RecordTag, RestartMetadata};

const OUTPUT_DIR: &str = "output";
const RESTART_DIR: &str = "restart";
const OUTPUT_PREFIX: &str = "data_";
const RESTART_PREFIX: &str = "restart_";
const EXTENSION: &str = "h5";

/// Keeps one HDF5 file per record under a root directory.
///
/// Each file holds a `data` dataset of shape `(width, height)` and a scalar `iteration`
/// attribute. Restart files add `nx`, `ny`, `cfl`, `td` and the four boundary values as
/// attributes. Files are written under a temporary name and renamed into place.
#[derive(Debug)]
pub struct Hdf5Store {
    root: PathBuf,
    width: u32,
    height: u32,
}

impl Hdf5Store {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, width: u32, height: u32) -> Result<Self, Error> {
        crate::grid::check_dimensions(width, height)?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(OUTPUT_DIR))?;
        std::fs::create_dir_all(root.join(RESTART_DIR))?;

        Ok(Self { root, width, height })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file the output record for `iteration` lives in.
    pub fn output_path(&self, iteration: u64) -> PathBuf {
        self.root
            .join(OUTPUT_DIR)
            .join(format!("{}{}.{}", OUTPUT_PREFIX, iteration, EXTENSION))
    }

    pub fn restart_path(&self, iteration: u64) -> PathBuf {
        self.root
            .join(RESTART_DIR)
            .join(format!("{}{}.{}", RESTART_PREFIX, iteration, EXTENSION))
    }

    fn write_file(
        &self,
        path: &Path,
        state: &GridState,
        params: Option<&SolverParameters>,
    ) -> Result<(), Error> {
        let partial = path.with_extension(format!("{}.partial", EXTENSION));

        let file = hdf5::File::create(&partial)?;
        let data = file.new_dataset::<f64>()
            .shape((self.width as usize, self.height as usize))
            .create("data")?;
        data.write(state.cells())?;
        write_attr(&file, "iteration", &state.iteration())?;

        if let Some(params) = params {
            write_attr(&file, "nx", &params.width)?;
            write_attr(&file, "ny", &params.height)?;
            write_attr(&file, "cfl", &params.cfl)?;
            write_attr(&file, "td", &params.td)?;
            write_attr(&file, "left", &params.boundary.left)?;
            write_attr(&file, "right", &params.boundary.right)?;
            write_attr(&file, "top", &params.boundary.top)?;
            write_attr(&file, "bottom", &params.boundary.bottom)?;
        }
        file.close()?;

        std::fs::rename(&partial, path)?;
        Ok(())
    }

    fn open(&self, path: &Path, iteration: u64) -> Result<hdf5::File, Error> {
        if !path.is_file() {
            return Err(Error::NotFound(iteration));
        }
        hdf5::File::open(path).map_err(|e| Error::CorruptRecord {
            iteration,
            reason: e.to_string(),
        })
    }

    fn read_grid(&self, file: &hdf5::File, iteration: u64) -> Result<GridState, Error> {
        let corrupt = |e: hdf5::Error| Error::CorruptRecord {
            iteration,
            reason: e.to_string(),
        };

        let cells = file.dataset("data")
            .and_then(|data| data.read_2d::<f64>())
            .map_err(corrupt)?;
        let recorded = file.attr("iteration")
            .and_then(|attr| attr.read_scalar::<u64>())
            .map_err(corrupt)?;
        if recorded != iteration {
            return Err(Error::CorruptRecord {
                iteration,
                reason: format!("file is tagged with iteration {}", recorded),
            });
        }

        let state = GridState::new(iteration, cells).map_err(|e| Error::CorruptRecord {
            iteration,
            reason: e.to_string(),
        })?;
        check_fits(&state, self.dimensions()).map_err(|e| Error::CorruptRecord {
            iteration,
            reason: e.to_string(),
        })?;

        Ok(state)
    }
}

impl ArtifactStore for Hdf5Store {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn write(&self, state: &GridState, tag: RecordTag) -> Result<(), Error> {
        check_fits(state, self.dimensions())?;

        match tag {
            RecordTag::Output => {
                self.write_file(&self.output_path(state.iteration()), state, None)
            }
            RecordTag::Restart(params) => {
                let metadata = RestartMetadata {
                    iteration: state.iteration(),
                    parameters: params,
                };
                check_restart(state, &metadata)?;
                self.write_file(&self.restart_path(state.iteration()), state, Some(&params))
            }
        }
    }

    fn exists(&self, iteration: u64) -> bool {
        self.output_path(iteration).is_file()
    }

    fn read(&self, iteration: u64) -> Result<GridState, Error> {
        let file = self.open(&self.output_path(iteration), iteration)?;
        self.read_grid(&file, iteration)
    }

    fn read_restart(&self, iteration: u64) -> Result<(GridState, RestartMetadata), Error> {
        let file = self.open(&self.restart_path(iteration), iteration)?;
        let state = self.read_grid(&file, iteration)?;

        let read_header = || -> Result<SolverParameters, hdf5::Error> {
            Ok(SolverParameters {
                width: file.attr("nx")?.read_scalar::<u32>()?,
                height: file.attr("ny")?.read_scalar::<u32>()?,
                cfl: file.attr("cfl")?.read_scalar::<f64>()?,
                td: file.attr("td")?.read_scalar::<f64>()?,
                boundary: Boundary {
                    left: file.attr("left")?.read_scalar::<f64>()?,
                    right: file.attr("right")?.read_scalar::<f64>()?,
                    top: file.attr("top")?.read_scalar::<f64>()?,
                    bottom: file.attr("bottom")?.read_scalar::<f64>()?,
                },
            })
        };
        let parameters = read_header().map_err(|e| Error::CorruptRecord {
            iteration,
            reason: format!("restart header: {}", e),
        })?;

        let metadata = RestartMetadata { iteration, parameters };
        check_restart(&state, &metadata)?;

        Ok((state, metadata))
    }

    fn restart_points(&self) -> Vec<u64> {
        let entries = match std::fs::read_dir(self.root.join(RESTART_DIR)) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    root = %self.root.display(),
                    error = %e,
                    "cannot list restart records",
                );
                return Vec::new();
            }
        };

        let mut points = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_key(&entry.path(), RESTART_PREFIX))
            .collect::<Vec<_>>();
        points.sort_unstable();
        points
    }
}

fn write_attr<T: hdf5::H5Type>(file: &hdf5::File, name: &str, value: &T) -> Result<(), Error> {
    let attr = file.new_attr::<T>()
        .shape(hdf5::Extents::Scalar)
        .create(name)?;
    attr.write_scalar(value)?;
    Ok(())
}

/// Extracts `n` from `<prefix><n>.h5`, skipping anything else (including partial files).
fn parse_key(path: &Path, prefix: &str) -> Option<u64> {
    if path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(prefix)?
        .parse()
        .ok()
}
