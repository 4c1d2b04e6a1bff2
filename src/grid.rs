use crate::Error;
use crate::fdtd::Boundary;

/// Solver specific parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SolverParameters {
    /// The number of grid points along x.
    pub width: u32,
    /// The number of grid points along y.
    pub height: u32,
    /// The Courant–Friedrichs–Lewy number.
    pub cfl: f64,
    /// The thermal diffusivity factor.
    pub td: f64,
    /// The fixed temperatures held along the edges of the plate.
    pub boundary: Boundary,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            cfl: 0.25,
            td: 0.5,
            boundary: Boundary::uniform(20.0),
        }
    }
}

impl SolverParameters {
    /// Checks the parameters describe a solvable plate.
    pub fn validate(&self) -> Result<(), Error> {
        check_dimensions(self.width, self.height)?;
        if !(self.cfl.is_finite() && self.cfl > 0.0) {
            return Err(Error::InvalidConfig(format!("cfl must be positive, got {}", self.cfl)));
        }
        if !(self.td.is_finite() && self.td > 0.0) {
            return Err(Error::InvalidConfig(format!("td must be positive, got {}", self.td)));
        }
        if !self.boundary.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "boundary values must be finite, got {:?}",
                self.boundary,
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn delta_x(&self) -> f64 {
        (self.width as f64).recip()
    }

    #[inline]
    pub fn delta_y(&self) -> f64 {
        (self.height as f64).recip()
    }

    /// The per-step stencil coefficient, which doubles as the length of one time step.
    pub fn coefficient(&self) -> f64 {
        let dx2 = self.delta_x() * self.delta_x();
        let dy2 = self.delta_y() * self.delta_y();

        self.cfl * (dx2 * dy2) / ((dx2 + dy2) * self.td)
    }

    /// The plate at iteration 0: edges at their boundary values, interior at zero.
    pub fn initial_state(&self) -> Result<GridState, Error> {
        check_dimensions(self.width, self.height)?;
        let (width, height) = (self.width as usize, self.height as usize);
        let cells = ndarray::Array2::from_shape_fn((width, height), |(i, j)| {
            self.boundary.value_at(i, j, width, height).unwrap_or(0.0)
        });

        Ok(GridState { iteration: 0, cells })
    }
}

/// Describes the plate at one iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct GridState {
    iteration: u64,
    /// Temperatures indexed `[[i, j]]`, `i` along x and `j` along y.
    cells: ndarray::Array2<f64>,
}

impl GridState {
    /// Wraps `cells`, whose shape is `(width, height)`.
    pub fn new(iteration: u64, cells: ndarray::Array2<f64>) -> Result<Self, Error> {
        let (width, height) = cells.dim();
        check_dimensions(width as u32, height as u32)?;

        // keep row-major layout so the cells can be handed out as a flat sequence
        let cells = if cells.is_standard_layout() {
            cells
        } else {
            cells.as_standard_layout().into_owned()
        };

        Ok(Self { iteration, cells })
    }

    /// Builds a grid from a flat row-major sequence of `width * height` values.
    pub fn from_vec(
        iteration: u64,
        width: u32,
        height: u32,
        values: Vec<f64>,
    ) -> Result<Self, Error> {
        check_dimensions(width, height)?;
        let len = values.len();
        let cells = ndarray::Array2::from_shape_vec((width as usize, height as usize), values)
            .map_err(|_| Error::InvalidDimensions {
                width,
                height,
                expected: format!("{} values, got {}", width as usize * height as usize, len),
            })?;

        Ok(Self { iteration, cells })
    }

    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.cells.nrows() as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.cells.ncols() as u32
    }

    #[inline]
    pub fn cells(&self) -> &ndarray::Array2<f64> {
        &self.cells
    }

    /// The temperature at `(i, j)`.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.cells[[i, j]]
    }

    /// The cells as a flat row-major sequence.
    pub fn to_vec(&self) -> Vec<f64> {
        self.cells.iter().copied().collect()
    }

    pub(crate) fn advanced(&self, cells: ndarray::Array2<f64>) -> Self {
        Self {
            iteration: self.iteration + 1,
            cells,
        }
    }
}

pub(crate) fn check_dimensions(width: u32, height: u32) -> Result<(), Error> {
    if width > 1 && height > 1 {
        Ok(())
    } else {
        Err(Error::InvalidDimensions {
            width,
            height,
            expected: "both dimensions greater than 1".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn coefficient_matches_derived_formula() {
        let params = SolverParameters {
            width: 4,
            height: 4,
            cfl: 0.25,
            td: 0.5,
            boundary: Boundary::uniform(20.0),
        };
        // dx = dy = 1/4
        assert_relative_eq!(params.coefficient(), 0.015625);
    }

    #[test]
    fn initial_corners_average_adjacent_edges() {
        let params = SolverParameters {
            width: 5,
            height: 3,
            boundary: Boundary { left: 10.0, right: 30.0, top: 40.0, bottom: 0.0 },
            ..Default::default()
        };
        let state = params.initial_state().unwrap();

        assert_eq!(state.iteration(), 0);
        assert_relative_eq!(state.at(0, 0), 5.0);
        assert_relative_eq!(state.at(0, 2), 25.0);
        assert_relative_eq!(state.at(4, 2), 35.0);
        assert_relative_eq!(state.at(4, 0), 15.0);
        assert_relative_eq!(state.at(2, 0), 0.0);
        assert_relative_eq!(state.at(2, 2), 40.0);
        assert_relative_eq!(state.at(0, 1), 10.0);
        assert_relative_eq!(state.at(4, 1), 30.0);
        assert_relative_eq!(state.at(2, 1), 0.0);
    }

    #[test]
    fn degenerate_dimensions_are_rejected() {
        let params = SolverParameters { width: 1, ..Default::default() };
        assert!(matches!(params.validate(), Err(Error::InvalidDimensions { .. })));
        assert!(matches!(
            GridState::from_vec(0, 4, 1, vec![0.0; 4]),
            Err(Error::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(GridState::from_vec(0, 3, 3, vec![0.0; 8]).is_err());

        let state = GridState::from_vec(7, 2, 3, (0..6).map(f64::from).collect()).unwrap();
        assert_eq!(state.width(), 2);
        assert_eq!(state.height(), 3);
        assert_eq!(state.at(1, 0), 3.0);
        assert_eq!(state.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn non_positive_cfl_is_rejected() {
        let params = SolverParameters { cfl: 0.0, ..Default::default() };
        assert!(matches!(params.validate(), Err(Error::InvalidConfig(_))));
    }
}
