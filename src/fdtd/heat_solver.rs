use crate::{Error, GridState, SolverParameters, Stepper};

/// Steps a heated plate with the explicit 5-point stencil, single threaded on the CPU.
#[derive(Clone, Debug)]
pub struct HeatSolver {
    params: SolverParameters,
    coefficient: f64,
}

impl HeatSolver {
    #[inline]
    pub fn new(params: SolverParameters) -> Result<Self, Error> {
        params.validate()?;

        Ok(Self {
            coefficient: params.coefficient(),
            params,
        })
    }

    #[inline]
    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }
}

impl Stepper for HeatSolver {
    #[inline]
    fn step(&self, state: &GridState) -> Result<GridState, Error> {
        if state.width() != self.params.width || state.height() != self.params.height {
            return Err(Error::InvalidDimensions {
                width: state.width(),
                height: state.height(),
                expected: format!("{}x{}", self.params.width, self.params.height),
            });
        }

        let last = state.cells();
        // boundary cells carry over unchanged
        let mut next = last.clone();
        let (width, height) = last.dim();
        if width < 3 || height < 3 {
            return Ok(state.advanced(next));
        }

        let coefficient = self.coefficient;
        ndarray::Zip::from(next.slice_mut(ndarray::s![1..(width-1), 1..(height-1)]))
            .and(last.windows((3, 3)))
            .for_each(|nc, lc| {
                let center = lc[[1, 1]];
                *nc = center + coefficient
                    * (lc[[2, 1]] + lc[[0, 1]] - 4.0*center + lc[[1, 0]] + lc[[1, 2]]);
            });

        Ok(state.advanced(next))
    }

    fn parameters(&self) -> &SolverParameters {
        &self.params
    }

    fn from_parameters(params: SolverParameters) -> Result<Self, Error> {
        Self::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdtd::Boundary;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn plate(width: u32, height: u32, boundary: Boundary) -> SolverParameters {
        SolverParameters {
            width,
            height,
            cfl: 0.25,
            td: 0.5,
            boundary,
        }
    }

    #[test]
    fn uniform_plate_keeps_corners() {
        let solver = HeatSolver::new(plate(4, 4, Boundary::uniform(20.0))).unwrap();
        let state = solver.parameters().initial_state().unwrap();
        assert_relative_eq!(state.at(0, 0), 20.0);

        let next = solver.step(&state).unwrap();
        assert_eq!(next.iteration(), 1);
        for (i, j) in [(0, 0), (0, 3), (3, 3), (3, 0)] {
            assert_relative_eq!(next.at(i, j), 20.0);
        }
    }

    #[test]
    fn interior_follows_stencil() {
        let solver = HeatSolver::new(plate(4, 4, Boundary::uniform(20.0))).unwrap();
        let state = solver.parameters().initial_state().unwrap();
        let next = solver.step(&state).unwrap();

        // (1, 1) has two hot neighbours and two cold ones
        let expected = solver.coefficient() * 40.0;
        assert_relative_eq!(next.at(1, 1), expected);
        assert_relative_eq!(next.at(2, 2), expected);
        assert_relative_eq!(next.at(1, 2), expected);
    }

    #[test]
    fn reads_only_the_previous_grid() {
        let solver = HeatSolver::new(plate(5, 5, Boundary::uniform(0.0))).unwrap();
        let mut values = vec![0.0; 25];
        values[2*5 + 2] = 1.0;
        let state = GridState::from_vec(0, 5, 5, values).unwrap();
        let next = solver.step(&state).unwrap();

        let k = solver.coefficient();
        assert_relative_eq!(next.at(2, 2), 1.0 - 4.0*k);
        // a sweep that updated in place would feed the new (2, 2) into (2, 3)
        assert_relative_eq!(next.at(2, 3), k);
        assert_relative_eq!(next.at(3, 2), k);
        assert_relative_eq!(next.at(1, 1), 0.0);
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let solver = HeatSolver::new(plate(4, 4, Boundary::uniform(1.0))).unwrap();
        let other = plate(5, 4, Boundary::uniform(1.0)).initial_state().unwrap();
        assert!(matches!(solver.step(&other), Err(Error::InvalidDimensions { .. })));
    }

    #[test]
    fn two_by_two_plate_is_all_boundary() {
        let solver = HeatSolver::new(plate(2, 2, Boundary::uniform(3.0))).unwrap();
        let state = solver.parameters().initial_state().unwrap();
        let next = solver.step(&state).unwrap();
        assert_eq!(next.cells(), state.cells());
        assert_eq!(next.iteration(), 1);
    }

    proptest! {
        #[test]
        fn boundary_cells_never_change(
            width in 2u32..12,
            height in 2u32..12,
            left in -50.0f64..50.0,
            right in -50.0f64..50.0,
            top in -50.0f64..50.0,
            bottom in -50.0f64..50.0,
            steps in 1usize..5,
        ) {
            let boundary = Boundary { left, right, top, bottom };
            let solver = HeatSolver::new(plate(width, height, boundary)).unwrap();
            let initial = solver.parameters().initial_state().unwrap();
            let mut state = initial.clone();
            for _ in 0..steps {
                state = solver.step(&state).unwrap();
            }

            let (w, h) = (width as usize, height as usize);
            for i in 0..w {
                for j in 0..h {
                    if i == 0 || j == 0 || i == w - 1 || j == h - 1 {
                        prop_assert_eq!(state.at(i, j), initial.at(i, j));
                    }
                }
            }
            prop_assert_eq!(state.iteration(), steps as u64);
        }

        #[test]
        fn stepping_is_deterministic(
            width in 2u32..10,
            height in 2u32..10,
            values in proptest::collection::vec(-100.0f64..100.0, 100),
        ) {
            let solver = HeatSolver::new(plate(width, height, Boundary::uniform(0.0))).unwrap();
            let n = (width * height) as usize;
            let state = GridState::from_vec(3, width, height, values[..n].to_vec()).unwrap();

            prop_assert_eq!(solver.step(&state).unwrap(), solver.step(&state).unwrap());
        }
    }
}
