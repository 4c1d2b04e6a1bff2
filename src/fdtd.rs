mod heat_solver;

pub use heat_solver::HeatSolver;

/// The fixed temperatures held along the four edges of the plate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Boundary {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Boundary {
    /// Holds every edge at the same temperature.
    pub fn uniform(value: f64) -> Self {
        Self {
            left: value,
            right: value,
            top: value,
            bottom: value,
        }
    }

    /// The fixed value of boundary cell `(i, j)` on a `width` x `height` plate.
    ///
    /// Corners take the average of their two adjacent edges. Returns `None` for interior
    /// cells.
    pub fn value_at(&self, i: usize, j: usize, width: usize, height: usize) -> Option<f64> {
        let (last_i, last_j) = (width - 1, height - 1);

        match (i, j) {
            (0, 0) => Some(0.5 * (self.left + self.bottom)),
            (0, j) if j == last_j => Some(0.5 * (self.top + self.left)),
            (i, j) if i == last_i && j == last_j => Some(0.5 * (self.top + self.right)),
            (i, 0) if i == last_i => Some(0.5 * (self.bottom + self.right)),
            (_, 0) => Some(self.bottom),
            (_, j) if j == last_j => Some(self.top),
            (0, _) => Some(self.left),
            (i, _) if i == last_i => Some(self.right),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.left, self.right, self.top, self.bottom].iter().all(|v| v.is_finite())
    }
}
