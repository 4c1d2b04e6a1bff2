use crate::Error;

/// A consumer's request for a strided range of artifacts.
///
/// Both forms resolve to the same iteration keys: time offsets are divided by the run's
/// fixed time step and rounded to the nearest iteration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RangeRequest {
    /// Raw iteration counts.
    Iterations { first: i64, last: i64, stride: i64 },
    /// Simulated time offsets.
    Time { first: f64, last: f64, stride: f64 },
}

impl RangeRequest {
    #[inline]
    pub fn iterations(first: i64, last: i64, stride: i64) -> Self {
        Self::Iterations { first, last, stride }
    }

    #[inline]
    pub fn time(first: f64, last: f64, stride: f64) -> Self {
        Self::Time { first, last, stride }
    }

    /// Resolves the request into iteration keys using a time step of `timestep`.
    pub fn resolve(&self, timestep: f64) -> Result<ResolvedRange, Error> {
        match *self {
            Self::Iterations { first, last, stride } => ResolvedRange::new(first, last, stride),
            Self::Time { first, last, stride } => {
                if !(first.is_finite() && last.is_finite() && stride.is_finite()) {
                    return Err(Error::InvalidRange(format!(
                        "time bounds must be finite ( first: {}, last: {}, stride: {} )",
                        first, last, stride,
                    )));
                }
                if stride <= 0.0 {
                    return Err(Error::InvalidRange(format!(
                        "stride must be positive, got {}",
                        stride,
                    )));
                }
                let to_key = |t: f64| (t / timestep).round() as i64;
                let stride_key = to_key(stride);
                if stride_key < 1 {
                    return Err(Error::InvalidRange(format!(
                        "stride {} is shorter than one time step ({})",
                        stride, timestep,
                    )));
                }
                ResolvedRange::new(to_key(first), to_key(last), stride_key)
            }
        }
    }
}

/// A validated range of iteration keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    pub first: u64,
    pub last: u64,
    pub stride: u64,
}

impl ResolvedRange {
    fn new(first: i64, last: i64, stride: i64) -> Result<Self, Error> {
        if stride <= 0 {
            return Err(Error::InvalidRange(format!("stride must be positive, got {}", stride)));
        }
        if last < first {
            return Err(Error::InvalidRange(format!("last ({}) precedes first ({})", last, first)));
        }
        if first < 0 {
            return Err(Error::InvalidRange(format!("first must not be negative, got {}", first)));
        }

        Ok(Self {
            first: first as u64,
            last: last as u64,
            stride: stride as u64,
        })
    }

    /// The number of keys in the range.
    pub fn count(&self) -> u64 {
        (self.last - self.first) / self.stride + 1
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> {
        (self.first..=self.last).step_by(self.stride as usize)
    }
}
