use crate::RangeRequest;

/// How far a consumer's access pattern has been recognised.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrefetchState {
    /// No access seen since the last reset.
    Disabled,
    /// One access seen, or a stride was just broken.
    Transient,
    /// The last accesses were a constant stride apart.
    Steady,
}

/// Follows one consumer's accesses and predicts the keys it will read next.
#[derive(Clone, Debug)]
pub(crate) struct PrefetchContext {
    state: PrefetchState,
    /// Positive when reading forward, negative when reading backward.
    stride: i64,
    last_access: u64,
    window: u64,
}

impl PrefetchContext {
    pub fn new(window: u64) -> Self {
        Self {
            state: PrefetchState::Disabled,
            stride: 0,
            last_access: 0,
            window,
        }
    }

    pub fn state(&self) -> PrefetchState {
        self.state
    }

    #[cfg(test)]
    pub fn stride(&self) -> i64 {
        self.stride
    }

    /// Records an access to `key`, returning the keys worth scheduling ahead of it.
    pub fn observe(&mut self, key: u64) -> Option<RangeRequest> {
        let stride = (key as i64).wrapping_sub(self.last_access as i64);
        let previous = std::mem::replace(&mut self.last_access, key);

        match self.state {
            PrefetchState::Disabled => {
                self.state = PrefetchState::Transient;
                None
            }
            PrefetchState::Transient => {
                if stride != 0 {
                    self.stride = stride;
                    self.state = PrefetchState::Steady;
                }
                None
            }
            PrefetchState::Steady if stride != self.stride => {
                tracing::debug!(
                    expected = self.stride,
                    found = stride,
                    from = previous,
                    "access stride broken",
                );
                self.stride = 0;
                self.state = PrefetchState::Transient;
                None
            }
            PrefetchState::Steady => self.ahead(key),
        }
    }

    pub fn reset(&mut self) {
        self.state = PrefetchState::Disabled;
        self.stride = 0;
        self.last_access = 0;
    }

    /// Up to `window` strides past `key` in the direction of travel.
    fn ahead(&self, key: u64) -> Option<RangeRequest> {
        if self.window == 0 {
            return None;
        }

        let step = self.stride.unsigned_abs();
        let (first, last) = if self.stride > 0 {
            let first = key.checked_add(step)?;
            let last = step
                .checked_mul(self.window)
                .and_then(|span| key.checked_add(span))?;
            (first, last)
        } else {
            let last = key.checked_sub(step)?;
            // stay on the stride lattice through `key`
            let strides = self.window.min(last / step + 1);
            (last - step * (strides - 1), last)
        };

        Some(RangeRequest::iterations(
            i64::try_from(first).ok()?,
            i64::try_from(last).ok()?,
            i64::try_from(step).ok()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(request: RangeRequest) -> Vec<u64> {
        request.resolve(1.0).unwrap().keys().collect()
    }

    #[test]
    fn forward_stride_becomes_steady() {
        let mut context = PrefetchContext::new(3);

        assert_eq!(context.observe(10), None);
        assert_eq!(context.state(), PrefetchState::Transient);
        assert_eq!(context.observe(12), None);
        assert_eq!(context.state(), PrefetchState::Steady);
        assert_eq!(context.stride(), 2);

        let ahead = context.observe(14).unwrap();
        assert_eq!(keys(ahead), vec![16, 18, 20]);
    }

    #[test]
    fn backward_stride_stops_at_zero() {
        let mut context = PrefetchContext::new(4);
        let _ = context.observe(9);
        let _ = context.observe(6);

        let ahead = context.observe(3).unwrap();
        assert_eq!(keys(ahead), vec![0]);
        assert_eq!(context.observe(0), None);
    }

    #[test]
    fn backward_window_is_aligned_with_the_stride() {
        let mut context = PrefetchContext::new(2);
        let _ = context.observe(50);
        let _ = context.observe(45);

        let ahead = context.observe(40).unwrap();
        assert_eq!(keys(ahead), vec![30, 35]);
    }

    #[test]
    fn broken_stride_starts_over() {
        let mut context = PrefetchContext::new(3);
        let _ = context.observe(1);
        let _ = context.observe(2);
        assert!(context.observe(3).is_some());

        assert_eq!(context.observe(7), None);
        assert_eq!(context.state(), PrefetchState::Transient);
        assert_eq!(context.observe(11), None);
        assert_eq!(keys(context.observe(15).unwrap()), vec![19, 23, 27]);
    }

    #[test]
    fn repeated_key_is_not_a_stride() {
        let mut context = PrefetchContext::new(3);
        let _ = context.observe(5);
        assert_eq!(context.observe(5), None);
        assert_eq!(context.state(), PrefetchState::Transient);
    }

    #[test]
    fn zero_window_never_prefetches() {
        let mut context = PrefetchContext::new(0);
        for key in [0, 1, 2, 3, 4] {
            assert_eq!(context.observe(key), None);
        }
        assert_eq!(context.state(), PrefetchState::Steady);
    }

    #[test]
    fn reset_forgets_the_pattern() {
        let mut context = PrefetchContext::new(3);
        let _ = context.observe(1);
        let _ = context.observe(2);
        context.reset();
        assert_eq!(context.state(), PrefetchState::Disabled);
        assert_eq!(context.observe(3), None);
    }
}
