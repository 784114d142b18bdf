//! Capped doubling backoff.

use std::time::Duration;

/// Delay sequence `base, 2*base, 4*base, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            next: base.min(max),
            max,
        }
    }

    /// A backoff that always waits `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Return the current delay and advance to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.max);
        delay
    }

    /// Next delay, shortened so `waited + delay` does not pass `budget`.
    pub fn next_delay_within(&mut self, waited: Duration, budget: Duration) -> Duration {
        self.next_delay().min(budget.saturating_sub(waited))
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Delays never exceed the cap and never shrink.
        #[test]
        fn prop_delays_monotonic_and_capped(
            base in 1u64..1_000,
            cap_extra in 0u64..10_000,
            steps in 1usize..20,
        ) {
            let max = Duration::from_millis(base + cap_extra);
            let mut backoff = Backoff::new(Duration::from_millis(base), max);
            let mut previous = Duration::ZERO;
            for _ in 0..steps {
                let delay = backoff.next_delay();
                prop_assert!(delay <= max);
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
