//! Generation counter for cache invalidation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point in a cache's invalidation history.
///
/// Generations are monotonically increasing. A snapshot stamped with an
/// older generation than the counter's current one is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// The generation a fresh counter starts at.
    pub const INITIAL: Generation = Generation(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Check if this generation is at least as recent as another.
    pub fn is_at_least(&self, other: Generation) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared, thread-safe generation counter for one cache instance.
#[derive(Debug)]
pub struct GenerationCounter {
    value: AtomicU64,
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(Generation::INITIAL.0),
        }
    }
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        Generation(self.value.load(Ordering::Acquire))
    }

    /// Advance the counter and return the new generation.
    pub fn promote(&self) -> Generation {
        Generation(self.value.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_starts_at_initial() {
        assert_eq!(GenerationCounter::new().current(), Generation::INITIAL);
    }

    #[test]
    fn test_promote_returns_new_value() {
        let counter = GenerationCounter::new();
        let next = counter.promote();
        assert_eq!(next.value(), 2);
        assert_eq!(counter.current(), next);
        assert!(next.is_at_least(Generation::INITIAL));
        assert!(!Generation::INITIAL.is_at_least(next));
    }

    #[test]
    fn test_concurrent_promotions_are_not_lost() {
        let counter = Arc::new(GenerationCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.promote();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.current().value(), 1 + 8 * 100);
    }
}
