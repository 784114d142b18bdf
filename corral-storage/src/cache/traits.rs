//! Cache loader trait and statistics.

use corral_core::CorralResult;

/// Produces a complete snapshot for a [`VersioningCache`](super::VersioningCache).
///
/// Every call builds a new value from the authoritative source. The cache
/// never hands a partially built value to readers.
pub trait CacheLoader: Send + Sync {
    type Value: Send + Sync;

    fn load(&self) -> CorralResult<Self::Value>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh snapshot.
    pub hits: u64,
    /// Reads that ran the loader.
    pub loads: u64,
    /// Reads served the prior snapshot while another thread reloaded.
    pub dirty_reads: u64,
    pub load_failures: u64,
}

impl CacheStats {
    /// Fraction of reads that did not wait on the loader (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.loads + self.dirty_reads;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.dirty_reads) as f64 / total as f64
        }
    }
}
