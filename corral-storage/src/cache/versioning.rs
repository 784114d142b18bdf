//! Versioning cache: one snapshot, a staleness window and a generation.

use super::freshness::{CacheRead, ReadKind};
use super::generation::{Generation, GenerationCounter};
use super::traits::{CacheLoader, CacheStats};
use chrono::Utc;
use corral_core::{CorralError, CorralResult, StorageError, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

struct Snapshot<T> {
    value: Arc<T>,
    loaded_at: Timestamp,
    loaded_instant: Instant,
    generation: Generation,
}

impl<T> Snapshot<T> {
    fn within_window(&self, window: Duration) -> bool {
        self.loaded_instant.elapsed() < window
    }

    fn is_fresh(&self, window: Duration, current: Generation) -> bool {
        self.within_window(window) && self.generation.is_at_least(current)
    }

    fn read(&self, kind: ReadKind) -> CacheRead<Arc<T>> {
        CacheRead::new(Arc::clone(&self.value), self.loaded_at, self.generation, kind)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    loads: AtomicU64,
    dirty_reads: AtomicU64,
    load_failures: AtomicU64,
}

/// Read-through cache with bounded staleness and lazy invalidation.
///
/// Stale readers coalesce on a reload gate so only one of them runs the
/// loader. Readers that arrive while a reload is in flight and hold a
/// snapshot that is still young get that snapshot back instead of waiting.
pub struct VersioningCache<L: CacheLoader> {
    loader: L,
    staleness_window: Duration,
    generation: GenerationCounter,
    current: RwLock<Option<Arc<Snapshot<L::Value>>>>,
    reload_gate: Mutex<()>,
    counters: Counters,
}

impl<L: CacheLoader> VersioningCache<L> {
    pub fn new(loader: L, staleness_window: Duration) -> Self {
        Self {
            loader,
            staleness_window,
            generation: GenerationCounter::new(),
            current: RwLock::new(None),
            reload_gate: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    /// Current value, reloading first if the snapshot is stale.
    pub fn get(&self) -> CorralResult<Arc<L::Value>> {
        self.read().map(CacheRead::into_value)
    }

    /// Like [`get`](Self::get), with snapshot metadata.
    pub fn read(&self) -> CorralResult<CacheRead<Arc<L::Value>>> {
        if let Some(snapshot) = self.snapshot()? {
            if snapshot.is_fresh(self.staleness_window, self.generation.current()) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.read(ReadKind::Hit));
            }
        }

        let _gate = match self.reload_gate.try_lock() {
            Ok(gate) => gate,
            Err(TryLockError::WouldBlock) => {
                if let Some(snapshot) = self.snapshot()? {
                    if snapshot.within_window(self.staleness_window) {
                        self.counters.dirty_reads.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(
                            generation = %snapshot.generation,
                            "Reload in flight, serving prior snapshot"
                        );
                        return Ok(snapshot.read(ReadKind::Dirty));
                    }
                }
                self.reload_gate
                    .lock()
                    .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(CorralError::Storage(StorageError::LockPoisoned));
            }
        };

        // Another reader may have reloaded while we waited on the gate.
        let observed = self.generation.current();
        if let Some(snapshot) = self.snapshot()? {
            if snapshot.is_fresh(self.staleness_window, observed) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.read(ReadKind::Hit));
            }
        }

        let started = Instant::now();
        let value = match self.loader.load() {
            Ok(value) => value,
            Err(e) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(generation = %observed, error = %e, "Cache reload failed");
                return Err(e);
            }
        };

        let snapshot = Arc::new(Snapshot {
            value: Arc::new(value),
            loaded_at: Utc::now(),
            loaded_instant: Instant::now(),
            generation: observed,
        });
        *self
            .current
            .write()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))? =
            Some(Arc::clone(&snapshot));
        self.counters.loads.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            generation = %observed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache reloaded"
        );

        Ok(snapshot.read(ReadKind::Loaded))
    }

    /// Mark the snapshot stale. The reload happens on the next read.
    pub fn promote_db_version(&self) -> Generation {
        let generation = self.generation.promote();
        tracing::debug!(generation = %generation, "Cache generation promoted");
        generation
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.current()
    }

    /// When the current snapshot was built, if there is one.
    pub fn loaded_at(&self) -> CorralResult<Option<Timestamp>> {
        Ok(self.snapshot()?.map(|s| s.loaded_at))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            dirty_reads: self.counters.dirty_reads.load(Ordering::Relaxed),
            load_failures: self.counters.load_failures.load(Ordering::Relaxed),
        }
    }

    fn snapshot(&self) -> CorralResult<Option<Arc<Snapshot<L::Value>>>> {
        let guard = self
            .current
            .read()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?;
        Ok(guard.as_ref().map(Arc::clone))
    }
}

impl<L: CacheLoader + std::fmt::Debug> std::fmt::Debug for VersioningCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersioningCache")
            .field("loader", &self.loader)
            .field("staleness_window", &self.staleness_window)
            .field("generation", &self.generation.current())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
