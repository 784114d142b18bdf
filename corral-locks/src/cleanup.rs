//! Expired Lock Cleanup Background Task
//!
//! Leases that outlive their holder (crashed node, lost release) are removed
//! periodically. Each cycle:
//!
//! - releases expired rows in the shared store, on the primary node only
//! - drops expired entries from this node's local mirror, on every node
//!
//! Cycles run on tokio's blocking pool because the lock service is
//! synchronous. Failures are logged and counted; the task keeps going.

use crate::service::DbLockService;
use corral_storage::LockStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Shortest period the background task will tick at.
const MIN_CLEANUP_PERIOD: Duration = Duration::from_millis(1);

// ============================================================================
// METRICS
// ============================================================================

/// Counters for cleanup activity since the task started.
#[derive(Debug, Default)]
pub struct LockCleanupMetrics {
    pub cleanup_cycles: AtomicU64,
    /// Store rows force-released for exceeding the maximum lease.
    pub db_locks_released: AtomicU64,
    /// Local mirror entries dropped for exceeding the maximum lease.
    pub cached_locks_released: AtomicU64,
    pub cleanup_errors: AtomicU64,
}

impl LockCleanupMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> LockCleanupSnapshot {
        LockCleanupSnapshot {
            cleanup_cycles: self.cleanup_cycles.load(Ordering::Relaxed),
            db_locks_released: self.db_locks_released.load(Ordering::Relaxed),
            cached_locks_released: self.cached_locks_released.load(Ordering::Relaxed),
            cleanup_errors: self.cleanup_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cleanup metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockCleanupSnapshot {
    pub cleanup_cycles: u64,
    pub db_locks_released: u64,
    pub cached_locks_released: u64,
    pub cleanup_errors: u64,
}

// ============================================================================
// CYCLE
// ============================================================================

/// Run one cleanup cycle.
///
/// `is_primary` should be true on the primary node, and on any node when no
/// primary is running.
pub fn run_cleanup_cycle<S: LockStore>(
    service: &DbLockService<S>,
    is_primary: bool,
    metrics: &LockCleanupMetrics,
) {
    metrics.cleanup_cycles.fetch_add(1, Ordering::Relaxed);

    let mut db_released = 0;
    if is_primary {
        match service.clean_db_expired_locks() {
            Ok(released) => {
                db_released = released;
                metrics
                    .db_locks_released
                    .fetch_add(released as u64, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(
                    owner = %service.node_id(),
                    error = %e,
                    "Failed to clean expired locks from store"
                );
                metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let cached_released = service.clean_cached_expired_locks();
    metrics
        .cached_locks_released
        .fetch_add(cached_released as u64, Ordering::Relaxed);

    if db_released > 0 || cached_released > 0 {
        tracing::info!(
            owner = %service.node_id(),
            is_primary,
            db_released,
            cached_released,
            "Expired lock cleanup cycle completed"
        );
    } else {
        tracing::trace!(is_primary, "Expired lock cleanup cycle found nothing");
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that runs a cleanup cycle every `period` until the
/// shutdown signal is received.
///
/// `is_primary` is asked before each cycle, so a node that becomes primary
/// starts cleaning the store on its next tick. A zero `period` is raised
/// to one millisecond.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let period = service.config().cleanup_interval;
/// let handle = tokio::spawn(lock_cleanup_task(service, period, || true, shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn lock_cleanup_task<S, F>(
    service: Arc<DbLockService<S>>,
    period: Duration,
    is_primary: F,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<LockCleanupMetrics>
where
    S: LockStore + 'static,
    F: Fn() -> bool + Send + Sync + 'static,
{
    let metrics = Arc::new(LockCleanupMetrics::new());

    let period = period.max(MIN_CLEANUP_PERIOD);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        owner = %service.node_id(),
        interval_ms = period.as_millis() as u64,
        max_lease_secs = service.config().max_lease_time.as_secs(),
        "Lock cleanup task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Lock cleanup task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let primary = is_primary();
                let service = Arc::clone(&service);
                let cycle_metrics = Arc::clone(&metrics);
                let result = tokio::task::spawn_blocking(move || {
                    run_cleanup_cycle(&service, primary, &cycle_metrics)
                })
                .await;
                if let Err(e) = result {
                    tracing::error!(error = %e, "Lock cleanup cycle panicked");
                    metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cleanup_cycles = snapshot.cleanup_cycles,
        db_locks_released = snapshot.db_locks_released,
        cached_locks_released = snapshot.cached_locks_released,
        cleanup_errors = snapshot.cleanup_errors,
        "Lock cleanup task completed"
    );

    metrics
}
