//! CORRAL Locks - Cluster-Wide Mutual Exclusion
//!
//! Locks are rows in a shared [`LockStore`](corral_storage::LockStore), keyed
//! by `(category, key)` and owned by a node and one of its threads.
//!
//! - [`DbLockService`]: acquire with timeout, owner-scoped release, expiry
//! - [`ConflictGuard`] / [`ConflictsGuard`]: `try_to_lock` style adapters
//! - [`LockingProvider`]: picks DB-backed or in-process guards from config
//! - [`lock_cleanup_task`]: periodic release of expired leases

pub mod backoff;
pub mod cleanup;
pub mod guard;
pub mod local;
pub mod local_guard;
pub mod provider;
pub mod service;

pub use backoff::Backoff;
pub use cleanup::{lock_cleanup_task, run_cleanup_cycle, LockCleanupMetrics, LockCleanupSnapshot};
pub use guard::{ConflictGuard, ConflictsGuard, DbConflictGuard, DbConflictsGuard};
pub use local::{LocalLockTable, LocalRelease};
pub use local_guard::{LocalConflictGuard, LocalConflictsGuard, LocalLockPool};
pub use provider::LockingProvider;
pub use service::DbLockService;
