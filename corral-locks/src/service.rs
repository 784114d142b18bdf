//! Distributed lock service over a shared lock store.
//!
//! A lock is a row in the store. Acquisition is a conditional insert retried
//! with capped doubling backoff until the caller's timeout runs out. Release
//! is an owner-scoped delete with a small retry budget. A [`LocalLockTable`]
//! mirrors the rows this node inserted so that thread ownership can be
//! checked without a store round trip.

use crate::backoff::Backoff;
use crate::local::{LocalLockTable, LocalRelease};
use chrono::{DateTime, Utc};
use corral_core::{
    CorralError, CorralResult, LockConfig, LockError, LockRecord, NodeId, ThreadIdentity,
    Timestamp,
};
use corral_storage::LockStore;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Lock service for one node.
///
/// Each instance owns its local mirror; several instances sharing one store
/// behave as several cluster nodes.
#[derive(Debug)]
pub struct DbLockService<S: LockStore> {
    store: S,
    config: LockConfig,
    local: LocalLockTable,
}

impl<S: LockStore> DbLockService<S> {
    pub fn new(store: S, config: LockConfig) -> Self {
        Self {
            store,
            config,
            local: LocalLockTable::new(),
        }
    }

    /// Identity this node writes as the lock owner.
    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn local_locks(&self) -> &LocalLockTable {
        &self.local
    }

    /// Acquire `(category, key)` for `owner` and the calling thread, waiting
    /// up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] when the row is still taken once `timeout` has elapsed
    /// - [`LockError::Reentrant`] when the calling thread already holds the lock
    /// - [`LockError::Store`] on any store failure; these are not retried
    pub fn acquire_lock(
        &self,
        category: &str,
        key: &str,
        owner: &str,
        timeout: Duration,
    ) -> CorralResult<()> {
        let started = Instant::now();
        let mut backoff = Backoff::new(
            self.config.acquire_base_delay,
            self.config.acquire_max_delay,
        );
        let mut record = LockRecord::for_current_thread(category, key, owner);

        tracing::debug!(
            category,
            key,
            owner,
            thread_id = record.thread_id,
            thread_name = %record.thread_name,
            timeout_ms = timeout.as_millis() as u64,
            "Acquiring lock"
        );

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            record.touch();

            let inserted = self
                .store
                .try_insert_if_absent(&record)
                .map_err(|e| self.store_failure(&record, e))?;
            if inserted {
                self.local.insert(record.clone());
                tracing::debug!(
                    category,
                    key,
                    owner,
                    thread_id = record.thread_id,
                    thread_name = %record.thread_name,
                    attempts,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Lock acquired"
                );
                return Ok(());
            }

            let holder = self
                .store
                .find(category, key)
                .map_err(|e| self.store_failure(&record, e))?;
            if let Some(holder) = holder {
                if holder.is_held_by(owner, record.thread_id) {
                    tracing::error!(
                        category,
                        key,
                        owner,
                        thread_id = record.thread_id,
                        thread_name = %record.thread_name,
                        "Reentrant lock acquisition rejected"
                    );
                    return Err(LockError::Reentrant {
                        category: category.to_string(),
                        key: key.to_string(),
                        owner: owner.to_string(),
                        thread: format!("{} ({})", record.thread_id, record.thread_name),
                    }
                    .into());
                }
            }

            let waited = started.elapsed();
            if timeout.is_zero() || waited >= timeout {
                tracing::debug!(
                    category,
                    key,
                    owner,
                    thread_id = record.thread_id,
                    thread_name = %record.thread_name,
                    attempts,
                    waited_ms = waited.as_millis() as u64,
                    "Lock acquisition timed out"
                );
                return Err(LockError::Timeout {
                    category: category.to_string(),
                    key: key.to_string(),
                    owner: owner.to_string(),
                    waited,
                }
                .into());
            }

            let delay = backoff.next_delay_within(waited, timeout);
            tracing::trace!(
                category,
                key,
                owner,
                thread_id = record.thread_id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Lock taken, backing off"
            );
            std::thread::sleep(delay);
        }
    }

    /// True if anyone in the cluster holds `(category, key)`.
    pub fn is_locked(&self, category: &str, key: &str) -> CorralResult<bool> {
        if self.local.contains(category, key) {
            return Ok(true);
        }
        let found = self
            .store
            .find(category, key)
            .map_err(|e| wrap_store_error(category, key, None, e))?;
        Ok(found.is_some())
    }

    /// True if the calling thread holds `(category, key)` on this node.
    /// Local only.
    pub fn is_locked_by_me(&self, category: &str, key: &str) -> bool {
        self.local
            .is_held_by_thread(category, key, ThreadIdentity::current_id())
    }

    /// Release `(category, key)` if `owner` still holds the row.
    ///
    /// # Errors
    ///
    /// - [`LockError::OwnershipViolation`] when another local thread holds the lock
    /// - [`LockError::Store`] when the delete still fails after the retry budget
    pub fn unlock(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool> {
        let thread = ThreadIdentity::current();

        if let LocalRelease::HeldByOtherThread(holder) =
            self.local.release_for_thread(category, key, thread.id)
        {
            tracing::error!(
                category,
                key,
                owner,
                thread_id = thread.id,
                thread_name = %thread.name,
                holder_thread_id = holder.thread_id,
                holder_thread_name = %holder.thread_name,
                "Unlock attempted by a thread that does not hold the lock"
            );
            return Err(LockError::OwnershipViolation {
                category: category.to_string(),
                key: key.to_string(),
                holder_thread: holder.thread_id,
                caller_thread: thread.id,
            }
            .into());
        }

        let removed = self.delete_with_retry(category, key, Some(owner), || {
            self.store.delete_if_owner(category, key, owner)
        })?;

        tracing::debug!(
            category,
            key,
            owner,
            thread_id = thread.id,
            thread_name = %thread.name,
            removed,
            "Lock released"
        );
        Ok(removed)
    }

    /// Release `(category, key)` whoever holds it. For administrative and
    /// cleanup paths only.
    pub fn force_unlock(&self, category: &str, key: &str) -> CorralResult<bool> {
        let removed_local = self.local.remove(category, key).is_some();
        let removed_db = self.delete_with_retry(category, key, None, || {
            self.store.delete_unconditional(category, key)
        })?;

        tracing::debug!(
            category,
            key,
            removed_local,
            removed_db,
            "Lock force released"
        );
        Ok(removed_local || removed_db)
    }

    /// Force-release every stored lock whose lease exceeded the maximum.
    /// Per-record failures are logged and skipped. Returns the number released.
    pub fn clean_db_expired_locks(&self) -> CorralResult<usize> {
        let cutoff = expiry_cutoff(self.config.max_lease_time);
        let expired = self
            .store
            .find_older_than(cutoff)
            .map_err(|e| wrap_store_error("*", "*", None, e))?;

        let mut released = 0;
        for record in expired {
            match self.force_unlock(&record.category, &record.key) {
                Ok(true) => {
                    released += 1;
                    tracing::debug!(
                        category = %record.category,
                        key = %record.key,
                        owner = %record.owner,
                        thread_id = record.thread_id,
                        thread_name = %record.thread_name,
                        acquired_at = %record.acquired_at,
                        "Released expired lock"
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        category = %record.category,
                        key = %record.key,
                        owner = %record.owner,
                        thread_id = record.thread_id,
                        thread_name = %record.thread_name,
                        error = %e,
                        "Failed to release expired lock"
                    );
                }
            }
        }
        Ok(released)
    }

    /// Drop expired entries from the local mirror only. Returns the number dropped.
    pub fn clean_cached_expired_locks(&self) -> usize {
        let cutoff = expiry_cutoff(self.config.max_lease_time);
        let removed = self.local.remove_older_than(cutoff);
        for record in &removed {
            tracing::debug!(
                category = %record.category,
                key = %record.key,
                owner = %record.owner,
                thread_id = record.thread_id,
                thread_name = %record.thread_name,
                "Dropped expired local lock entry"
            );
        }
        removed.len()
    }

    /// Startup recovery: delete every row this node owned before it restarted.
    /// Store failures are logged, not raised. Returns the number deleted.
    pub fn init(&self) -> usize {
        self.local.clear();
        match self.store.delete_all_owned_by(self.node_id()) {
            Ok(deleted) => {
                tracing::info!(
                    owner = %self.node_id(),
                    deleted,
                    "Removed locks left by a previous run"
                );
                deleted
            }
            Err(e) => {
                tracing::warn!(
                    owner = %self.node_id(),
                    error = %e,
                    "Failed to remove locks left by a previous run"
                );
                0
            }
        }
    }

    /// Shutdown: force-release every row this node owns. Safe to call twice.
    pub fn destroy(&self) -> CorralResult<usize> {
        let owned = self
            .store
            .find_all_owned_by(self.node_id())
            .map_err(|e| wrap_store_error("*", "*", Some(self.node_id()), e))?;

        let mut released = 0;
        for record in owned {
            match self.force_unlock(&record.category, &record.key) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(
                    category = %record.category,
                    key = %record.key,
                    owner = %record.owner,
                    error = %e,
                    "Failed to release lock on shutdown"
                ),
            }
        }
        self.local.clear();

        tracing::info!(owner = %self.node_id(), released, "Lock service destroyed");
        Ok(released)
    }

    /// Number of locks held in `category` across the cluster.
    pub fn locking_map_size(&self, category: &str) -> CorralResult<usize> {
        self.store
            .count_by_category(category)
            .map_err(|e| wrap_store_error(category, "*", None, e))
    }

    /// Keys held in `category` across the cluster.
    pub fn locking_map_key_set(&self, category: &str) -> CorralResult<HashSet<String>> {
        self.store
            .keys_by_category(category)
            .map_err(|e| wrap_store_error(category, "*", None, e))
    }

    /// Run a delete, retrying on error or on "nothing deleted" with capped
    /// doubling backoff. Fails only if the last attempt errored.
    fn delete_with_retry<F>(
        &self,
        category: &str,
        key: &str,
        owner: Option<&str>,
        delete: F,
    ) -> CorralResult<bool>
    where
        F: Fn() -> CorralResult<bool>,
    {
        let attempts = self.config.unlock_retries.saturating_add(1);
        let mut backoff = Backoff::new(self.config.unlock_base_delay, self.config.unlock_max_delay);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match delete() {
                Ok(true) => return Ok(true),
                Ok(false) => last_error = None,
                Err(e) => {
                    tracing::trace!(
                        category,
                        key,
                        owner,
                        attempt,
                        error = %e,
                        "Lock delete failed"
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                std::thread::sleep(backoff.next_delay());
            }
        }

        match last_error {
            Some(e) => {
                tracing::error!(
                    category,
                    key,
                    owner,
                    attempts,
                    error = %e,
                    "Lock delete failed after retries"
                );
                Err(wrap_store_error(category, key, owner, e))
            }
            None => Ok(false),
        }
    }

    fn store_failure(&self, record: &LockRecord, error: CorralError) -> CorralError {
        tracing::error!(
            category = %record.category,
            key = %record.key,
            owner = %record.owner,
            thread_id = record.thread_id,
            thread_name = %record.thread_name,
            error = %error,
            "Lock store failure while acquiring"
        );
        wrap_store_error(&record.category, &record.key, Some(&record.owner), error)
    }
}

/// Attach lock identity to a storage failure. Other errors pass through.
fn wrap_store_error(
    category: &str,
    key: &str,
    owner: Option<&str>,
    error: CorralError,
) -> CorralError {
    match error {
        CorralError::Storage(source) => CorralError::Lock(LockError::Store {
            category: category.to_string(),
            key: key.to_string(),
            owner: owner.map(str::to_string),
            source,
        }),
        other => other,
    }
}

/// Leases acquired before this instant have expired.
fn expiry_cutoff(max_lease: Duration) -> Timestamp {
    let now = Utc::now();
    chrono::Duration::from_std(max_lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use corral_storage::InMemoryLockStore;
    use std::sync::Arc;

    fn fast_config(node: &str) -> LockConfig {
        LockConfig::for_node(node)
            .with_acquire_backoff(Duration::from_millis(1), Duration::from_millis(8))
            .with_unlock_retries(2, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn node(store: &Arc<InMemoryLockStore>, name: &str) -> DbLockService<Arc<InMemoryLockStore>> {
        DbLockService::new(Arc::clone(store), fast_config(name))
    }

    #[test]
    fn test_acquire_then_unlock() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");

        a.acquire_lock("upload", "a.jar", "node-a", Duration::from_millis(100))
            .unwrap();
        assert!(a.is_locked("upload", "a.jar").unwrap());
        assert!(a.is_locked_by_me("upload", "a.jar"));
        assert_eq!(a.locking_map_size("upload").unwrap(), 1);

        assert!(a.unlock("upload", "a.jar", "node-a").unwrap());
        assert!(!a.is_locked("upload", "a.jar").unwrap());
        assert!(!a.is_locked_by_me("upload", "a.jar"));
    }

    #[test]
    fn test_reentrant_acquire_fails_fast() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        a.acquire_lock("upload", "a.jar", "node-a", Duration::from_millis(100))
            .unwrap();

        let started = Instant::now();
        let err = a
            .acquire_lock("upload", "a.jar", "node-a", Duration::from_secs(10))
            .unwrap_err();
        assert!(err.is_reentrancy_violation());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_timeout_tries_once() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        let b = node(&store, "node-b");
        a.acquire_lock("upload", "a.jar", "node-a", Duration::ZERO).unwrap();

        let err = b
            .acquire_lock("upload", "a.jar", "node-b", Duration::ZERO)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_unlock_by_other_thread_is_ownership_violation() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = Arc::new(node(&store, "node-a"));
        a.acquire_lock("upload", "a.jar", "node-a", Duration::from_millis(100))
            .unwrap();

        let other = Arc::clone(&a);
        let err = std::thread::spawn(move || other.unlock("upload", "a.jar", "node-a"))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(err.is_ownership_violation());
        assert!(a.is_locked_by_me("upload", "a.jar"));
        assert!(store.find("upload", "a.jar").unwrap().is_some());
    }

    #[test]
    fn test_unlock_with_wrong_owner_keeps_row() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        let b = node(&store, "node-b");
        a.acquire_lock("upload", "a.jar", "node-a", Duration::from_millis(100))
            .unwrap();

        assert!(!b.unlock("upload", "a.jar", "node-b").unwrap());
        assert!(a.is_locked("upload", "a.jar").unwrap());

        assert!(b.force_unlock("upload", "a.jar").unwrap());
        assert!(!b.is_locked("upload", "a.jar").unwrap());
    }

    #[test]
    fn test_force_unlock_clears_local_entry() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        a.acquire_lock("upload", "a.jar", "node-a", Duration::from_millis(100))
            .unwrap();

        assert!(a.force_unlock("upload", "a.jar").unwrap());
        assert!(a.local_locks().is_empty());
        assert!(!a.force_unlock("upload", "a.jar").unwrap());
    }

    #[test]
    fn test_clean_db_expired_locks_releases_old_leases() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = DbLockService::new(
            Arc::clone(&store),
            fast_config("node-a").with_max_lease_time(Duration::from_secs(60)),
        );

        let mut crashed = LockRecord::for_current_thread("upload", "old", "node-dead");
        crashed.acquired_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert_raw(crashed).unwrap();
        a.acquire_lock("upload", "young", "node-a", Duration::from_millis(100))
            .unwrap();

        assert_eq!(a.clean_db_expired_locks().unwrap(), 1);
        assert!(store.find("upload", "old").unwrap().is_none());
        assert!(store.find("upload", "young").unwrap().is_some());
    }

    #[test]
    fn test_clean_cached_expired_locks_is_local_only() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = DbLockService::new(
            Arc::clone(&store),
            fast_config("node-a").with_max_lease_time(Duration::from_secs(60)),
        );
        let mut stale = LockRecord::for_current_thread("upload", "old", "node-a");
        stale.acquired_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert_raw(stale.clone()).unwrap();
        a.local_locks().insert(stale);

        assert_eq!(a.clean_cached_expired_locks(), 1);
        assert!(a.local_locks().is_empty());
        assert!(store.find("upload", "old").unwrap().is_some());
    }

    #[test]
    fn test_init_removes_rows_from_previous_run() {
        let store = Arc::new(InMemoryLockStore::new());
        store
            .insert_raw(LockRecord::for_current_thread("upload", "a", "node-a"))
            .unwrap();
        store
            .insert_raw(LockRecord::for_current_thread("upload", "b", "node-b"))
            .unwrap();

        let a = node(&store, "node-a");
        assert_eq!(a.init(), 1);
        assert!(store.find("upload", "a").unwrap().is_none());
        assert!(store.find("upload", "b").unwrap().is_some());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        a.acquire_lock("upload", "a", "node-a", Duration::from_millis(100)).unwrap();
        a.acquire_lock("builds", "b", "node-a", Duration::from_millis(100)).unwrap();

        assert_eq!(a.destroy().unwrap(), 2);
        assert_eq!(a.destroy().unwrap(), 0);
        assert!(store.is_empty().unwrap());
        assert!(a.local_locks().is_empty());
    }

    #[test]
    fn test_key_set_spans_nodes() {
        let store = Arc::new(InMemoryLockStore::new());
        let a = node(&store, "node-a");
        let b = node(&store, "node-b");
        a.acquire_lock("upload", "x", "node-a", Duration::from_millis(100)).unwrap();
        b.acquire_lock("upload", "y", "node-b", Duration::from_millis(100)).unwrap();

        assert_eq!(
            a.locking_map_key_set("upload").unwrap(),
            HashSet::from(["x".to_string(), "y".to_string()])
        );
    }
}
