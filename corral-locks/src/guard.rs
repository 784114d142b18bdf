//! Lock guard adapters over the distributed lock service.
//!
//! A [`ConflictGuard`] protects one resource; a [`ConflictsGuard`] manages a
//! whole keyspace under one category. Contention surfaces as `Ok(false)`
//! from `try_to_lock`, not as an error.

use crate::service::DbLockService;
use corral_core::CorralResult;
use corral_storage::LockStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Guard for a single resource.
pub trait ConflictGuard: Send + Sync {
    /// Returns false if the lock could not be taken within `timeout`.
    fn try_to_lock(&self, timeout: Duration) -> CorralResult<bool>;

    fn unlock(&self) -> CorralResult<bool>;

    fn force_unlock(&self) -> CorralResult<bool>;

    fn is_locked(&self) -> CorralResult<bool>;
}

/// Guard for every key in one category.
pub trait ConflictsGuard: Send + Sync {
    /// Returns false if the lock could not be taken within `timeout`.
    fn try_to_lock(&self, key: &str, timeout: Duration) -> CorralResult<bool>;

    fn unlock(&self, key: &str) -> CorralResult<bool>;

    fn force_unlock(&self, key: &str) -> CorralResult<bool>;

    fn is_locked(&self, key: &str) -> CorralResult<bool>;

    /// Number of held keys.
    fn size(&self) -> CorralResult<usize>;

    fn key_set(&self) -> CorralResult<HashSet<String>>;

    /// Single-resource guard for `key` bound to this guard's category.
    fn get_lock(&self, key: &str) -> Box<dyn ConflictGuard>;
}

/// Map a timeout to `Ok(false)`; everything else passes through.
fn timeout_as_false(
    result: CorralResult<()>,
    category: &str,
    key: &str,
    owner: &str,
    timeout: Duration,
) -> CorralResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_timeout() => {
            tracing::warn!(
                category,
                key,
                owner,
                timeout_ms = timeout.as_millis() as u64,
                "Timed out waiting for lock"
            );
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// DB-BACKED GUARDS
// ============================================================================

/// Single-resource guard backed by the lock store.
#[derive(Debug)]
pub struct DbConflictGuard<S: LockStore> {
    service: Arc<DbLockService<S>>,
    category: String,
    key: String,
    owner: String,
}

impl<S: LockStore> DbConflictGuard<S> {
    /// Guard owned by the service's node.
    pub fn new(
        service: Arc<DbLockService<S>>,
        category: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let owner = service.node_id().clone();
        Self::with_owner(service, category, key, owner)
    }

    pub fn with_owner(
        service: Arc<DbLockService<S>>,
        category: impl Into<String>,
        key: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            service,
            category: category.into(),
            key: key.into(),
            owner: owner.into(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if the calling thread holds this lock on this node.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.service.is_locked_by_me(&self.category, &self.key)
    }
}

impl<S: LockStore> ConflictGuard for DbConflictGuard<S> {
    fn try_to_lock(&self, timeout: Duration) -> CorralResult<bool> {
        let result = self
            .service
            .acquire_lock(&self.category, &self.key, &self.owner, timeout);
        timeout_as_false(result, &self.category, &self.key, &self.owner, timeout)
    }

    fn unlock(&self) -> CorralResult<bool> {
        self.service.unlock(&self.category, &self.key, &self.owner)
    }

    fn force_unlock(&self) -> CorralResult<bool> {
        self.service.force_unlock(&self.category, &self.key)
    }

    fn is_locked(&self) -> CorralResult<bool> {
        self.service.is_locked(&self.category, &self.key)
    }
}

/// Keyspace guard backed by the lock store.
#[derive(Debug)]
pub struct DbConflictsGuard<S: LockStore> {
    service: Arc<DbLockService<S>>,
    category: String,
    owner: String,
}

impl<S: LockStore> DbConflictsGuard<S> {
    /// Guard owned by the service's node.
    pub fn new(service: Arc<DbLockService<S>>, category: impl Into<String>) -> Self {
        let owner = service.node_id().clone();
        Self::with_owner(service, category, owner)
    }

    pub fn with_owner(
        service: Arc<DbLockService<S>>,
        category: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            service,
            category: category.into(),
            owner: owner.into(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl<S: LockStore + 'static> ConflictsGuard for DbConflictsGuard<S> {
    fn try_to_lock(&self, key: &str, timeout: Duration) -> CorralResult<bool> {
        let result = self
            .service
            .acquire_lock(&self.category, key, &self.owner, timeout);
        timeout_as_false(result, &self.category, key, &self.owner, timeout)
    }

    fn unlock(&self, key: &str) -> CorralResult<bool> {
        self.service.unlock(&self.category, key, &self.owner)
    }

    fn force_unlock(&self, key: &str) -> CorralResult<bool> {
        self.service.force_unlock(&self.category, key)
    }

    fn is_locked(&self, key: &str) -> CorralResult<bool> {
        self.service.is_locked(&self.category, key)
    }

    fn size(&self) -> CorralResult<usize> {
        self.service.locking_map_size(&self.category)
    }

    fn key_set(&self) -> CorralResult<HashSet<String>> {
        self.service.locking_map_key_set(&self.category)
    }

    fn get_lock(&self, key: &str) -> Box<dyn ConflictGuard> {
        Box::new(DbConflictGuard::with_owner(
            Arc::clone(&self.service),
            self.category.clone(),
            key,
            self.owner.clone(),
        ))
    }
}
