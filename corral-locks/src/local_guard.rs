//! In-process lock guards for single-node deployments.
//!
//! Same contract as the DB-backed guards: locks are bound to the acquiring
//! thread, reentrant acquisition is an error, and contention surfaces as
//! `Ok(false)`. Waiters park on a condition variable instead of polling.

use crate::guard::{ConflictGuard, ConflictsGuard};
use corral_core::{CorralError, CorralResult, LockError, StorageError, ThreadIdentity};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Keys held in one category, with the holding thread.
#[derive(Debug, Default)]
pub struct LocalLockPool {
    held: Mutex<HashMap<String, ThreadIdentity>>,
    released: Condvar,
}

impl LocalLockPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> CorralResult<MutexGuard<'_, HashMap<String, ThreadIdentity>>> {
        self.held
            .lock()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
    }

    fn acquire(&self, category: &str, key: &str, timeout: Duration) -> CorralResult<bool> {
        let me = ThreadIdentity::current();
        // No deadline when the timeout does not fit in an Instant.
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held()?;

        loop {
            match held.get(key) {
                None => {
                    held.insert(key.to_string(), me);
                    return Ok(true);
                }
                Some(holder) if holder.id == me.id => {
                    tracing::error!(
                        category,
                        key,
                        thread_id = me.id,
                        thread_name = %me.name,
                        "Reentrant lock acquisition rejected"
                    );
                    return Err(LockError::Reentrant {
                        category: category.to_string(),
                        key: key.to_string(),
                        owner: "local".to_string(),
                        thread: me.to_string(),
                    }
                    .into());
                }
                Some(_) => {}
            }

            held = match deadline {
                None => self
                    .released
                    .wait(held)
                    .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(
                            category,
                            key,
                            thread_id = me.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Timed out waiting for lock"
                        );
                        return Ok(false);
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?
                        .0
                }
            };
        }
    }

    fn release(&self, category: &str, key: &str) -> CorralResult<bool> {
        let me = ThreadIdentity::current();
        let mut held = self.held()?;
        match held.get(key) {
            None => Ok(false),
            Some(holder) if holder.id == me.id => {
                held.remove(key);
                self.released.notify_all();
                Ok(true)
            }
            Some(holder) => {
                tracing::error!(
                    category,
                    key,
                    thread_id = me.id,
                    holder_thread_id = holder.id,
                    "Unlock attempted by a thread that does not hold the lock"
                );
                Err(LockError::OwnershipViolation {
                    category: category.to_string(),
                    key: key.to_string(),
                    holder_thread: holder.id,
                    caller_thread: me.id,
                }
                .into())
            }
        }
    }

    fn force_release(&self, key: &str) -> CorralResult<bool> {
        let removed = self.held()?.remove(key).is_some();
        if removed {
            self.released.notify_all();
        }
        Ok(removed)
    }

    fn is_held(&self, key: &str) -> CorralResult<bool> {
        Ok(self.held()?.contains_key(key))
    }
}

/// In-process keyspace guard.
#[derive(Debug, Clone)]
pub struct LocalConflictsGuard {
    category: String,
    pool: Arc<LocalLockPool>,
}

impl LocalConflictsGuard {
    /// Guard with its own pool.
    pub fn new(category: impl Into<String>) -> Self {
        Self::with_pool(category, Arc::new(LocalLockPool::new()))
    }

    /// Guard over a pool shared with other guards of the same category.
    pub fn with_pool(category: impl Into<String>, pool: Arc<LocalLockPool>) -> Self {
        Self {
            category: category.into(),
            pool,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl ConflictsGuard for LocalConflictsGuard {
    fn try_to_lock(&self, key: &str, timeout: Duration) -> CorralResult<bool> {
        self.pool.acquire(&self.category, key, timeout)
    }

    fn unlock(&self, key: &str) -> CorralResult<bool> {
        self.pool.release(&self.category, key)
    }

    fn force_unlock(&self, key: &str) -> CorralResult<bool> {
        self.pool.force_release(key)
    }

    fn is_locked(&self, key: &str) -> CorralResult<bool> {
        self.pool.is_held(key)
    }

    fn size(&self) -> CorralResult<usize> {
        Ok(self.pool.held()?.len())
    }

    fn key_set(&self) -> CorralResult<HashSet<String>> {
        Ok(self.pool.held()?.keys().cloned().collect())
    }

    fn get_lock(&self, key: &str) -> Box<dyn ConflictGuard> {
        Box::new(LocalConflictGuard {
            category: self.category.clone(),
            key: key.to_string(),
            pool: Arc::clone(&self.pool),
        })
    }
}

/// In-process single-resource guard.
#[derive(Debug, Clone)]
pub struct LocalConflictGuard {
    category: String,
    key: String,
    pool: Arc<LocalLockPool>,
}

impl ConflictGuard for LocalConflictGuard {
    fn try_to_lock(&self, timeout: Duration) -> CorralResult<bool> {
        self.pool.acquire(&self.category, &self.key, timeout)
    }

    fn unlock(&self) -> CorralResult<bool> {
        self.pool.release(&self.category, &self.key)
    }

    fn force_unlock(&self) -> CorralResult<bool> {
        self.pool.force_release(&self.key)
    }

    fn is_locked(&self) -> CorralResult<bool> {
        self.pool.is_held(&self.key)
    }
}
