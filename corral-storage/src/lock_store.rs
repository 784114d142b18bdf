//! Lock record store contract and in-memory implementation.

use corral_core::{CorralError, CorralResult, LockRecord, StorageError, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

// ============================================================================
// LOCK STORE TRAIT
// ============================================================================

/// Shared table of held locks, keyed by `(category, key)`.
///
/// The store is the only authority on who holds a lock. Implementations must
/// make [`try_insert_if_absent`](LockStore::try_insert_if_absent) atomic: of
/// any number of concurrent inserts for the same pair, exactly one succeeds.
pub trait LockStore: Send + Sync {
    /// Insert `record` unless a row for its `(category, key)` already exists.
    /// Returns false when the row is taken.
    fn try_insert_if_absent(&self, record: &LockRecord) -> CorralResult<bool>;

    /// Current holder of `(category, key)`, if any.
    fn find(&self, category: &str, key: &str) -> CorralResult<Option<LockRecord>>;

    /// Delete the row only if `owner` still holds it.
    fn delete_if_owner(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool>;

    /// Delete the row regardless of owner.
    fn delete_unconditional(&self, category: &str, key: &str) -> CorralResult<bool>;

    /// Delete every row held by `owner`. Returns the number removed.
    fn delete_all_owned_by(&self, owner: &str) -> CorralResult<usize>;

    /// Rows acquired strictly before `cutoff`.
    fn find_older_than(&self, cutoff: Timestamp) -> CorralResult<Vec<LockRecord>>;

    fn find_all_owned_by(&self, owner: &str) -> CorralResult<Vec<LockRecord>>;

    fn count_by_category(&self, category: &str) -> CorralResult<usize>;

    fn keys_by_category(&self, category: &str) -> CorralResult<HashSet<String>>;
}

impl<S: LockStore + ?Sized> LockStore for Arc<S> {
    fn try_insert_if_absent(&self, record: &LockRecord) -> CorralResult<bool> {
        (**self).try_insert_if_absent(record)
    }

    fn find(&self, category: &str, key: &str) -> CorralResult<Option<LockRecord>> {
        (**self).find(category, key)
    }

    fn delete_if_owner(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool> {
        (**self).delete_if_owner(category, key, owner)
    }

    fn delete_unconditional(&self, category: &str, key: &str) -> CorralResult<bool> {
        (**self).delete_unconditional(category, key)
    }

    fn delete_all_owned_by(&self, owner: &str) -> CorralResult<usize> {
        (**self).delete_all_owned_by(owner)
    }

    fn find_older_than(&self, cutoff: Timestamp) -> CorralResult<Vec<LockRecord>> {
        (**self).find_older_than(cutoff)
    }

    fn find_all_owned_by(&self, owner: &str) -> CorralResult<Vec<LockRecord>> {
        (**self).find_all_owned_by(owner)
    }

    fn count_by_category(&self, category: &str) -> CorralResult<usize> {
        (**self).count_by_category(category)
    }

    fn keys_by_category(&self, category: &str) -> CorralResult<HashSet<String>> {
        (**self).keys_by_category(category)
    }
}

// ============================================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================================

type LockKey = (String, String);

/// In-memory lock store for testing.
///
/// Several lock services sharing one `Arc<InMemoryLockStore>` behave like
/// cluster nodes sharing one database table.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    rows: RwLock<HashMap<LockKey, LockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across all categories.
    pub fn len(&self) -> CorralResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> CorralResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Put a row in place without the conditional check. Lets tests plant
    /// rows left behind by crashed nodes.
    pub fn insert_raw(&self, record: LockRecord) -> CorralResult<()> {
        let mut rows = self.write()?;
        rows.insert((record.category.clone(), record.key.clone()), record);
        Ok(())
    }

    fn read(
        &self,
    ) -> CorralResult<std::sync::RwLockReadGuard<'_, HashMap<LockKey, LockRecord>>> {
        self.rows
            .read()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
    }

    fn write(
        &self,
    ) -> CorralResult<std::sync::RwLockWriteGuard<'_, HashMap<LockKey, LockRecord>>> {
        self.rows
            .write()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
    }
}

fn lock_key(category: &str, key: &str) -> LockKey {
    (category.to_string(), key.to_string())
}

impl LockStore for InMemoryLockStore {
    fn try_insert_if_absent(&self, record: &LockRecord) -> CorralResult<bool> {
        let mut rows = self.write()?;
        let id = lock_key(&record.category, &record.key);
        if rows.contains_key(&id) {
            return Ok(false);
        }
        rows.insert(id, record.clone());
        Ok(true)
    }

    fn find(&self, category: &str, key: &str) -> CorralResult<Option<LockRecord>> {
        Ok(self.read()?.get(&lock_key(category, key)).cloned())
    }

    fn delete_if_owner(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool> {
        let mut rows = self.write()?;
        let id = lock_key(category, key);
        match rows.get(&id) {
            Some(record) if record.owner == owner => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_unconditional(&self, category: &str, key: &str) -> CorralResult<bool> {
        Ok(self.write()?.remove(&lock_key(category, key)).is_some())
    }

    fn delete_all_owned_by(&self, owner: &str) -> CorralResult<usize> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|_, record| record.owner != owner);
        Ok(before - rows.len())
    }

    fn find_older_than(&self, cutoff: Timestamp) -> CorralResult<Vec<LockRecord>> {
        Ok(self
            .read()?
            .values()
            .filter(|record| record.is_older_than(cutoff))
            .cloned()
            .collect())
    }

    fn find_all_owned_by(&self, owner: &str) -> CorralResult<Vec<LockRecord>> {
        Ok(self
            .read()?
            .values()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect())
    }

    fn count_by_category(&self, category: &str) -> CorralResult<usize> {
        Ok(self
            .read()?
            .keys()
            .filter(|(c, _)| c == category)
            .count())
    }

    fn keys_by_category(&self, category: &str) -> CorralResult<HashSet<String>> {
        Ok(self
            .read()?
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, k)| k.clone())
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
