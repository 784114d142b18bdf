//! In-process mirror of the locks this node holds.

use corral_core::{local_lock_id, LockRecord, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of a thread-scoped release from the local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRelease {
    /// The calling thread's entry was removed.
    Removed(LockRecord),
    Absent,
    /// Another thread holds the entry; it was left in place.
    HeldByOtherThread(LockRecord),
}

/// Concurrent map from `category:<c>,key:<k>` to the record this node
/// believes it holds. Never authoritative; the store is.
#[derive(Debug, Default)]
pub struct LocalLockTable {
    entries: DashMap<String, LockRecord>,
}

impl LocalLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: LockRecord) {
        self.entries.insert(record.local_id(), record);
    }

    pub fn get(&self, category: &str, key: &str) -> Option<LockRecord> {
        self.entries
            .get(&local_lock_id(category, key))
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, category: &str, key: &str) -> bool {
        self.entries.contains_key(&local_lock_id(category, key))
    }

    /// True if the entry exists and belongs to `thread_id`.
    pub fn is_held_by_thread(&self, category: &str, key: &str, thread_id: u64) -> bool {
        self.entries
            .get(&local_lock_id(category, key))
            .map(|entry| entry.thread_id == thread_id)
            .unwrap_or(false)
    }

    /// Remove the entry only if `thread_id` holds it.
    pub fn release_for_thread(&self, category: &str, key: &str, thread_id: u64) -> LocalRelease {
        match self.entries.entry(local_lock_id(category, key)) {
            Entry::Occupied(entry) => {
                if entry.get().thread_id == thread_id {
                    LocalRelease::Removed(entry.remove())
                } else {
                    LocalRelease::HeldByOtherThread(entry.get().clone())
                }
            }
            Entry::Vacant(_) => LocalRelease::Absent,
        }
    }

    /// Remove the entry whichever thread holds it.
    pub fn remove(&self, category: &str, key: &str) -> Option<LockRecord> {
        self.entries
            .remove(&local_lock_id(category, key))
            .map(|(_, record)| record)
    }

    /// Remove and return every entry acquired before `cutoff`.
    pub fn remove_older_than(&self, cutoff: Timestamp) -> Vec<LockRecord> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_older_than(cutoff))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                self.entries
                    .remove_if(&id, |_, record| record.is_older_than(cutoff))
                    .map(|(_, record)| record)
            })
            .collect()
    }

    /// Drop every entry. Returns how many there were.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
