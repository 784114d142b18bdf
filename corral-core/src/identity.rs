//! Identity types for lock holders

use chrono::{DateTime, Utc};
use std::cell::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identity of a cluster node. This is the `owner` column of a lock row.
pub type NodeId = String;

/// Generate a fresh node identity (UUIDv7, timestamp-sortable).
pub fn new_node_id() -> NodeId {
    Uuid::now_v7().to_string()
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: OnceCell<u64> = const { OnceCell::new() };
}

/// The calling thread as seen by the lock service.
///
/// `std::thread::ThreadId` has no stable integer form, so each OS thread gets
/// a process-unique number the first time it asks. The number never changes
/// for the life of the thread and is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadIdentity {
    pub id: u64,
    pub name: String,
}

impl ThreadIdentity {
    /// Identity of the current thread.
    pub fn current() -> Self {
        let id = THREAD_ID.with(|cell| {
            *cell.get_or_init(|| NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
        });
        let name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Self { id, name }
    }

    /// Integer id of the current thread.
    pub fn current_id() -> u64 {
        Self::current().id
    }
}

impl fmt::Display for ThreadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_is_stable_within_thread() {
        let first = ThreadIdentity::current();
        let second = ThreadIdentity::current();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_thread_ids_differ_across_threads() {
        let here = ThreadIdentity::current_id();
        let there = std::thread::spawn(ThreadIdentity::current_id)
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_thread_name_is_captured() {
        let name = std::thread::Builder::new()
            .name("lock-worker".to_string())
            .spawn(|| ThreadIdentity::current().name)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "lock-worker");
    }

    #[test]
    fn test_node_ids_are_unique() {
        assert_ne!(new_node_id(), new_node_id());
    }
}
