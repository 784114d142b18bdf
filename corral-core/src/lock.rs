//! Lock records as persisted in the lock table.
//!
//! The presence of a row for a `(category, key)` pair *is* the lock. A record
//! is created by a successful conditional insert and destroyed by an
//! owner-scoped or forced delete.
//!
//! # State Transitions (one node's view)
//!
//! ```text
//! Unheld ── acquire ──→ HeldByMe ── unlock / force_unlock ──→ Unheld
//!   │
//!   └── acquire (contended) ──→ Waiting ──→ Unheld (timeout)
//!                                  ├──→ HeldByMe (holder released)
//!                                  └──→ error (reentrancy detected)
//! ```

use crate::identity::{ThreadIdentity, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Composite id used by the local lock mirror.
pub fn local_lock_id(category: &str, key: &str) -> String {
    format!("category:{},key:{}", category, key)
}

/// A held lock, as stored in the lock table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockRecord {
    /// Namespace of the key (one per subsystem).
    pub category: String,
    pub key: String,
    /// Node identity of the holder.
    pub owner: String,
    pub thread_id: u64,
    pub thread_name: String,
    pub acquired_at: Timestamp,
}

impl LockRecord {
    /// Build a record stamped with the current thread and time.
    pub fn for_current_thread(
        category: impl Into<String>,
        key: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let thread = ThreadIdentity::current();
        Self {
            category: category.into(),
            key: key.into(),
            owner: owner.into(),
            thread_id: thread.id,
            thread_name: thread.name,
            acquired_at: Utc::now(),
        }
    }

    /// Re-stamp the acquisition time. Called right before each insert attempt
    /// so the lease is measured from the actual acquisition.
    pub fn touch(&mut self) {
        self.acquired_at = Utc::now();
    }

    /// Key of this record in the local mirror.
    pub fn local_id(&self) -> String {
        local_lock_id(&self.category, &self.key)
    }

    /// True if the record was acquired strictly before `cutoff`.
    pub fn is_older_than(&self, cutoff: Timestamp) -> bool {
        self.acquired_at < cutoff
    }

    /// Age of the lease at `now`; zero if the clock went backwards.
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// True if `owner` and `thread_id` identify the holder of this record.
    pub fn is_held_by(&self, owner: &str, thread_id: u64) -> bool {
        self.owner == owner && self.thread_id == thread_id
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "category: '{}' key: '{}' owner: '{}' thread id: '{}' thread name: '{}'",
            self.category, self.key, self.owner, self.thread_id, self.thread_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> LockRecord {
        LockRecord::for_current_thread("upload", "repo/path/a.jar", "node-a")
    }

    #[test]
    fn test_local_id_format() {
        let record = make_record();
        assert_eq!(record.local_id(), "category:upload,key:repo/path/a.jar");
        assert_eq!(record.local_id(), local_lock_id("upload", "repo/path/a.jar"));
    }

    #[test]
    fn test_record_is_stamped_with_current_thread() {
        let record = make_record();
        assert_eq!(record.thread_id, ThreadIdentity::current_id());
        assert!(record.is_held_by("node-a", ThreadIdentity::current_id()));
        assert!(!record.is_held_by("node-b", ThreadIdentity::current_id()));
    }

    #[test]
    fn test_touch_moves_acquired_at_forward() {
        let mut record = make_record();
        record.acquired_at = Utc::now() - chrono::Duration::minutes(10);
        let before = record.acquired_at;
        record.touch();
        assert!(record.acquired_at > before);
    }

    #[test]
    fn test_is_older_than() {
        let mut record = make_record();
        let now = Utc::now();
        record.acquired_at = now - chrono::Duration::minutes(61);
        assert!(record.is_older_than(now - chrono::Duration::minutes(60)));
        assert!(!record.is_older_than(now - chrono::Duration::minutes(62)));
    }

    #[test]
    fn test_age_clamps_future_timestamps() {
        let mut record = make_record();
        let now = Utc::now();
        record.acquired_at = now + chrono::Duration::seconds(5);
        assert_eq!(record.age(now), Duration::ZERO);
    }
}
