//! CORRAL Storage - Store Contracts and Implementations
//!
//! Defines the lock record store and ACL store abstractions, with in-memory
//! implementations for tests and SQLite implementations for shared use by
//! several nodes. Also hosts the bounded-staleness cache.

pub mod acl_store;
pub mod cache;
pub mod lock_store;
pub mod sqlite;

pub use acl_store::{AclSource, AclStore, InMemoryAclStore};
pub use cache::{CacheLoader, CacheRead, CacheStats, Generation, ReadKind, VersioningCache};
pub use lock_store::{InMemoryLockStore, LockStore};
pub use sqlite::{SqliteAclStore, SqliteLockStore};
