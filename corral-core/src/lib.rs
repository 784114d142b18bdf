//! CORRAL Core - Shared Types
//!
//! Lock records, thread identity, the access control model, errors,
//! configuration and tracing setup. Every other CORRAL crate depends on this.

pub mod acl;
pub mod config;
pub mod error;
pub mod identity;
pub mod lock;
pub mod telemetry;

pub use acl::{AccessControlEntry, AccessControlList, PermissionMask, PermissionTarget};
pub use config::{CacheConfig, CorralConfig, LockConfig, LockingProviderType};
pub use error::{AclError, ConfigError, CorralError, CorralResult, LockError, StorageError};
pub use identity::{new_node_id, NodeId, ThreadIdentity, Timestamp};
pub use lock::{local_lock_id, LockRecord};
pub use telemetry::{init_tracing, LogFormat};
