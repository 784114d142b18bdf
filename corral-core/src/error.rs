//! Error types for CORRAL operations

use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Query {operation} failed: {reason}")]
    Query { operation: String, reason: String },

    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Injected failure in {operation}")]
    Injected { operation: String },
}

impl StorageError {
    /// Build a query error for the named store operation.
    pub fn query(operation: &str, reason: impl ToString) -> Self {
        StorageError::Query {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out after {waited:?} acquiring lock category: '{category}' key: '{key}' owner: '{owner}'")]
    Timeout {
        category: String,
        key: String,
        owner: String,
        waited: Duration,
    },

    #[error("Reentrant lock is not supported: category: '{category}' key: '{key}' owner: '{owner}' thread: {thread}")]
    Reentrant {
        category: String,
        key: String,
        owner: String,
        thread: String,
    },

    #[error("Current thread {caller_thread} is not the owner of lock category: '{category}' key: '{key}' (held by thread {holder_thread})")]
    OwnershipViolation {
        category: String,
        key: String,
        holder_thread: u64,
        caller_thread: u64,
    },

    #[error("Store failure for lock category: '{category}' key: '{key}' owner: {owner:?}: {source}")]
    Store {
        category: String,
        key: String,
        owner: Option<String>,
        source: StorageError,
    },
}

/// Access control errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AclError {
    #[error("Could not create ACL. Permission target already exists: {name}")]
    PermissionTargetExists { name: String },

    #[error("Could not update ACL with non existent permission target: {name}")]
    PermissionTargetNotFound { name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported locking provider: {name}")]
    UnsupportedProvider { name: String },
}

/// Master error type for all CORRAL errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorralError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("ACL error: {0}")]
    Acl(#[from] AclError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CorralError {
    /// Acquisition ran out of time. Expected under contention.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CorralError::Lock(LockError::Timeout { .. }))
    }

    pub fn is_reentrancy_violation(&self) -> bool {
        matches!(self, CorralError::Lock(LockError::Reentrant { .. }))
    }

    pub fn is_ownership_violation(&self) -> bool {
        matches!(self, CorralError::Lock(LockError::OwnershipViolation { .. }))
    }
}

/// Result type alias for CORRAL operations.
pub type CorralResult<T> = Result<T, CorralError>;

// =============================================================================
// TESTS
// =============================================================================
