//! Configuration types

use crate::error::{ConfigError, CorralError, CorralResult};
use crate::identity::{new_node_id, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_MAX_LEASE_SECS: u64 = 60 * 60;
pub const DEFAULT_ACQUIRE_BASE_DELAY_MS: u64 = 8;
pub const DEFAULT_ACQUIRE_MAX_DELAY_MS: u64 = 2048;
pub const DEFAULT_UNLOCK_RETRIES: u32 = 3;
pub const DEFAULT_UNLOCK_BASE_DELAY_MS: u64 = 4;
pub const DEFAULT_UNLOCK_MAX_DELAY_MS: u64 = 256;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ACL_STALENESS_SECS: u64 = 30;

// ============================================================================
// LOCKING PROVIDER
// ============================================================================

/// Which lock implementation guards hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockingProviderType {
    /// In-process locks; single-node deployments only.
    Jvm,
    /// Locks stored in the shared database.
    Db,
}

impl LockingProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockingProviderType::Jvm => "jvm",
            LockingProviderType::Db => "db",
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, LockingProviderType::Db)
    }
}

impl fmt::Display for LockingProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockingProviderType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jvm" => Ok(LockingProviderType::Jvm),
            "db" => Ok(LockingProviderType::Db),
            _ => Err(ConfigError::UnsupportedProvider {
                name: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// LOCK CONFIG
// ============================================================================

/// Tuning for the distributed lock service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Identity of this node; written as the owner of every lock it takes.
    pub node_id: NodeId,
    /// Leases older than this are released by expiry cleanup.
    pub max_lease_time: Duration,
    /// First wait between acquisition attempts.
    pub acquire_base_delay: Duration,
    /// Cap for the doubling acquisition wait.
    pub acquire_max_delay: Duration,
    /// Extra delete attempts after the first one fails.
    pub unlock_retries: u32,
    pub unlock_base_delay: Duration,
    pub unlock_max_delay: Duration,
    /// Period of the expired-lock cleanup job.
    pub cleanup_interval: Duration,
    pub provider: LockingProviderType,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            node_id: new_node_id(),
            max_lease_time: Duration::from_secs(DEFAULT_MAX_LEASE_SECS),
            acquire_base_delay: Duration::from_millis(DEFAULT_ACQUIRE_BASE_DELAY_MS),
            acquire_max_delay: Duration::from_millis(DEFAULT_ACQUIRE_MAX_DELAY_MS),
            unlock_retries: DEFAULT_UNLOCK_RETRIES,
            unlock_base_delay: Duration::from_millis(DEFAULT_UNLOCK_BASE_DELAY_MS),
            unlock_max_delay: Duration::from_millis(DEFAULT_UNLOCK_MAX_DELAY_MS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            provider: LockingProviderType::Db,
        }
    }
}

impl LockConfig {
    /// Default configuration for the given node.
    pub fn for_node(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn with_max_lease_time(mut self, lease: Duration) -> Self {
        self.max_lease_time = lease;
        self
    }

    /// Set the acquisition backoff: first wait and cap.
    pub fn with_acquire_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.acquire_base_delay = base;
        self.acquire_max_delay = max;
        self
    }

    /// Set the release retry budget and its backoff.
    pub fn with_unlock_retries(mut self, retries: u32, base: Duration, max: Duration) -> Self {
        self.unlock_retries = retries;
        self.unlock_base_delay = base;
        self.unlock_max_delay = max;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_provider(mut self, provider: LockingProviderType) -> Self {
        self.provider = provider;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CORRAL_NODE_ID`: Node identity (default: fresh UUIDv7)
    /// - `CORRAL_LOCK_MAX_LEASE_SECS`: Maximum lease time (default: 3600)
    /// - `CORRAL_LOCK_BASE_DELAY_MS`: First acquisition wait (default: 8)
    /// - `CORRAL_LOCK_MAX_DELAY_MS`: Acquisition wait cap (default: 2048)
    /// - `CORRAL_LOCK_UNLOCK_RETRIES`: Release retries (default: 3)
    /// - `CORRAL_LOCK_UNLOCK_BASE_DELAY_MS`: First release retry wait (default: 4)
    /// - `CORRAL_LOCK_UNLOCK_MAX_DELAY_MS`: Release retry wait cap (default: 256)
    /// - `CORRAL_LOCK_CLEANUP_INTERVAL_SECS`: Cleanup job period (default: 60)
    /// - `CORRAL_LOCKING_PROVIDER`: `db` or `jvm` (default: db)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            node_id: std::env::var("CORRAL_NODE_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.node_id),
            max_lease_time: env_secs("CORRAL_LOCK_MAX_LEASE_SECS")
                .unwrap_or(defaults.max_lease_time),
            acquire_base_delay: env_millis("CORRAL_LOCK_BASE_DELAY_MS")
                .unwrap_or(defaults.acquire_base_delay),
            acquire_max_delay: env_millis("CORRAL_LOCK_MAX_DELAY_MS")
                .unwrap_or(defaults.acquire_max_delay),
            unlock_retries: std::env::var("CORRAL_LOCK_UNLOCK_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.unlock_retries),
            unlock_base_delay: env_millis("CORRAL_LOCK_UNLOCK_BASE_DELAY_MS")
                .unwrap_or(defaults.unlock_base_delay),
            unlock_max_delay: env_millis("CORRAL_LOCK_UNLOCK_MAX_DELAY_MS")
                .unwrap_or(defaults.unlock_max_delay),
            cleanup_interval: env_secs("CORRAL_LOCK_CLEANUP_INTERVAL_SECS")
                .unwrap_or(defaults.cleanup_interval),
            provider: std::env::var("CORRAL_LOCKING_PROVIDER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.provider),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - node_id is not blank
    /// - lease, delays and cleanup interval are positive
    /// - base delays do not exceed their caps
    pub fn validate(&self) -> CorralResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id", &self.node_id, "node_id must not be blank"));
        }

        for (field, value) in [
            ("max_lease_time", self.max_lease_time),
            ("acquire_base_delay", self.acquire_base_delay),
            ("acquire_max_delay", self.acquire_max_delay),
            ("unlock_base_delay", self.unlock_base_delay),
            ("unlock_max_delay", self.unlock_max_delay),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    &format!("{:?}", value),
                    &format!("{} must be positive", field),
                ));
            }
        }

        if self.acquire_base_delay > self.acquire_max_delay {
            return Err(invalid(
                "acquire_base_delay",
                &format!("{:?}", self.acquire_base_delay),
                "acquire_base_delay must not exceed acquire_max_delay",
            ));
        }

        if self.unlock_base_delay > self.unlock_max_delay {
            return Err(invalid(
                "unlock_base_delay",
                &format!("{:?}", self.unlock_base_delay),
                "unlock_base_delay must not exceed unlock_max_delay",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Tuning for bounded-staleness caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a loaded snapshot may be served without reloading.
    pub staleness_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_secs(DEFAULT_ACL_STALENESS_SECS),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Environment variables:
    /// - `CORRAL_ACL_STALENESS_SECS`: Staleness window (default: 30)
    pub fn from_env() -> Self {
        Self {
            staleness_window: env_secs("CORRAL_ACL_STALENESS_SECS")
                .unwrap_or_else(|| Self::default().staleness_window),
        }
    }

    pub fn validate(&self) -> CorralResult<()> {
        if self.staleness_window.is_zero() {
            return Err(invalid(
                "staleness_window",
                &format!("{:?}", self.staleness_window),
                "staleness_window must be positive",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorralConfig {
    pub lock: LockConfig,
    pub cache: CacheConfig,
}

impl CorralConfig {
    pub fn from_env() -> Self {
        Self {
            lock: LockConfig::from_env(),
            cache: CacheConfig::from_env(),
        }
    }

    pub fn validate(&self) -> CorralResult<()> {
        self.lock.validate()?;
        self.cache.validate()
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
}

fn invalid(field: &str, value: &str, reason: &str) -> CorralError {
    CorralError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A base delay larger than its cap is always rejected on `acquire_base_delay`.
        #[test]
        fn prop_inverted_acquire_backoff_rejected(cap in 1u64..10_000, extra in 1u64..10_000) {
            let config = LockConfig::for_node("node-a").with_acquire_backoff(
                Duration::from_millis(cap + extra),
                Duration::from_millis(cap),
            );
            match config.validate() {
                Err(CorralError::Config(ConfigError::InvalidValue { field, .. })) => {
                    prop_assert_eq!(field, "acquire_base_delay");
                }
                other => prop_assert!(false, "Expected InvalidValue, got {:?}", other),
            }
        }

        /// Any positive, ordered backoff passes validation.
        #[test]
        fn prop_ordered_backoff_accepted(base in 1u64..5_000, extra in 0u64..5_000) {
            let config = LockConfig::for_node("node-a").with_acquire_backoff(
                Duration::from_millis(base),
                Duration::from_millis(base + extra),
            );
            prop_assert!(config.validate().is_ok());
        }
    }
}
