//! Locking provider selection.

use crate::guard::{ConflictGuard, ConflictsGuard, DbConflictGuard, DbConflictsGuard};
use crate::local_guard::{LocalConflictsGuard, LocalLockPool};
use crate::service::DbLockService;
use corral_core::{CorralResult, LockConfig, LockingProviderType};
use corral_storage::LockStore;
use dashmap::DashMap;
use std::sync::Arc;

/// Hands out lock guards of the configured kind.
///
/// `Db` guards go through the shared lock store. `Jvm` guards lock inside
/// this process only; guards for the same category share one pool.
pub struct LockingProvider<S: LockStore + 'static> {
    provider_type: LockingProviderType,
    service: Arc<DbLockService<S>>,
    local_pools: DashMap<String, Arc<LocalLockPool>>,
}

impl<S: LockStore + 'static> LockingProvider<S> {
    pub fn new(provider_type: LockingProviderType, service: Arc<DbLockService<S>>) -> Self {
        tracing::info!(
            provider = %provider_type,
            owner = %service.node_id(),
            "Locking provider selected"
        );
        Self {
            provider_type,
            service,
            local_pools: DashMap::new(),
        }
    }

    /// Provider of the type named in `config`. The config is validated first.
    pub fn from_config(config: &LockConfig, service: Arc<DbLockService<S>>) -> CorralResult<Self> {
        config.validate()?;
        Ok(Self::new(config.provider, service))
    }

    pub fn provider_type(&self) -> LockingProviderType {
        self.provider_type
    }

    pub fn service(&self) -> &Arc<DbLockService<S>> {
        &self.service
    }

    /// Guard for one resource.
    pub fn conflict_guard(&self, category: &str, key: &str) -> Box<dyn ConflictGuard> {
        match self.provider_type {
            LockingProviderType::Db => Box::new(DbConflictGuard::new(
                Arc::clone(&self.service),
                category,
                key,
            )),
            LockingProviderType::Jvm => self.local_guard(category).get_lock(key),
        }
    }

    /// Guard for a whole category.
    pub fn conflicts_guard(&self, category: &str) -> Box<dyn ConflictsGuard> {
        match self.provider_type {
            LockingProviderType::Db => {
                Box::new(DbConflictsGuard::new(Arc::clone(&self.service), category))
            }
            LockingProviderType::Jvm => Box::new(self.local_guard(category)),
        }
    }

    fn local_guard(&self, category: &str) -> LocalConflictsGuard {
        let pool = self
            .local_pools
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(LocalLockPool::new()))
            .value()
            .clone();
        LocalConflictsGuard::with_pool(category, pool)
    }
}
