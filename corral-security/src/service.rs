//! ACL service: authoritative writes, cached reads.

use crate::loader::AclCacheLoader;
use crate::snapshot::{AclCache, AuthorizationSnapshot};
use corral_core::{AccessControlList, CacheConfig, CorralError, CorralResult};
use corral_storage::{AclStore, Generation, VersioningCache};
use std::sync::Arc;

/// ACL access for one node.
///
/// Reads are served from a cached [`AuthorizationSnapshot`] that may lag the
/// store by up to the staleness window. Every mutation promotes the cache
/// generation afterwards, whether it succeeded or not, so the next read on
/// this node sees the store as it is.
#[derive(Debug)]
pub struct AclService<S: AclStore + 'static> {
    store: Arc<S>,
    cache: VersioningCache<AclCacheLoader<Arc<S>>>,
}

impl<S: AclStore + 'static> AclService<S> {
    pub fn new(store: Arc<S>, config: &CacheConfig) -> CorralResult<Self> {
        config.validate()?;
        let cache = VersioningCache::new(
            AclCacheLoader::new(Arc::clone(&store)),
            config.staleness_window,
        );
        Ok(Self { store, cache })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &VersioningCache<AclCacheLoader<Arc<S>>> {
        &self.cache
    }

    fn snapshot(&self) -> CorralResult<Arc<AuthorizationSnapshot>> {
        self.cache.get()
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn all_acls(&self) -> CorralResult<Vec<Arc<AccessControlList>>> {
        Ok(self.snapshot()?.acls().cloned().collect())
    }

    pub fn acl(&self, name: &str) -> CorralResult<Option<Arc<AccessControlList>>> {
        Ok(self.snapshot()?.acl(name).cloned())
    }

    pub fn permission_target_exists(&self, name: &str) -> CorralResult<bool> {
        Ok(self.snapshot()?.contains(name))
    }

    /// User and group indexes of the current snapshot.
    pub fn acl_cache(&self) -> CorralResult<AclCache> {
        Ok(AclCache::new(self.snapshot()?))
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    pub fn create_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        self.mutate("create_acl", acl.name(), |store| store.create_acl(acl))
    }

    pub fn update_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        self.mutate("update_acl", acl.name(), |store| store.update_acl(acl))
    }

    /// Deleting an unknown target is not an error.
    pub fn delete_acl(&self, name: &str) -> CorralResult<bool> {
        self.mutate("delete_acl", name, |store| store.delete_acl(name))
    }

    pub fn remove_all_user_aces(&self, username: &str) -> CorralResult<usize> {
        self.mutate("remove_all_user_aces", username, |store| {
            store.remove_user_aces(username)
        })
    }

    pub fn remove_all_group_aces(&self, group: &str) -> CorralResult<usize> {
        self.mutate("remove_all_group_aces", group, |store| {
            store.remove_group_aces(group)
        })
    }

    pub fn delete_all_acls(&self) -> CorralResult<usize> {
        self.mutate("delete_all_acls", "*", |store| store.delete_all_acls())
    }

    /// Mark the cached snapshot stale. Used when another node reports a change.
    pub fn invalidate_acl_cache(&self) -> Generation {
        let generation = self.cache.promote_db_version();
        tracing::debug!(generation = %generation, "ACL cache invalidated");
        generation
    }

    fn mutate<T, F>(&self, operation: &'static str, target: &str, f: F) -> CorralResult<T>
    where
        F: FnOnce(&S) -> CorralResult<T>,
    {
        let result = f(&self.store);
        let generation = self.cache.promote_db_version();

        match &result {
            Ok(_) => tracing::debug!(
                operation,
                target,
                generation = %generation,
                "ACL store updated"
            ),
            Err(CorralError::Acl(e)) => tracing::warn!(
                operation,
                target,
                generation = %generation,
                error = %e,
                "ACL update rejected"
            ),
            Err(e) => tracing::error!(
                operation,
                target,
                generation = %generation,
                error = %e,
                "ACL store update failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{AccessControlEntry, AclError, PermissionMask, PermissionTarget};
    use corral_storage::{AclSource, InMemoryAclStore};
    use corral_test_utils::fixtures::{deployer_acl, reader_acl, seeded_acl_store};
    use std::time::Duration;

    fn service(window: Duration) -> AclService<InMemoryAclStore> {
        AclService::new(
            Arc::new(seeded_acl_store()),
            &CacheConfig::new().with_staleness_window(window),
        )
        .unwrap()
    }

    fn builds_acl() -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new("buildsT", vec!["builds".to_string()]),
            [AccessControlEntry::group("ci", PermissionMask::DEPLOY | PermissionMask::READ)],
            "admin",
        )
    }

    #[test]
    fn test_reads_come_from_cache() {
        let acls = service(Duration::from_secs(60));
        assert_eq!(acls.all_acls().unwrap().len(), 2);
        assert!(acls.permission_target_exists("readerT").unwrap());
        assert_eq!(acls.acl("deployT").unwrap().map(|a| (*a).clone()), Some(deployer_acl()));
        assert!(acls.acl("missing").unwrap().is_none());
        assert_eq!(acls.cache().stats().loads, 1);
    }

    #[test]
    fn test_acl_cache_exposes_principal_indexes() {
        let acls = service(Duration::from_secs(60));
        let cache = acls.acl_cache().unwrap();
        assert_eq!(cache.user_index().len(), 3);
        assert_eq!(cache.user_acls("user2").unwrap().len(), 3);
        assert_eq!(cache.group_acls("group1").unwrap()["repo1"].len(), 1);
        assert!(cache.group_acls("group2").is_none());
    }

    #[test]
    fn test_create_is_visible_on_next_read() {
        let acls = service(Duration::from_secs(60));
        assert!(!acls.permission_target_exists("buildsT").unwrap());

        acls.create_acl(&builds_acl()).unwrap();
        assert!(acls.permission_target_exists("buildsT").unwrap());
        assert!(acls.acl_cache().unwrap().group_acls("ci").is_some());
    }

    #[test]
    fn test_failed_mutation_still_promotes() {
        let acls = service(Duration::from_secs(60));
        let before = acls.cache().current_generation();

        let err = acls.create_acl(&reader_acl()).unwrap_err();
        assert_eq!(
            err,
            CorralError::Acl(AclError::PermissionTargetExists {
                name: "readerT".to_string()
            })
        );
        let err = acls.update_acl(&builds_acl()).unwrap_err();
        assert!(matches!(err, CorralError::Acl(AclError::PermissionTargetNotFound { .. })));

        assert_eq!(acls.cache().current_generation().value(), before.value() + 2);
    }

    #[test]
    fn test_update_replaces_entries() {
        let acls = service(Duration::from_secs(60));
        let mut updated = reader_acl();
        updated.aces.insert(AccessControlEntry::user("user9", PermissionMask::READ));
        acls.update_acl(&updated).unwrap();

        let cache = acls.acl_cache().unwrap();
        assert!(cache.user_acls("user9").is_some());
        assert_eq!(acls.acl("readerT").unwrap().unwrap().aces.len(), 3);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let acls = service(Duration::from_secs(60));
        assert!(acls.delete_acl("readerT").unwrap());
        assert!(!acls.delete_acl("readerT").unwrap());
        assert!(!acls.permission_target_exists("readerT").unwrap());
        assert!(acls.acl_cache().unwrap().user_acls("user1").is_none());
    }

    #[test]
    fn test_remove_principal_aces() {
        let acls = service(Duration::from_secs(60));
        assert_eq!(acls.remove_all_user_aces("user2").unwrap(), 2);
        assert_eq!(acls.remove_all_group_aces("group1").unwrap(), 1);

        let cache = acls.acl_cache().unwrap();
        assert!(cache.user_acls("user2").is_none());
        assert!(cache.group_index().is_empty());
        assert_eq!(acls.all_acls().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_all() {
        let acls = service(Duration::from_secs(60));
        assert_eq!(acls.delete_all_acls().unwrap(), 2);
        assert!(acls.all_acls().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_band_write_visible_after_window() {
        let acls = service(Duration::from_millis(100));
        assert_eq!(acls.all_acls().unwrap().len(), 2);

        // Another node writes straight to the shared store.
        acls.store().create_acl(&builds_acl()).unwrap();
        assert_eq!(acls.all_acls().unwrap().len(), 2);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(acls.all_acls().unwrap().len(), 3);
    }

    #[test]
    fn test_invalidate_makes_out_of_band_write_visible() {
        let acls = service(Duration::from_secs(60));
        assert_eq!(acls.all_acls().unwrap().len(), 2);
        acls.store().create_acl(&builds_acl()).unwrap();

        let before = acls.cache().current_generation();
        let after = acls.invalidate_acl_cache();
        assert!(after > before);
        assert_eq!(acls.all_acls().unwrap().len(), 3);
        assert_eq!(acls.store().all_acls().unwrap().len(), 3);
    }

    #[test]
    fn test_zero_staleness_window_is_rejected() {
        let result = AclService::new(
            Arc::new(InMemoryAclStore::new()),
            &CacheConfig::new().with_staleness_window(Duration::ZERO),
        );
        assert!(result.is_err());
    }
}
