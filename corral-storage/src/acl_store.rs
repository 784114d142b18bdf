//! Access control list store contracts and in-memory implementation.

use corral_core::{AccessControlList, AclError, CorralError, CorralResult, StorageError};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Read side consumed by cache loaders: the full current set of ACLs.
pub trait AclSource: Send + Sync {
    fn all_acls(&self) -> CorralResult<Vec<AccessControlList>>;
}

/// Authoritative ACL storage. ACLs are keyed by permission target name.
pub trait AclStore: AclSource {
    fn find_acl(&self, name: &str) -> CorralResult<Option<AccessControlList>>;

    /// Fails with [`AclError::PermissionTargetExists`] if the name is taken.
    fn create_acl(&self, acl: &AccessControlList) -> CorralResult<()>;

    /// Fails with [`AclError::PermissionTargetNotFound`] if the name is unknown.
    fn update_acl(&self, acl: &AccessControlList) -> CorralResult<()>;

    /// Returns false if there was nothing to delete.
    fn delete_acl(&self, name: &str) -> CorralResult<bool>;

    fn delete_all_acls(&self) -> CorralResult<usize>;

    /// Strip every user entry for `username`. Returns the number of ACLs changed.
    fn remove_user_aces(&self, username: &str) -> CorralResult<usize>;

    /// Strip every group entry for `group`. Returns the number of ACLs changed.
    fn remove_group_aces(&self, group: &str) -> CorralResult<usize>;
}

impl<S: AclSource + ?Sized> AclSource for Arc<S> {
    fn all_acls(&self) -> CorralResult<Vec<AccessControlList>> {
        (**self).all_acls()
    }
}

impl<S: AclStore + ?Sized> AclStore for Arc<S> {
    fn find_acl(&self, name: &str) -> CorralResult<Option<AccessControlList>> {
        (**self).find_acl(name)
    }

    fn create_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        (**self).create_acl(acl)
    }

    fn update_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        (**self).update_acl(acl)
    }

    fn delete_acl(&self, name: &str) -> CorralResult<bool> {
        (**self).delete_acl(name)
    }

    fn delete_all_acls(&self) -> CorralResult<usize> {
        (**self).delete_all_acls()
    }

    fn remove_user_aces(&self, username: &str) -> CorralResult<usize> {
        (**self).remove_user_aces(username)
    }

    fn remove_group_aces(&self, group: &str) -> CorralResult<usize> {
        (**self).remove_group_aces(group)
    }
}

/// In-memory ACL store for testing.
#[derive(Debug, Default)]
pub struct InMemoryAclStore {
    acls: RwLock<BTreeMap<String, AccessControlList>>,
}

impl InMemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `acls`; later entries win on duplicate names.
    pub fn with_acls(acls: impl IntoIterator<Item = AccessControlList>) -> Self {
        let map = acls
            .into_iter()
            .map(|acl| (acl.name().to_string(), acl))
            .collect();
        Self {
            acls: RwLock::new(map),
        }
    }

    fn read(
        &self,
    ) -> CorralResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, AccessControlList>>> {
        self.acls
            .read()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
    }

    fn write(
        &self,
    ) -> CorralResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, AccessControlList>>> {
        self.acls
            .write()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
    }

    fn strip_principal(&self, principal: &str, is_group: bool) -> CorralResult<usize> {
        let mut acls = self.write()?;
        let mut changed = 0;
        for acl in acls.values_mut() {
            let stripped = acl.without_principal(principal, is_group);
            if stripped.aces.len() != acl.aces.len() {
                *acl = stripped;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

impl AclSource for InMemoryAclStore {
    fn all_acls(&self) -> CorralResult<Vec<AccessControlList>> {
        Ok(self.read()?.values().cloned().collect())
    }
}

impl AclStore for InMemoryAclStore {
    fn find_acl(&self, name: &str) -> CorralResult<Option<AccessControlList>> {
        Ok(self.read()?.get(name).cloned())
    }

    fn create_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        let mut acls = self.write()?;
        if acls.contains_key(acl.name()) {
            return Err(CorralError::Acl(AclError::PermissionTargetExists {
                name: acl.name().to_string(),
            }));
        }
        acls.insert(acl.name().to_string(), acl.clone());
        Ok(())
    }

    fn update_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        let mut acls = self.write()?;
        match acls.get_mut(acl.name()) {
            Some(existing) => {
                *existing = acl.clone();
                Ok(())
            }
            None => Err(CorralError::Acl(AclError::PermissionTargetNotFound {
                name: acl.name().to_string(),
            })),
        }
    }

    fn delete_acl(&self, name: &str) -> CorralResult<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    fn delete_all_acls(&self) -> CorralResult<usize> {
        let mut acls = self.write()?;
        let count = acls.len();
        acls.clear();
        Ok(count)
    }

    fn remove_user_aces(&self, username: &str) -> CorralResult<usize> {
        self.strip_principal(username, false)
    }

    fn remove_group_aces(&self, group: &str) -> CorralResult<usize> {
        self.strip_principal(group, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{AccessControlEntry, PermissionMask, PermissionTarget};

    fn acl(name: &str, aces: Vec<AccessControlEntry>) -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new(name, vec!["repo1".to_string()]),
            aces,
            "admin",
        )
    }

    #[test]
    fn test_create_rejects_duplicate_name() {
        let store = InMemoryAclStore::new();
        store.create_acl(&acl("deployT", vec![])).unwrap();
        let err = store.create_acl(&acl("deployT", vec![])).unwrap_err();
        assert!(matches!(
            err,
            CorralError::Acl(AclError::PermissionTargetExists { ref name }) if name == "deployT"
        ));
    }

    #[test]
    fn test_update_requires_existing_target() {
        let store = InMemoryAclStore::new();
        let err = store.update_acl(&acl("missing", vec![])).unwrap_err();
        assert!(matches!(
            err,
            CorralError::Acl(AclError::PermissionTargetNotFound { .. })
        ));

        store.create_acl(&acl("deployT", vec![])).unwrap();
        let updated = acl(
            "deployT",
            vec![AccessControlEntry::user("user1", PermissionMask::READ)],
        );
        store.update_acl(&updated).unwrap();
        assert_eq!(store.find_acl("deployT").unwrap(), Some(updated));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = InMemoryAclStore::with_acls([acl("deployT", vec![])]);
        assert!(store.delete_acl("deployT").unwrap());
        assert!(!store.delete_acl("deployT").unwrap());
    }

    #[test]
    fn test_remove_user_aces_leaves_groups() {
        let store = InMemoryAclStore::with_acls([
            acl(
                "a",
                vec![
                    AccessControlEntry::user("bob", PermissionMask::READ),
                    AccessControlEntry::group("bob", PermissionMask::READ),
                ],
            ),
            acl("b", vec![AccessControlEntry::user("alice", PermissionMask::READ)]),
        ]);

        assert_eq!(store.remove_user_aces("bob").unwrap(), 1);
        let a = store.find_acl("a").unwrap().unwrap();
        assert_eq!(a.aces.len(), 1);
        assert!(a.aces.iter().all(|ace| ace.is_group));

        assert_eq!(store.remove_group_aces("bob").unwrap(), 1);
        assert!(store.find_acl("a").unwrap().unwrap().aces.is_empty());
    }

    #[test]
    fn test_delete_all() {
        let store = InMemoryAclStore::with_acls([acl("a", vec![]), acl("b", vec![])]);
        assert_eq!(store.delete_all_acls().unwrap(), 2);
        assert!(store.all_acls().unwrap().is_empty());
    }
}
