//! Immutable authorization indexes built from the full ACL set.

use corral_core::AccessControlList;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Repository key → ACLs covering that repository.
pub type RepoKeyIndex = HashMap<String, HashSet<Arc<AccessControlList>>>;

/// Principal name → that principal's [`RepoKeyIndex`].
pub type PrincipalIndex = HashMap<String, RepoKeyIndex>;

/// All ACLs at one point in time, indexed three ways.
///
/// Built once and never mutated; a reload produces a new snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationSnapshot {
    acls_by_name: HashMap<String, Arc<AccessControlList>>,
    users: PrincipalIndex,
    groups: PrincipalIndex,
}

impl AuthorizationSnapshot {
    /// Index `acls`. Every entry files its ACL under the entry's principal,
    /// once per repository key of the permission target. Entries with an
    /// empty principal are skipped. A repeated target name keeps the last ACL.
    pub fn build(acls: impl IntoIterator<Item = AccessControlList>) -> Self {
        let mut snapshot = Self::default();

        for acl in acls {
            let acl = Arc::new(acl);
            for ace in &acl.aces {
                if ace.principal.is_empty() {
                    tracing::trace!(acl = %acl.name(), "Skipping entry without principal");
                    continue;
                }
                let index = if ace.is_group {
                    &mut snapshot.groups
                } else {
                    &mut snapshot.users
                };
                let repos = index.entry(ace.principal.clone()).or_default();
                for repo_key in acl.repo_keys() {
                    repos
                        .entry(repo_key.clone())
                        .or_default()
                        .insert(Arc::clone(&acl));
                }
            }
            snapshot.acls_by_name.insert(acl.name().to_string(), acl);
        }

        snapshot
    }

    pub fn acl(&self, name: &str) -> Option<&Arc<AccessControlList>> {
        self.acls_by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.acls_by_name.contains_key(name)
    }

    pub fn acls(&self) -> impl Iterator<Item = &Arc<AccessControlList>> {
        self.acls_by_name.values()
    }

    pub fn len(&self) -> usize {
        self.acls_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acls_by_name.is_empty()
    }

    pub fn users(&self) -> &PrincipalIndex {
        &self.users
    }

    pub fn groups(&self) -> &PrincipalIndex {
        &self.groups
    }
}

/// Principal-side view of a snapshot.
#[derive(Debug, Clone)]
pub struct AclCache {
    snapshot: Arc<AuthorizationSnapshot>,
}

impl AclCache {
    pub fn new(snapshot: Arc<AuthorizationSnapshot>) -> Self {
        Self { snapshot }
    }

    pub fn user_acls(&self, username: &str) -> Option<&RepoKeyIndex> {
        self.snapshot.users.get(username)
    }

    pub fn group_acls(&self, group: &str) -> Option<&RepoKeyIndex> {
        self.snapshot.groups.get(group)
    }

    /// ACLs granting `username` anything on `repo_key`. Only exact key
    /// matches; `ANY`-style keys are indexed under their literal name.
    pub fn user_acls_for_repo(
        &self,
        username: &str,
        repo_key: &str,
    ) -> Vec<Arc<AccessControlList>> {
        self.user_acls(username)
            .and_then(|repos| repos.get(repo_key))
            .map(|acls| acls.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_index(&self) -> &PrincipalIndex {
        self.snapshot.users()
    }

    pub fn group_index(&self) -> &PrincipalIndex {
        self.snapshot.groups()
    }
}
