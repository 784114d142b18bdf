//! Cache loader producing authorization snapshots.

use crate::snapshot::AuthorizationSnapshot;
use corral_core::CorralResult;
use corral_storage::{AclSource, CacheLoader};
use std::time::Instant;

/// Rebuilds the whole [`AuthorizationSnapshot`] from the ACL source on every
/// call. Nothing is patched incrementally.
#[derive(Debug, Clone)]
pub struct AclCacheLoader<A: AclSource> {
    source: A,
}

impl<A: AclSource> AclCacheLoader<A> {
    pub fn new(source: A) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &A {
        &self.source
    }
}

impl<A: AclSource> CacheLoader for AclCacheLoader<A> {
    type Value = AuthorizationSnapshot;

    fn load(&self) -> CorralResult<AuthorizationSnapshot> {
        let started = Instant::now();
        let acls = self.source.all_acls()?;
        let snapshot = AuthorizationSnapshot::build(acls);

        tracing::debug!(
            acls = snapshot.len(),
            users = snapshot.users().len(),
            groups = snapshot.groups().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Authorization snapshot rebuilt"
        );
        Ok(snapshot)
    }
}
