//! CORRAL Test Utilities
//!
//! Centralized test infrastructure for the CORRAL workspace:
//! - Proptest generators for lock records and ACLs
//! - Test fixtures for common ACL scenarios
//! - A fault-injecting lock store
//! - Test-friendly tracing setup

pub use corral_core::{
    AccessControlEntry, AccessControlList, CorralError, CorralResult, LockRecord, PermissionMask,
    PermissionTarget, StorageError, Timestamp,
};
pub use corral_storage::{InMemoryAclStore, InMemoryLockStore, LockStore};

use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CORRAL domain types.

    use super::*;
    use proptest::prelude::*;

    /// Timestamp between 2020 and 2030 with millisecond precision.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800_000i64..1_893_456_000_000i64)
            .prop_map(|ms| Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now))
    }

    pub fn arb_category() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("upload".to_string()),
            Just("builds".to_string()),
            Just("indexing".to_string()),
            "[a-z]{3,10}",
        ]
    }

    pub fn arb_lock_record() -> impl Strategy<Value = LockRecord> {
        (
            arb_category(),
            "[a-z0-9/._-]{1,40}",
            "node-[a-z0-9]{1,8}",
            1u64..10_000,
            "[a-z-]{1,16}",
            arb_timestamp(),
        )
            .prop_map(
                |(category, key, owner, thread_id, thread_name, acquired_at)| LockRecord {
                    category,
                    key,
                    owner,
                    thread_id,
                    thread_name,
                    acquired_at,
                },
            )
    }

    pub fn arb_permission_mask() -> impl Strategy<Value = PermissionMask> {
        (0u32..32).prop_map(PermissionMask::from_bits_truncate)
    }

    pub fn arb_ace() -> impl Strategy<Value = AccessControlEntry> {
        ("[a-z]{1,3}[0-9]", any::<bool>(), arb_permission_mask()).prop_map(
            |(principal, is_group, mask)| AccessControlEntry {
                principal,
                is_group,
                mask,
            },
        )
    }

    pub fn arb_repo_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(PermissionTarget::ANY_REPO.to_string()),
            Just(PermissionTarget::ANY_LOCAL_REPO.to_string()),
            Just(PermissionTarget::ANY_REMOTE_REPO.to_string()),
            "repo[0-9]",
        ]
    }

    pub fn arb_permission_target() -> impl Strategy<Value = PermissionTarget> {
        (
            "[a-zA-Z][a-zA-Z0-9]{0,15}",
            prop::collection::vec(arb_repo_key(), 0..4),
            prop::collection::vec("[a-z*/]{1,8}", 0..3),
        )
            .prop_map(|(name, repo_keys, excludes)| {
                PermissionTarget::new(name, repo_keys).with_excludes(excludes)
            })
    }

    pub fn arb_acl() -> impl Strategy<Value = AccessControlList> {
        (
            arb_permission_target(),
            prop::collection::vec(arb_ace(), 0..6),
            "[a-z]{1,8}",
        )
            .prop_map(|(target, aces, updated_by)| AccessControlList::new(target, aces, updated_by))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built ACLs for common authorization scenarios.

    use super::*;

    /// Read target over every local repository, granted to `user1` and
    /// `user2` with an empty mask.
    pub fn reader_acl() -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new("readerT", vec![PermissionTarget::ANY_LOCAL_REPO.to_string()]),
            [
                AccessControlEntry::user("user1", PermissionMask::empty()),
                AccessControlEntry::user("user2", PermissionMask::empty()),
            ],
            "admin",
        )
    }

    /// Deploy target over `repo1` and `repo2` excluding `a/**`, granted to
    /// `user2`, `user3` and `group1`.
    pub fn deployer_acl() -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new("deployT", vec!["repo1".to_string(), "repo2".to_string()])
                .with_excludes(vec!["a/**".to_string()]),
            [
                AccessControlEntry::user("user2", PermissionMask::DEPLOY),
                AccessControlEntry::user("user3", PermissionMask::DEPLOY),
                AccessControlEntry::group("group1", PermissionMask::DEPLOY),
            ],
            "admin",
        )
    }

    /// ACL store seeded with [`reader_acl`] and [`deployer_acl`].
    pub fn seeded_acl_store() -> InMemoryAclStore {
        InMemoryAclStore::with_acls([reader_acl(), deployer_acl()])
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Operations of [`LockStore`], for targeting injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockStoreOp {
    TryInsert,
    Find,
    DeleteIfOwner,
    DeleteUnconditional,
    DeleteAllOwnedBy,
    FindOlderThan,
    FindAllOwnedBy,
    CountByCategory,
    KeysByCategory,
}

impl LockStoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStoreOp::TryInsert => "try_insert_if_absent",
            LockStoreOp::Find => "find",
            LockStoreOp::DeleteIfOwner => "delete_if_owner",
            LockStoreOp::DeleteUnconditional => "delete_unconditional",
            LockStoreOp::DeleteAllOwnedBy => "delete_all_owned_by",
            LockStoreOp::FindOlderThan => "find_older_than",
            LockStoreOp::FindAllOwnedBy => "find_all_owned_by",
            LockStoreOp::CountByCategory => "count_by_category",
            LockStoreOp::KeysByCategory => "keys_by_category",
        }
    }
}

/// Lock store wrapper that fails the next N calls of chosen operations with
/// [`StorageError::Injected`], then delegates again.
#[derive(Debug, Default)]
pub struct FlakyLockStore<S: LockStore> {
    inner: S,
    pending_failures: Mutex<HashMap<LockStoreOp, u32>>,
    calls: Mutex<HashMap<LockStoreOp, u64>>,
}

impl<S: LockStore> FlakyLockStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make the next `times` calls of `op` fail. Adds to any pending failures.
    pub fn fail_next(&self, op: LockStoreOp, times: u32) {
        if let Ok(mut pending) = self.pending_failures.lock() {
            *pending.entry(op).or_insert(0) += times;
        }
    }

    /// Calls of `op` so far, failed ones included.
    pub fn calls(&self, op: LockStoreOp) -> u64 {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check(&self, op: LockStoreOp) -> CorralResult<()> {
        *self
            .calls
            .lock()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?
            .entry(op)
            .or_insert(0) += 1;

        let mut pending = self
            .pending_failures
            .lock()
            .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))?;
        match pending.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(CorralError::Storage(StorageError::Injected {
                    operation: op.as_str().to_string(),
                }))
            }
            _ => Ok(()),
        }
    }
}

impl<S: LockStore> LockStore for FlakyLockStore<S> {
    fn try_insert_if_absent(&self, record: &LockRecord) -> CorralResult<bool> {
        self.check(LockStoreOp::TryInsert)?;
        self.inner.try_insert_if_absent(record)
    }

    fn find(&self, category: &str, key: &str) -> CorralResult<Option<LockRecord>> {
        self.check(LockStoreOp::Find)?;
        self.inner.find(category, key)
    }

    fn delete_if_owner(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool> {
        self.check(LockStoreOp::DeleteIfOwner)?;
        self.inner.delete_if_owner(category, key, owner)
    }

    fn delete_unconditional(&self, category: &str, key: &str) -> CorralResult<bool> {
        self.check(LockStoreOp::DeleteUnconditional)?;
        self.inner.delete_unconditional(category, key)
    }

    fn delete_all_owned_by(&self, owner: &str) -> CorralResult<usize> {
        self.check(LockStoreOp::DeleteAllOwnedBy)?;
        self.inner.delete_all_owned_by(owner)
    }

    fn find_older_than(&self, cutoff: Timestamp) -> CorralResult<Vec<LockRecord>> {
        self.check(LockStoreOp::FindOlderThan)?;
        self.inner.find_older_than(cutoff)
    }

    fn find_all_owned_by(&self, owner: &str) -> CorralResult<Vec<LockRecord>> {
        self.check(LockStoreOp::FindAllOwnedBy)?;
        self.inner.find_all_owned_by(owner)
    }

    fn count_by_category(&self, category: &str) -> CorralResult<usize> {
        self.check(LockStoreOp::CountByCategory)?;
        self.inner.count_by_category(category)
    }

    fn keys_by_category(&self, category: &str) -> CorralResult<HashSet<String>> {
        self.check(LockStoreOp::KeysByCategory)?;
        self.inner.keys_by_category(category)
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Route tracing output through the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("corral=debug,warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flaky_store_fails_then_recovers() {
        let store = FlakyLockStore::new(InMemoryLockStore::new());
        store.fail_next(LockStoreOp::TryInsert, 2);
        let record = LockRecord::for_current_thread("upload", "a", "node-a");

        assert!(store.try_insert_if_absent(&record).is_err());
        assert!(store.try_insert_if_absent(&record).is_err());
        assert!(store.try_insert_if_absent(&record).unwrap());
        assert_eq!(store.calls(LockStoreOp::TryInsert), 3);
        assert_eq!(store.calls(LockStoreOp::Find), 0);
    }

    #[test]
    fn test_flaky_store_only_targets_chosen_op() {
        let store = FlakyLockStore::new(InMemoryLockStore::new());
        store.fail_next(LockStoreOp::DeleteIfOwner, 1);
        let record = LockRecord::for_current_thread("upload", "a", "node-a");

        assert!(store.try_insert_if_absent(&record).unwrap());
        let err = store.delete_if_owner("upload", "a", "node-a").unwrap_err();
        assert_eq!(
            err,
            CorralError::Storage(StorageError::Injected {
                operation: "delete_if_owner".to_string()
            })
        );
        assert!(store.delete_if_owner("upload", "a", "node-a").unwrap());
    }

    #[test]
    fn test_fixtures_shape() {
        let reader = fixtures::reader_acl();
        let deployer = fixtures::deployer_acl();
        assert_eq!(reader.aces.len(), 2);
        assert_eq!(deployer.aces.len(), 3);
        assert_eq!(deployer.permission_target.excludes_pattern(), "a/**");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_records_are_well_formed(record in generators::arb_lock_record()) {
            prop_assert!(!record.key.is_empty());
            prop_assert!(record.owner.starts_with("node-"));
            prop_assert!(record.thread_id >= 1);
        }

        #[test]
        fn prop_generated_masks_are_known_bits(ace in generators::arb_ace()) {
            prop_assert_eq!(ace.mask.bits() & !PermissionMask::all().bits(), 0);
        }
    }
}
