//! Two nodes sharing one SQLite ACL database.

use corral_core::{
    AccessControlEntry, AccessControlList, CacheConfig, PermissionMask, PermissionTarget,
};
use corral_security::AclService;
use corral_storage::{AclStore, SqliteAclStore};
use corral_test_utils::fixtures::{deployer_acl, reader_acl};
use corral_test_utils::init_test_tracing;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn node(path: &std::path::Path, window: Duration) -> AclService<SqliteAclStore> {
    AclService::new(
        Arc::new(SqliteAclStore::open(path).unwrap()),
        &CacheConfig::new().with_staleness_window(window),
    )
    .unwrap()
}

fn seed(path: &std::path::Path) {
    let store = SqliteAclStore::open(path).unwrap();
    store.create_acl(&reader_acl()).unwrap();
    store.create_acl(&deployer_acl()).unwrap();
}

#[test]
fn test_snapshot_from_sqlite_matches_fixture() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acls.db");
    seed(&path);

    let acls = node(&path, Duration::from_secs(60));
    let cache = acls.acl_cache().unwrap();
    assert_eq!(cache.user_index().len(), 3);
    assert_eq!(cache.user_acls("user1").unwrap().len(), 1);
    assert_eq!(cache.user_acls("user2").unwrap().len(), 3);
    assert_eq!(cache.user_acls("user3").unwrap().len(), 2);

    let repo1 = &cache.group_acls("group1").unwrap()["repo1"];
    assert_eq!(repo1.len(), 1);
    assert_eq!(repo1.iter().next().unwrap().aces.len(), 3);
    assert!(cache.group_acls("group2").is_none());
}

#[test]
fn test_peer_write_visible_within_staleness_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acls.db");
    seed(&path);
    let writer = node(&path, Duration::from_secs(60));
    let reader = node(&path, Duration::from_millis(500));
    assert_eq!(reader.all_acls().unwrap().len(), 2);

    let target = PermissionTarget::new("annotateT", vec![PermissionTarget::ANY_REPO.to_string()]);
    writer
        .create_acl(&AccessControlList::new(
            target,
            [AccessControlEntry::user("user4", PermissionMask::ANNOTATE)],
            "admin",
        ))
        .unwrap();
    assert!(writer.permission_target_exists("annotateT").unwrap());
    assert!(!reader.permission_target_exists("annotateT").unwrap());

    thread::sleep(Duration::from_millis(600));
    assert!(reader.permission_target_exists("annotateT").unwrap());
}

#[test]
fn test_peer_invalidation_skips_the_wait() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acls.db");
    seed(&path);
    let writer = node(&path, Duration::from_secs(60));
    let reader = node(&path, Duration::from_secs(60));
    assert!(reader.acl_cache().unwrap().user_acls("user2").is_some());

    assert_eq!(writer.remove_all_user_aces("user2").unwrap(), 2);
    assert!(reader.acl_cache().unwrap().user_acls("user2").is_some());

    reader.invalidate_acl_cache();
    assert!(reader.acl_cache().unwrap().user_acls("user2").is_none());
}

#[test]
fn test_concurrent_cold_readers_share_one_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acls.db");
    seed(&path);
    let acls = Arc::new(node(&path, Duration::from_secs(60)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let acls = Arc::clone(&acls);
            thread::spawn(move || acls.all_acls().unwrap().len())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 2);
    }
    assert_eq!(acls.cache().stats().loads, 1);
}
