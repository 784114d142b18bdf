use super::{lock_connection, open_connection, open_memory_connection, query_error};
use crate::acl_store::{AclSource, AclStore};
use corral_core::{
    AccessControlEntry, AccessControlList, AclError, CorralError, CorralResult, PermissionTarget,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS acls (
    name        TEXT PRIMARY KEY,
    repo_keys   TEXT NOT NULL,
    includes    TEXT NOT NULL,
    excludes    TEXT NOT NULL,
    aces        TEXT NOT NULL,
    updated_by  TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str =
    "SELECT name, repo_keys, includes, excludes, aces, updated_by FROM acls";

/// ACL store on an `acls` table. List-valued columns hold JSON arrays.
#[derive(Debug)]
pub struct SqliteAclStore {
    conn: Mutex<Connection>,
}

impl SqliteAclStore {
    pub fn open(path: impl AsRef<Path>) -> CorralResult<Self> {
        let conn = open_connection(path.as_ref())?;
        conn.execute_batch(SCHEMA)
            .map_err(query_error("create_schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> CorralResult<Self> {
        let conn = open_memory_connection()?;
        conn.execute_batch(SCHEMA)
            .map_err(query_error("create_schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn strip_principal(&self, principal: &str, is_group: bool) -> CorralResult<usize> {
        let operation = if is_group {
            "remove_group_aces"
        } else {
            "remove_user_aces"
        };
        let mut conn = lock_connection(&self.conn)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_error(operation))?;

        let acls = {
            let mut stmt = tx.prepare(SELECT_COLUMNS).map_err(query_error(operation))?;
            let rows = stmt
                .query_map([], row_to_acl)
                .map_err(query_error(operation))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(query_error(operation))?
        };

        let mut changed = 0;
        for acl in acls {
            let stripped = acl.without_principal(principal, is_group);
            if stripped.aces.len() == acl.aces.len() {
                continue;
            }
            tx.execute(
                "UPDATE acls SET aces = ?2 WHERE name = ?1",
                params![stripped.name(), to_json(&stripped.aces)?],
            )
            .map_err(query_error(operation))?;
            changed += 1;
        }

        tx.commit().map_err(query_error(operation))?;
        Ok(changed)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> CorralResult<String> {
    serde_json::to_string(value).map_err(|e| {
        CorralError::Storage(corral_core::StorageError::Serialization {
            reason: e.to_string(),
        })
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_acl(row: &Row<'_>) -> rusqlite::Result<AccessControlList> {
    let aces: BTreeSet<AccessControlEntry> = json_column(row, 4)?;
    Ok(AccessControlList {
        permission_target: PermissionTarget {
            name: row.get(0)?,
            repo_keys: json_column(row, 1)?,
            includes: json_column(row, 2)?,
            excludes: json_column(row, 3)?,
        },
        aces,
        updated_by: row.get(5)?,
    })
}

struct AclColumns {
    repo_keys: String,
    includes: String,
    excludes: String,
    aces: String,
}

impl AclColumns {
    fn encode(acl: &AccessControlList) -> CorralResult<Self> {
        Ok(Self {
            repo_keys: to_json(&acl.permission_target.repo_keys)?,
            includes: to_json(&acl.permission_target.includes)?,
            excludes: to_json(&acl.permission_target.excludes)?,
            aces: to_json(&acl.aces)?,
        })
    }
}

impl AclSource for SqliteAclStore {
    fn all_acls(&self) -> CorralResult<Vec<AccessControlList>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY name", SELECT_COLUMNS))
            .map_err(query_error("all_acls"))?;
        let rows = stmt
            .query_map([], row_to_acl)
            .map_err(query_error("all_acls"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(query_error("all_acls"))
    }
}

impl AclStore for SqliteAclStore {
    fn find_acl(&self, name: &str) -> CorralResult<Option<AccessControlList>> {
        let conn = lock_connection(&self.conn)?;
        conn.query_row(
            &format!("{} WHERE name = ?1", SELECT_COLUMNS),
            params![name],
            row_to_acl,
        )
        .optional()
        .map_err(query_error("find_acl"))
    }

    fn create_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        let columns = AclColumns::encode(acl)?;
        let conn = lock_connection(&self.conn)?;
        let inserted = conn
            .execute(
                "INSERT INTO acls (name, repo_keys, includes, excludes, aces, updated_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT (name) DO NOTHING",
                params![
                    acl.name(),
                    columns.repo_keys,
                    columns.includes,
                    columns.excludes,
                    columns.aces,
                    acl.updated_by,
                ],
            )
            .map_err(query_error("create_acl"))?;
        if inserted == 0 {
            return Err(CorralError::Acl(AclError::PermissionTargetExists {
                name: acl.name().to_string(),
            }));
        }
        Ok(())
    }

    fn update_acl(&self, acl: &AccessControlList) -> CorralResult<()> {
        let columns = AclColumns::encode(acl)?;
        let conn = lock_connection(&self.conn)?;
        let updated = conn
            .execute(
                "UPDATE acls SET repo_keys = ?2, includes = ?3, excludes = ?4, aces = ?5, \
                 updated_by = ?6 WHERE name = ?1",
                params![
                    acl.name(),
                    columns.repo_keys,
                    columns.includes,
                    columns.excludes,
                    columns.aces,
                    acl.updated_by,
                ],
            )
            .map_err(query_error("update_acl"))?;
        if updated == 0 {
            return Err(CorralError::Acl(AclError::PermissionTargetNotFound {
                name: acl.name().to_string(),
            }));
        }
        Ok(())
    }

    fn delete_acl(&self, name: &str) -> CorralResult<bool> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn
            .execute("DELETE FROM acls WHERE name = ?1", params![name])
            .map_err(query_error("delete_acl"))?;
        Ok(deleted == 1)
    }

    fn delete_all_acls(&self) -> CorralResult<usize> {
        let conn = lock_connection(&self.conn)?;
        conn.execute("DELETE FROM acls", [])
            .map_err(query_error("delete_all_acls"))
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
    use corral_core::PermissionMask;

    fn deployers() -> AccessControlList {
        AccessControlList::new(
            PermissionTarget::new("deployT", vec!["repo1".to_string(), "repo2".to_string()])
                .with_excludes(vec!["a/**".to_string()]),
            [
                AccessControlEntry::user("user2", PermissionMask::DEPLOY),
                AccessControlEntry::group("group1", PermissionMask::DEPLOY),
            ],
            "admin",
        )
    }

    #[test]
    fn test_acl_persists_all_fields() {
        let store = SqliteAclStore::open_in_memory().unwrap();
        let acl = deployers();
        store.create_acl(&acl).unwrap();
        assert_eq!(store.find_acl("deployT").unwrap(), Some(acl.clone()));
        assert_eq!(store.all_acls().unwrap(), vec![acl]);
    }

    #[test]
    fn test_create_and_update_preconditions() {
        let store = SqliteAclStore::open_in_memory().unwrap();
        assert!(matches!(
            store.update_acl(&deployers()),
            Err(CorralError::Acl(AclError::PermissionTargetNotFound { .. }))
        ));
        store.create_acl(&deployers()).unwrap();
        assert!(matches!(
            store.create_acl(&deployers()),
            Err(CorralError::Acl(AclError::PermissionTargetExists { .. }))
        ));
    }

    #[test]
    fn test_strip_principal_in_transaction() {
        let store = SqliteAclStore::open_in_memory().unwrap();
        store.create_acl(&deployers()).unwrap();

        assert_eq!(store.remove_user_aces("user2").unwrap(), 1);
        assert_eq!(store.remove_user_aces("user2").unwrap(), 0);
        let acl = store.find_acl("deployT").unwrap().unwrap();
        assert_eq!(acl.aces.len(), 1);

        assert_eq!(store.remove_group_aces("group1").unwrap(), 1);
        assert!(store.find_acl("deployT").unwrap().unwrap().aces.is_empty());
    }

    #[test]
    fn test_delete_operations() {
        let store = SqliteAclStore::open_in_memory().unwrap();
        store.create_acl(&deployers()).unwrap();
        assert!(store.delete_acl("deployT").unwrap());
        assert!(!store.delete_acl("deployT").unwrap());

        store.create_acl(&deployers()).unwrap();
        assert_eq!(store.delete_all_acls().unwrap(), 1);
    }
}
