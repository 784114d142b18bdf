use super::{lock_connection, open_connection, open_memory_connection, query_error};
use crate::lock_store::LockStore;
use chrono::DateTime;
use corral_core::{CorralResult, LockRecord, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS distributed_locks (
    category          TEXT    NOT NULL,
    lock_key          TEXT    NOT NULL,
    owner             TEXT    NOT NULL,
    owner_thread      INTEGER NOT NULL,
    owner_thread_name TEXT    NOT NULL,
    acquire_time      INTEGER NOT NULL,
    PRIMARY KEY (category, lock_key)
);
CREATE INDEX IF NOT EXISTS distributed_locks_owner ON distributed_locks (owner);
CREATE INDEX IF NOT EXISTS distributed_locks_acquire_time ON distributed_locks (acquire_time);
";

const SELECT_COLUMNS: &str =
    "SELECT category, lock_key, owner, owner_thread, owner_thread_name, acquire_time FROM distributed_locks";

/// Lock store on a `distributed_locks` table.
///
/// The `(category, lock_key)` primary key is the conditional-insert primitive:
/// an insert that collides with an existing row changes nothing.
#[derive(Debug)]
pub struct SqliteLockStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteLockStore {
    /// Open (creating if needed) the lock table in the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CorralResult<Self> {
        let path = path.as_ref();
        let conn = open_connection(path)?;
        conn.execute_batch(SCHEMA)
            .map_err(query_error("create_schema"))?;
        tracing::debug!(path = %path.display(), "Opened SQLite lock store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database. Not shareable between handles.
    pub fn open_in_memory() -> CorralResult<Self> {
        let conn = open_memory_connection()?;
        conn.execute_batch(SCHEMA)
            .map_err(query_error("create_schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write a row without the conflict check, replacing any existing one.
    pub fn insert_raw(&self, record: &LockRecord) -> CorralResult<()> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO distributed_locks \
             (category, lock_key, owner, owner_thread, owner_thread_name, acquire_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.category,
                record.key,
                record.owner,
                record.thread_id as i64,
                record.thread_name,
                record.acquired_at.timestamp_millis(),
            ],
        )
        .map_err(query_error("insert_raw"))?;
        Ok(())
    }

    fn query_records(
        &self,
        operation: &'static str,
        sql: &str,
        param: impl rusqlite::ToSql,
    ) -> CorralResult<Vec<LockRecord>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn.prepare(sql).map_err(query_error(operation))?;
        let rows = stmt
            .query_map(params![param], row_to_record)
            .map_err(query_error(operation))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(query_error(operation))
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<LockRecord> {
    let millis: i64 = row.get(5)?;
    let acquired_at = DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(5, millis))?;
    let thread_id: i64 = row.get(3)?;
    Ok(LockRecord {
        category: row.get(0)?,
        key: row.get(1)?,
        owner: row.get(2)?,
        thread_id: thread_id as u64,
        thread_name: row.get(4)?,
        acquired_at,
    })
}

impl LockStore for SqliteLockStore {
    fn try_insert_if_absent(&self, record: &LockRecord) -> CorralResult<bool> {
        let conn = lock_connection(&self.conn)?;
        let inserted = conn
            .execute(
                "INSERT INTO distributed_locks \
                 (category, lock_key, owner, owner_thread, owner_thread_name, acquire_time) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT (category, lock_key) DO NOTHING",
                params![
                    record.category,
                    record.key,
                    record.owner,
                    record.thread_id as i64,
                    record.thread_name,
                    record.acquired_at.timestamp_millis(),
                ],
            )
            .map_err(query_error("try_insert_if_absent"))?;
        Ok(inserted == 1)
    }

    fn find(&self, category: &str, key: &str) -> CorralResult<Option<LockRecord>> {
        let conn = lock_connection(&self.conn)?;
        conn.query_row(
            &format!("{} WHERE category = ?1 AND lock_key = ?2", SELECT_COLUMNS),
            params![category, key],
            row_to_record,
        )
        .optional()
        .map_err(query_error("find"))
    }

    fn delete_if_owner(&self, category: &str, key: &str, owner: &str) -> CorralResult<bool> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn
            .execute(
                "DELETE FROM distributed_locks WHERE category = ?1 AND lock_key = ?2 AND owner = ?3",
                params![category, key, owner],
            )
            .map_err(query_error("delete_if_owner"))?;
        Ok(deleted == 1)
    }

    fn delete_unconditional(&self, category: &str, key: &str) -> CorralResult<bool> {
        let conn = lock_connection(&self.conn)?;
        let deleted = conn
            .execute(
                "DELETE FROM distributed_locks WHERE category = ?1 AND lock_key = ?2",
                params![category, key],
            )
            .map_err(query_error("delete_unconditional"))?;
        Ok(deleted == 1)
    }

    fn delete_all_owned_by(&self, owner: &str) -> CorralResult<usize> {
        let conn = lock_connection(&self.conn)?;
        conn.execute(
            "DELETE FROM distributed_locks WHERE owner = ?1",
            params![owner],
        )
        .map_err(query_error("delete_all_owned_by"))
    }

    fn find_older_than(&self, cutoff: Timestamp) -> CorralResult<Vec<LockRecord>> {
        self.query_records(
            "find_older_than",
            &format!("{} WHERE acquire_time < ?1", SELECT_COLUMNS),
            cutoff.timestamp_millis(),
        )
    }

    fn find_all_owned_by(&self, owner: &str) -> CorralResult<Vec<LockRecord>> {
        self.query_records(
            "find_all_owned_by",
            &format!("{} WHERE owner = ?1", SELECT_COLUMNS),
            owner,
        )
    }

    fn count_by_category(&self, category: &str) -> CorralResult<usize> {
        let conn = lock_connection(&self.conn)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM distributed_locks WHERE category = ?1",
                params![category],
                |row| row.get(0),
            )
            .map_err(query_error("count_by_category"))?;
        Ok(count as usize)
    }

    fn keys_by_category(&self, category: &str) -> CorralResult<HashSet<String>> {
        let conn = lock_connection(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT lock_key FROM distributed_locks WHERE category = ?1")
            .map_err(query_error("keys_by_category"))?;
        let rows = stmt
            .query_map(params![category], |row| row.get::<_, String>(0))
            .map_err(query_error("keys_by_category"))?;
        rows.collect::<Result<HashSet<_>, _>>()
            .map_err(query_error("keys_by_category"))
    }
}
