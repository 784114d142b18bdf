//! SQLite-backed stores.
//!
//! Each store owns one connection behind a mutex. Opening several stores on
//! the same database file gives several independent handles onto one shared
//! table, which is how a multi-node cluster sees its database.

mod acls;
mod locks;

pub use acls::SqliteAclStore;
pub use locks::SqliteLockStore;

use corral_core::{CorralError, CorralResult, StorageError};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits on another handle's write lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn open_connection(path: &Path) -> CorralResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(path, flags).map_err(connection_error)?;
    apply_pragmas(&connection)?;
    Ok(connection)
}

fn open_memory_connection() -> CorralResult<Connection> {
    let connection = Connection::open_in_memory().map_err(connection_error)?;
    apply_pragmas(&connection)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection) -> CorralResult<()> {
    connection
        .busy_timeout(DEFAULT_BUSY_TIMEOUT)
        .map_err(connection_error)?;
    connection
        .execute_batch("PRAGMA journal_mode = WAL;")
        .map_err(connection_error)?;
    connection
        .execute_batch("PRAGMA synchronous = NORMAL;")
        .map_err(connection_error)?;
    Ok(())
}

fn connection_error(err: rusqlite::Error) -> CorralError {
    CorralError::Storage(StorageError::Connection {
        reason: err.to_string(),
    })
}

fn lock_connection(conn: &Mutex<Connection>) -> CorralResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| CorralError::Storage(StorageError::LockPoisoned))
}

/// Map a driver error to a query error tagged with the store operation.
fn query_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> CorralError {
    move |err| CorralError::Storage(StorageError::query(operation, err))
}
