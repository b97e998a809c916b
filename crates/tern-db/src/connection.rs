use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tern_common::{Error, Result};
use tracing::info;

/// Open the target database with the pragmas every run expects.
pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

    conn.busy_timeout(busy_timeout)
        .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

    Ok(conn)
}
