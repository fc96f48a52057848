use crate::core::error;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Busy timeout for every connection; commits from concurrent workstations queue here.
const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, error::UnitpassError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
        .map_err(error::UnitpassError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::UnitpassError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::UnitpassError::RusqliteError)?;
    Ok(conn)
}

/// Make sure the store directory exists before any database is opened in it.
pub fn ensure_store_dir(root: &Path) -> Result<(), error::UnitpassError> {
    fs::create_dir_all(root).map_err(|e| {
        error::UnitpassError::DatabaseInitializationError(format!(
            "cannot create store directory {}: {}",
            root.display(),
            e
        ))
    })
}

// Subsystems own their tables and initialization; see `subsystems.rs` for the order.
