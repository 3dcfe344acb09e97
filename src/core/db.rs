use crate::core::error::StorageError;
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &Path, timeout: Duration) -> Result<Connection, StorageError> {
    if let Some(parent_dir) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent_dir).map_err(StorageError::IoError)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(timeout)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

pub fn apply_schemas(conn: &Connection, schemas: &[&str]) -> Result<(), StorageError> {
    for schema in schemas {
        conn.execute(schema, [])?;
    }
    Ok(())
}
