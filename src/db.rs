use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;

use crate::error::{AvaBotError, Result};

const PRAGMAS: [&str; 2] = ["PRAGMA busy_timeout = 5000", "PRAGMA foreign_keys = ON"];

pub fn ensure_parent_dir(path: &str) -> Result<()> {
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AvaBotError::Database(format!(
                    "Failed to create database directory {}: {e}",
                    parent.to_string_lossy()
                ))
            })?;
        }
    }
    Ok(())
}

pub fn apply_pragmas_sync(conn: &mut SqliteConnection) -> Result<()> {
    for pragma in PRAGMAS {
        diesel::RunQueryDsl::execute(diesel::sql_query(pragma), conn)
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
    }
    Ok(())
}

pub async fn apply_pragmas_async(conn: &mut SyncConnectionWrapper<SqliteConnection>) -> Result<()> {
    for pragma in PRAGMAS {
        diesel_async::RunQueryDsl::execute(diesel::sql_query(pragma), conn)
            .await
            .map_err(|e| AvaBotError::Database(e.to_string()))?;
    }
    Ok(())
}

pub fn open_sync(path: &str) -> Result<SqliteConnection> {
    ensure_parent_dir(path)?;
    let mut conn =
        SqliteConnection::establish(path).map_err(|e| AvaBotError::Database(e.to_string()))?;
    apply_pragmas_sync(&mut conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_sync_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("users.db");
        let path = path.to_string_lossy().to_string();

        open_sync(&path).unwrap();
        assert!(Path::new(&path).exists());
    }
}
