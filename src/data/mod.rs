pub mod migrations;
pub mod repository;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

const DATABASE_FILE: &str = "cloudsync.db";

pub fn default_database_path() -> Result<PathBuf, AppError> {
    let dirs = directories::ProjectDirs::from("com", "cloudsync", "cloudsync")
        .ok_or_else(|| AppError::General("could not resolve app data dir".to_string()))?;
    Ok(dirs.data_dir().join(DATABASE_FILE))
}

pub fn open_database(db_path: &Path) -> Result<Connection, AppError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}
