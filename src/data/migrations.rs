use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL,
    account TEXT NOT NULL,
    parent_path TEXT NOT NULL,
    name TEXT NOT NULL,
    is_directory BOOLEAN DEFAULT 0,
    size INTEGER DEFAULT 0,
    modified_at INTEGER NOT NULL,
    favorite BOOLEAN DEFAULT 0,
    encrypted BOOLEAN DEFAULT 0,
    permissions INTEGER DEFAULT 31,
    sync_status TEXT NOT NULL DEFAULT 'synced',
    content_type TEXT,
    live_photo BOOLEAN DEFAULT 0,
    etag TEXT NOT NULL DEFAULT '',
    upload_order INTEGER DEFAULT 0,
    UNIQUE(account, identifier)
);

CREATE INDEX IF NOT EXISTS idx_records_parent ON records(account, parent_path);
CREATE INDEX IF NOT EXISTS idx_records_status ON records(account, sync_status);
CREATE INDEX IF NOT EXISTS idx_records_modified ON records(account, modified_at DESC);

CREATE TABLE IF NOT EXISTS directories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account TEXT NOT NULL,
    path TEXT NOT NULL,
    identifier TEXT NOT NULL,
    encrypted BOOLEAN DEFAULT 0,
    etag TEXT NOT NULL DEFAULT '',
    UNIQUE(account, path)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

pub fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch(SCHEMA_V1)?;
    Ok(())
}
