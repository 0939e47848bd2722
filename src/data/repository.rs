use chrono::DateTime;
use rusqlite::{params, Connection, Row};

use crate::error::AppError;
use crate::models::record::{DirectoryRow, Permissions, Record, RecordKind, SyncStatus};
use crate::models::search::DateWindow;
use crate::scope_path;

const RECORD_COLUMNS: &str = "identifier, account, parent_path, name, is_directory, size, modified_at, favorite, encrypted, permissions, sync_status, content_type, live_photo, etag, upload_order";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let is_directory: bool = row.get(4)?;
    let modified_ms: i64 = row.get(6)?;
    let status_str: String = row.get(10)?;

    Ok(Record {
        identifier: row.get(0)?,
        account: row.get(1)?,
        parent_path: row.get(2)?,
        name: row.get(3)?,
        kind: if is_directory {
            RecordKind::Directory
        } else {
            RecordKind::File
        },
        size: row.get(5)?,
        modified_at: DateTime::from_timestamp_millis(modified_ms).unwrap_or_default(),
        favorite: row.get(7)?,
        encrypted: row.get(8)?,
        permissions: Permissions(row.get(9)?),
        sync_status: status_str.parse::<SyncStatus>().unwrap_or(SyncStatus::Error),
        content_type: row.get(11)?,
        live_photo: row.get(12)?,
        etag: row.get(13)?,
        upload_order: row.get(14)?,
    })
}

fn row_to_directory(row: &Row<'_>) -> rusqlite::Result<DirectoryRow> {
    Ok(DirectoryRow {
        account: row.get(0)?,
        path: row.get(1)?,
        identifier: row.get(2)?,
        encrypted: row.get(3)?,
        etag: row.get(4)?,
    })
}

/// Prefix (and its length in characters) shared by every path strictly
/// below `root`. Compared with `substr` so matching stays case-sensitive.
fn descendant_prefix(root: &str) -> (String, i64) {
    let root = scope_path::normalize(root);
    let prefix = if root == "/" { root } else { format!("{root}/") };
    let len = prefix.chars().count() as i64;
    (prefix, len)
}

pub fn upsert_record(conn: &Connection, record: &Record) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO records (identifier, account, parent_path, name, is_directory, size, modified_at, favorite, encrypted, permissions, sync_status, content_type, live_photo, etag, upload_order)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(account, identifier) DO UPDATE SET
            parent_path = excluded.parent_path,
            name = excluded.name,
            is_directory = excluded.is_directory,
            size = excluded.size,
            modified_at = excluded.modified_at,
            favorite = excluded.favorite,
            encrypted = excluded.encrypted,
            permissions = excluded.permissions,
            sync_status = excluded.sync_status,
            content_type = excluded.content_type,
            live_photo = excluded.live_photo,
            etag = excluded.etag,
            upload_order = excluded.upload_order",
        params![
            record.identifier,
            record.account,
            scope_path::normalize(&record.parent_path),
            record.name,
            record.is_directory(),
            record.size,
            record.modified_at.timestamp_millis(),
            record.favorite,
            record.encrypted,
            record.permissions.0,
            record.sync_status.to_string(),
            record.content_type,
            record.live_photo,
            record.etag,
            record.upload_order,
        ],
    )?;
    Ok(())
}

pub fn get_record(
    conn: &Connection,
    account: &str,
    identifier: &str,
) -> Result<Option<Record>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE account = ?1 AND identifier = ?2"
    ))?;
    let record = stmt
        .query_row(params![account, identifier], row_to_record)
        .optional()?;
    Ok(record)
}

pub fn get_by_path(
    conn: &Connection,
    account: &str,
    parent_path: &str,
    name: &str,
) -> Result<Option<Record>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE account = ?1 AND parent_path = ?2 AND name = ?3"
    ))?;
    let record = stmt
        .query_row(
            params![account, scope_path::normalize(parent_path), name],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

pub fn list_by_parent(
    conn: &Connection,
    account: &str,
    parent_path: &str,
) -> Result<Vec<Record>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE account = ?1 AND parent_path = ?2
         ORDER BY is_directory DESC, name ASC"
    ))?;
    let records = stmt
        .query_map(
            params![account, scope_path::normalize(parent_path)],
            row_to_record,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn list_by_status(
    conn: &Connection,
    account: &str,
    status: SyncStatus,
) -> Result<Vec<Record>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records WHERE account = ?1 AND sync_status = ?2
         ORDER BY upload_order ASC, name ASC"
    ))?;
    let records = stmt
        .query_map(params![account, status.to_string()], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn count_by_status(
    conn: &Connection,
    account: &str,
    status: SyncStatus,
) -> Result<usize, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE account = ?1 AND sync_status = ?2",
        params![account, status.to_string()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn max_upload_order(conn: &Connection, account: &str) -> Result<i64, AppError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(upload_order) FROM records WHERE account = ?1",
        params![account],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0))
}

pub fn list_media_in_window(
    conn: &Connection,
    account: &str,
    root: &str,
    window: &DateWindow,
) -> Result<Vec<Record>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records
         WHERE account = ?1
           AND (content_type LIKE 'image/%' OR content_type LIKE 'video/%')
           AND modified_at BETWEEN ?2 AND ?3"
    ))?;
    let records = stmt
        .query_map(
            params![
                account,
                window.gte.timestamp_millis(),
                window.lte.timestamp_millis()
            ],
            row_to_record,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records
        .into_iter()
        .filter(|r| scope_path::is_within_scope(&r.parent_path, root))
        .collect())
}

pub fn oldest_media_date(
    conn: &Connection,
    account: &str,
) -> Result<Option<DateTime<chrono::Utc>>, AppError> {
    let min: Option<i64> = conn.query_row(
        "SELECT MIN(modified_at) FROM records
         WHERE account = ?1 AND (content_type LIKE 'image/%' OR content_type LIKE 'video/%')",
        params![account],
        |row| row.get(0),
    )?;
    Ok(min.and_then(DateTime::from_timestamp_millis))
}

pub fn delete_record(conn: &Connection, account: &str, identifier: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM records WHERE account = ?1 AND identifier = ?2",
        params![account, identifier],
    )?;
    Ok(count)
}

/// Clears settled children of a folder; in-flight transfers stay.
pub fn delete_synced_in_folder(
    conn: &Connection,
    account: &str,
    parent_path: &str,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM records WHERE account = ?1 AND parent_path = ?2 AND sync_status = ?3",
        params![
            account,
            scope_path::normalize(parent_path),
            SyncStatus::Synced.to_string()
        ],
    )?;
    Ok(count)
}

/// Removes every record and directory row located inside `root` and returns
/// the removed records.
pub fn delete_subtree(conn: &Connection, account: &str, root: &str) -> Result<Vec<Record>, AppError> {
    let root = scope_path::normalize(root);
    let (prefix, len) = descendant_prefix(&root);

    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM records
         WHERE account = ?1 AND (parent_path = ?2 OR substr(parent_path, 1, ?4) = ?3)"
    ))?;
    let removed = stmt
        .query_map(params![account, root, prefix, len], row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;

    conn.execute(
        "DELETE FROM records WHERE account = ?1 AND (parent_path = ?2 OR substr(parent_path, 1, ?4) = ?3)",
        params![account, root, prefix, len],
    )?;
    conn.execute(
        "DELETE FROM directories WHERE account = ?1 AND (path = ?2 OR substr(path, 1, ?4) = ?3)",
        params![account, root, prefix, len],
    )?;
    Ok(removed)
}

/// Rewrites paths below `old_root` so they live below `new_root`.
pub fn rebase_subtree(
    conn: &Connection,
    account: &str,
    old_root: &str,
    new_root: &str,
) -> Result<usize, AppError> {
    let old_root = scope_path::normalize(old_root);
    let (prefix, len) = descendant_prefix(&old_root);

    let mut stmt = conn.prepare(
        "SELECT identifier, parent_path FROM records
         WHERE account = ?1 AND (parent_path = ?2 OR substr(parent_path, 1, ?4) = ?3)",
    )?;
    let children = stmt
        .query_map(params![account, old_root, prefix, len], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (identifier, parent_path) in &children {
        conn.execute(
            "UPDATE records SET parent_path = ?1 WHERE account = ?2 AND identifier = ?3",
            params![
                scope_path::rebase(parent_path, &old_root, new_root),
                account,
                identifier
            ],
        )?;
    }

    let mut stmt = conn.prepare(
        "SELECT path FROM directories WHERE account = ?1 AND (path = ?2 OR substr(path, 1, ?4) = ?3)",
    )?;
    let directories = stmt
        .query_map(params![account, old_root, prefix, len], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for path in &directories {
        conn.execute(
            "UPDATE directories SET path = ?1 WHERE account = ?2 AND path = ?3",
            params![scope_path::rebase(path, &old_root, new_root), account, path],
        )?;
    }

    Ok(children.len())
}

pub fn rename_record(
    conn: &Connection,
    account: &str,
    identifier: &str,
    new_name: &str,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE records SET name = ?1 WHERE account = ?2 AND identifier = ?3",
        params![new_name, account, identifier],
    )?;
    Ok(count)
}

pub fn move_record(
    conn: &Connection,
    account: &str,
    identifier: &str,
    new_parent: &str,
    new_name: &str,
    encrypted: bool,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE records SET parent_path = ?1, name = ?2, encrypted = ?3 WHERE account = ?4 AND identifier = ?5",
        params![
            scope_path::normalize(new_parent),
            new_name,
            encrypted,
            account,
            identifier
        ],
    )?;
    Ok(count)
}

pub fn set_favorite(
    conn: &Connection,
    account: &str,
    identifier: &str,
    favorite: bool,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE records SET favorite = ?1 WHERE account = ?2 AND identifier = ?3",
        params![favorite, account, identifier],
    )?;
    Ok(count)
}

pub fn set_sync_status(
    conn: &Connection,
    account: &str,
    identifier: &str,
    status: SyncStatus,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE records SET sync_status = ?1 WHERE account = ?2 AND identifier = ?3",
        params![status.to_string(), account, identifier],
    )?;
    Ok(count)
}

/// Finds the `.mov` companion of a live photo still in the same folder.
pub fn find_live_companion(conn: &Connection, record: &Record) -> Result<Option<Record>, AppError> {
    if record.is_directory() || record.extension().as_deref() == Some("mov") {
        return Ok(None);
    }
    let siblings = list_by_parent(conn, &record.account, &record.parent_path)?;
    Ok(siblings.into_iter().find(|sibling| {
        sibling.identifier != record.identifier
            && sibling.live_photo
            && sibling.extension().as_deref() == Some("mov")
            && sibling.base_name() == record.base_name()
    }))
}

pub fn upsert_directory(conn: &Connection, directory: &DirectoryRow) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO directories (account, path, identifier, encrypted, etag)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(account, path) DO UPDATE SET
            identifier = excluded.identifier,
            encrypted = excluded.encrypted,
            etag = excluded.etag",
        params![
            directory.account,
            scope_path::normalize(&directory.path),
            directory.identifier,
            directory.encrypted,
            directory.etag,
        ],
    )?;
    Ok(())
}

pub fn get_directory(
    conn: &Connection,
    account: &str,
    path: &str,
) -> Result<Option<DirectoryRow>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT account, path, identifier, encrypted, etag FROM directories WHERE account = ?1 AND path = ?2",
    )?;
    let directory = stmt
        .query_row(
            params![account, scope_path::normalize(path)],
            row_to_directory,
        )
        .optional()?;
    Ok(directory)
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
    let value = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) fn setup_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    crate::data::migrations::run_migrations(&conn).unwrap();
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::sample_record;

    const ACCOUNT: &str = "alice@cloud.example";

    fn directory(identifier: &str, parent: &str, name: &str) -> Record {
        let mut record = sample_record(identifier, parent, name);
        record.kind = RecordKind::Directory;
        record.size = 0;
        record
    }

    #[test]
    fn test_record_crud() {
        let conn = setup_db();
        let record = sample_record("oc1", "/docs", "readme.md");

        upsert_record(&conn, &record).unwrap();

        let fetched = get_record(&conn, ACCOUNT, "oc1").unwrap().unwrap();
        assert_eq!(fetched, record);

        let list = list_by_parent(&conn, ACCOUNT, "/docs/").unwrap();
        assert_eq!(list.len(), 1);

        assert_eq!(delete_record(&conn, ACCOUNT, "oc1").unwrap(), 1);
        assert!(get_record(&conn, ACCOUNT, "oc1").unwrap().is_none());
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let conn = setup_db();
        let mut record = sample_record("oc1", "/docs", "readme.md");
        upsert_record(&conn, &record).unwrap();
        record.size = 2048;
        record.favorite = true;
        upsert_record(&conn, &record).unwrap();

        let fetched = get_record(&conn, ACCOUNT, "oc1").unwrap().unwrap();
        assert_eq!(fetched.size, 2048);
        assert!(fetched.favorite);
        assert_eq!(list_by_parent(&conn, ACCOUNT, "/docs").unwrap().len(), 1);
    }

    #[test]
    fn test_identity_is_scoped_per_account() {
        let conn = setup_db();
        let record = sample_record("oc1", "/docs", "readme.md");
        let mut other = record.clone();
        other.account = "bob@cloud.example".to_string();
        upsert_record(&conn, &record).unwrap();
        upsert_record(&conn, &other).unwrap();

        assert!(get_record(&conn, ACCOUNT, "oc1").unwrap().is_some());
        assert!(get_record(&conn, "bob@cloud.example", "oc1").unwrap().is_some());
    }

    #[test]
    fn test_delete_synced_keeps_in_flight() {
        let conn = setup_db();
        let synced = sample_record("oc1", "/docs", "a.txt");
        let mut uploading = sample_record("oc2", "/docs", "b.txt");
        uploading.sync_status = SyncStatus::Uploading;
        upsert_record(&conn, &synced).unwrap();
        upsert_record(&conn, &uploading).unwrap();

        assert_eq!(delete_synced_in_folder(&conn, ACCOUNT, "/docs").unwrap(), 1);
        let left = list_by_parent(&conn, ACCOUNT, "/docs").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identifier, "oc2");
    }

    #[test]
    fn test_delete_subtree_cascades() {
        let conn = setup_db();
        upsert_record(&conn, &directory("d1", "/", "A")).unwrap();
        upsert_record(&conn, &sample_record("f1", "/A", "one.txt")).unwrap();
        upsert_record(&conn, &sample_record("f2", "/A/B", "two.txt")).unwrap();
        upsert_record(&conn, &sample_record("f3", "/AB", "keep.txt")).unwrap();
        upsert_directory(
            &conn,
            &DirectoryRow {
                account: ACCOUNT.to_string(),
                path: "/A/B".to_string(),
                identifier: "d2".to_string(),
                encrypted: false,
                etag: String::new(),
            },
        )
        .unwrap();

        let mut removed: Vec<String> = delete_subtree(&conn, ACCOUNT, "/A")
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["f1", "f2"]);
        assert!(get_record(&conn, ACCOUNT, "f3").unwrap().is_some());
        assert!(get_record(&conn, ACCOUNT, "d1").unwrap().is_some());
        assert!(get_directory(&conn, ACCOUNT, "/A/B").unwrap().is_none());
    }

    #[test]
    fn test_delete_subtree_matches_prefix_exactly() {
        let conn = setup_db();
        upsert_record(&conn, &sample_record("f1", "/a_b", "one.txt")).unwrap();
        upsert_record(&conn, &sample_record("f2", "/axb/c", "two.txt")).unwrap();
        upsert_record(&conn, &sample_record("f3", "/A_B/c", "three.txt")).unwrap();

        delete_subtree(&conn, ACCOUNT, "/a_b").unwrap();
        assert!(get_record(&conn, ACCOUNT, "f1").unwrap().is_none());
        assert!(get_record(&conn, ACCOUNT, "f2").unwrap().is_some());
        assert!(get_record(&conn, ACCOUNT, "f3").unwrap().is_some());
    }

    #[test]
    fn test_rebase_subtree() {
        let conn = setup_db();
        upsert_record(&conn, &sample_record("f1", "/A", "one.txt")).unwrap();
        upsert_record(&conn, &sample_record("f2", "/A/B", "two.txt")).unwrap();
        upsert_record(&conn, &sample_record("f3", "/AB", "three.txt")).unwrap();
        upsert_directory(
            &conn,
            &DirectoryRow {
                account: ACCOUNT.to_string(),
                path: "/A/B".to_string(),
                identifier: "d2".to_string(),
                encrypted: true,
                etag: String::new(),
            },
        )
        .unwrap();

        assert_eq!(rebase_subtree(&conn, ACCOUNT, "/A", "/Z").unwrap(), 2);
        assert_eq!(
            get_record(&conn, ACCOUNT, "f1").unwrap().unwrap().parent_path,
            "/Z"
        );
        assert_eq!(
            get_record(&conn, ACCOUNT, "f2").unwrap().unwrap().parent_path,
            "/Z/B"
        );
        assert_eq!(
            get_record(&conn, ACCOUNT, "f3").unwrap().unwrap().parent_path,
            "/AB"
        );
        assert!(get_directory(&conn, ACCOUNT, "/Z/B").unwrap().unwrap().encrypted);
    }

    #[test]
    fn test_find_live_companion() {
        let conn = setup_db();
        let still = sample_record("p1", "/Photos", "IMG_0001.HEIC");
        let mut mov = sample_record("p2", "/Photos", "IMG_0001.MOV");
        mov.live_photo = true;
        upsert_record(&conn, &still).unwrap();
        upsert_record(&conn, &mov).unwrap();
        upsert_record(&conn, &sample_record("p3", "/Photos", "IMG_0002.HEIC")).unwrap();

        let companion = find_live_companion(&conn, &still).unwrap().unwrap();
        assert_eq!(companion.identifier, "p2");
        assert!(find_live_companion(&conn, &mov).unwrap().is_none());
        let lonely = get_record(&conn, ACCOUNT, "p3").unwrap().unwrap();
        assert!(find_live_companion(&conn, &lonely).unwrap().is_none());
    }

    #[test]
    fn test_status_queries() {
        let conn = setup_db();
        let mut first = sample_record("u1", "/", "first.txt");
        first.sync_status = SyncStatus::PendingUpload;
        first.upload_order = 2;
        let mut second = sample_record("u2", "/", "second.txt");
        second.sync_status = SyncStatus::PendingUpload;
        second.upload_order = 1;
        upsert_record(&conn, &first).unwrap();
        upsert_record(&conn, &second).unwrap();

        let pending = list_by_status(&conn, ACCOUNT, SyncStatus::PendingUpload).unwrap();
        assert_eq!(pending[0].identifier, "u2");
        assert_eq!(
            count_by_status(&conn, ACCOUNT, SyncStatus::PendingUpload).unwrap(),
            2
        );
        assert_eq!(max_upload_order(&conn, ACCOUNT).unwrap(), 2);

        set_sync_status(&conn, ACCOUNT, "u2", SyncStatus::Uploading).unwrap();
        assert_eq!(
            count_by_status(&conn, ACCOUNT, SyncStatus::Uploading).unwrap(),
            1
        );
    }

    #[test]
    fn test_settings_round_trip() {
        let conn = setup_db();
        assert!(get_setting(&conn, "show_hidden").unwrap().is_none());
        set_setting(&conn, "show_hidden", "true").unwrap();
        set_setting(&conn, "show_hidden", "false").unwrap();
        assert_eq!(
            get_setting(&conn, "show_hidden").unwrap().as_deref(),
            Some("false")
        );
    }
}
