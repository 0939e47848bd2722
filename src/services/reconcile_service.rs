use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::data::repository;
use crate::error::AppError;
use crate::models::event::{ReconcileReport, SyncEvent};
use crate::models::record::{DirectoryRow, Permissions, Record, SyncStatus};
use crate::models::search::{DateWindow, MediaSearchReport, RemoteEntry};
use crate::scope_path;
use crate::services::lock_service;
use crate::services::signal_service::SignalQueue;
use crate::state::AppState;

/// A remote listing split into the folder's own entry and its children.
#[derive(Debug, Clone)]
pub struct ConvertedListing {
    pub folder: Option<RemoteEntry>,
    pub records: Vec<Record>,
}

pub fn to_record(account: &str, entry: &RemoteEntry, encrypted: bool) -> Record {
    Record {
        identifier: entry.identifier.clone(),
        account: account.to_string(),
        parent_path: scope_path::normalize(&entry.parent_path),
        name: entry.name.clone(),
        kind: entry.kind,
        size: if entry.kind.is_directory() { 0 } else { entry.size },
        modified_at: entry.modified_at,
        favorite: entry.favorite,
        encrypted,
        permissions: Permissions::parse(&entry.permissions),
        sync_status: SyncStatus::Synced,
        content_type: entry.content_type.clone(),
        live_photo: entry.live_photo,
        etag: entry.etag.clone(),
        upload_order: 0,
    }
}

pub fn convert_listing(
    account: &str,
    entries: &[RemoteEntry],
    show_hidden: bool,
    folder_encrypted: bool,
) -> Result<ConvertedListing, AppError> {
    let mut folder = None;
    let mut records = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();

    for entry in entries {
        if entry.name.is_empty() {
            folder = Some(entry.clone());
            continue;
        }
        if entry.identifier.trim().is_empty() {
            return Err(AppError::General(format!(
                "malformed listing: entry '{}' has no identifier",
                entry.name
            )));
        }
        if !seen.insert(entry.identifier.as_str()) {
            return Err(AppError::General(format!(
                "malformed listing: duplicate identifier {}",
                entry.identifier
            )));
        }
        if !show_hidden && entry.name.starts_with('.') {
            continue;
        }
        records.push(to_record(account, entry, folder_encrypted));
    }

    Ok(ConvertedListing { folder, records })
}

/// Keeps the status and queue position of a record that is mid-transfer.
fn preserve_transfer_state(fresh: &mut Record, prior: Option<&Record>) {
    if let Some(prior) = prior {
        if prior.sync_status.is_in_flight() {
            fresh.sync_status = prior.sync_status;
            fresh.upload_order = prior.upload_order;
        }
    }
}

fn register_child_directory(
    conn: &Connection,
    entry: &RemoteEntry,
    account: &str,
    path: &str,
    inherited: bool,
) -> Result<(), AppError> {
    let encrypted = inherited || entry.e2e_encrypted;
    let existing = repository::get_directory(conn, account, path)?;
    let unchanged = existing
        .as_ref()
        .is_some_and(|d| d.encrypted == encrypted && d.identifier == entry.identifier);
    if unchanged {
        return Ok(());
    }
    repository::upsert_directory(
        conn,
        &DirectoryRow {
            account: account.to_string(),
            path: path.to_string(),
            identifier: entry.identifier.clone(),
            encrypted,
            etag: existing.map(|d| d.etag).unwrap_or_default(),
        },
    )
}

/// Replaces the settled contents of `folder_path` with `entries` in one
/// transaction. Records mid-transfer survive untouched.
pub fn apply_listing(
    conn: &Connection,
    signals: &SignalQueue,
    account: &str,
    folder_path: &str,
    entries: &[RemoteEntry],
    show_hidden: bool,
) -> Result<ReconcileReport, AppError> {
    let folder_path = scope_path::normalize(folder_path);

    // The folder's own entry is authoritative for itself; only ancestors can
    // force encryption on top of it.
    let folder_encrypted = match entries.iter().find(|e| e.name.is_empty()) {
        Some(own) => {
            own.e2e_encrypted || lock_service::ancestor_encrypted(conn, account, &folder_path)?
        }
        None => lock_service::is_encrypted(conn, account, &folder_path)?,
    };

    let listing = convert_listing(account, entries, show_hidden, folder_encrypted)?;

    let tx = conn.unchecked_transaction()?;

    let prior: HashMap<String, Record> = repository::list_by_parent(&tx, account, &folder_path)?
        .into_iter()
        .map(|r| (r.identifier.clone(), r))
        .collect();

    if let Some(folder) = &listing.folder {
        repository::upsert_directory(
            &tx,
            &DirectoryRow {
                account: account.to_string(),
                path: folder_path.clone(),
                identifier: folder.identifier.clone(),
                encrypted: folder_encrypted,
                etag: folder.etag.clone(),
            },
        )?;
    }

    repository::delete_synced_in_folder(&tx, account, &folder_path)?;

    let mut report = ReconcileReport::default();
    let mut changed = Vec::new();
    let mut fresh_ids = HashSet::new();

    for mut record in listing.records {
        record.parent_path = folder_path.clone();
        let before = prior.get(&record.identifier);
        preserve_transfer_state(&mut record, before);
        repository::upsert_record(&tx, &record)?;

        if record.is_directory() {
            let entry = entries
                .iter()
                .find(|e| e.identifier == record.identifier)
                .ok_or_else(|| AppError::General("listing entry vanished".to_string()))?;
            register_child_directory(&tx, entry, account, &record.path(), folder_encrypted)?;
        }

        match before {
            None => {
                report.inserted += 1;
                changed.push(record.clone());
            }
            Some(prior) if prior.differs_from(&record) => {
                report.updated += 1;
                changed.push(record.clone());
            }
            Some(_) => {}
        }
        fresh_ids.insert(record.identifier.clone());
    }

    let removed: Vec<&Record> = prior
        .values()
        .filter(|r| !r.sync_status.is_in_flight() && !fresh_ids.contains(&r.identifier))
        .collect();
    let mut descendants = Vec::new();
    for record in &removed {
        if record.is_directory() {
            descendants.extend(repository::delete_subtree(&tx, account, &record.path())?);
        }
    }
    report.deleted = removed.len();

    tx.commit()?;

    signals.batch(|batch| {
        for record in &changed {
            batch.changed(record);
        }
        for record in removed.iter().copied().chain(&descendants) {
            batch.deleted(record);
        }
    });

    debug!(
        folder = %folder_path,
        inserted = report.inserted,
        updated = report.updated,
        deleted = report.deleted,
        "listing reconciled"
    );
    Ok(report)
}

/// Replaces media records dated inside `window` under `root` with a search
/// result set.
pub fn apply_media_search(
    conn: &Connection,
    signals: &SignalQueue,
    account: &str,
    root: &str,
    window: &DateWindow,
    entries: &[RemoteEntry],
    show_hidden: bool,
) -> Result<MediaSearchReport, AppError> {
    let mut fresh = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.name.is_empty() || (!show_hidden && entry.name.starts_with('.')) {
            continue;
        }
        if entry.identifier.trim().is_empty() {
            return Err(AppError::General(format!(
                "malformed search result: entry '{}' has no identifier",
                entry.name
            )));
        }
        let encrypted = lock_service::is_encrypted(conn, account, &entry.parent_path)?;
        fresh.push(to_record(account, entry, encrypted));
    }

    let tx = conn.unchecked_transaction()?;

    let prior: HashMap<String, Record> = repository::list_media_in_window(&tx, account, root, window)?
        .into_iter()
        .map(|r| (r.identifier.clone(), r))
        .collect();

    let mut report = MediaSearchReport::default();
    let mut changed = Vec::new();
    let mut fresh_ids = HashSet::new();

    for mut record in fresh {
        let before = match prior.get(&record.identifier) {
            Some(r) => Some(r.clone()),
            None => repository::get_record(&tx, account, &record.identifier)?,
        };
        preserve_transfer_state(&mut record, before.as_ref());
        match &before {
            None => {
                report.new_inserts += 1;
                changed.push(record.clone());
            }
            Some(prior) if prior.differs_from(&record) => changed.push(record.clone()),
            Some(_) => {}
        }
        repository::upsert_record(&tx, &record)?;
        fresh_ids.insert(record.identifier.clone());
    }

    let removed: Vec<&Record> = prior
        .values()
        .filter(|r| !r.sync_status.is_in_flight() && !fresh_ids.contains(&r.identifier))
        .collect();
    for record in &removed {
        repository::delete_record(&tx, account, &record.identifier)?;
    }

    tx.commit()?;

    report.is_different = !changed.is_empty() || !removed.is_empty();
    signals.batch(|batch| {
        for record in &changed {
            batch.changed(record);
        }
        for record in &removed {
            batch.deleted(record);
        }
    });
    Ok(report)
}

/// Lists `folder_path` remotely and mirrors the result into the store.
pub async fn refresh_folder(state: &AppState, folder_path: &str) -> Result<ReconcileReport, AppError> {
    let folder_path = scope_path::normalize(folder_path);
    let entries = match state.remote.list_folder(&state.account, &folder_path).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(folder = %folder_path, error = %e, "listing failed, store left untouched");
            return Err(e);
        }
    };

    let report = {
        let conn = state.conn()?;
        let settings = crate::services::settings_service::load(&conn)?;
        apply_listing(
            &conn,
            &state.signals,
            &state.account,
            &folder_path,
            &entries,
            settings.show_hidden,
        )?
    };

    if !report.is_empty() {
        info!(folder = %folder_path, ?report, "folder changed on server");
    }
    state.events.publish(SyncEvent::FolderReconciled {
        account: state.account.clone(),
        scope: folder_path,
        report: report.clone(),
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::setup_db;
    use crate::models::event::EventKind;
    use crate::models::record::RecordKind;
    use crate::services::remote_service::mock::{entry, MockRemote};
    use crate::state::test_state;
    use std::sync::Arc;

    const ACCOUNT: &str = "alice@cloud.example";

    fn listing() -> Vec<RemoteEntry> {
        vec![
            entry("root", "/A", "", RecordKind::Directory),
            entry("f1", "/A", "report.pdf", RecordKind::File),
            entry("f2", "/A", "notes.txt", RecordKind::File),
            entry("d1", "/A", "Sub", RecordKind::Directory),
            entry("h1", "/A", ".hidden", RecordKind::File),
        ]
    }

    #[test]
    fn empty_scope_gets_exactly_the_visible_entries() {
        let conn = setup_db();
        let signals = SignalQueue::new();

        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();

        assert_eq!(report.inserted, 3);
        let mut ids: Vec<String> = repository::list_by_parent(&conn, ACCOUNT, "/A")
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["d1", "f1", "f2"]);
        assert_eq!(signals.pending(), (3, 0));
    }

    #[test]
    fn show_hidden_includes_dotfiles() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), true).unwrap();
        assert_eq!(report.inserted, 4);
    }

    #[test]
    fn self_entry_becomes_directory_row() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();

        let dir = repository::get_directory(&conn, ACCOUNT, "/A").unwrap().unwrap();
        assert_eq!(dir.identifier, "root");
        assert_eq!(dir.etag, "etag-root");
        assert!(repository::get_record(&conn, ACCOUNT, "root").unwrap().is_none());
        assert!(repository::get_directory(&conn, ACCOUNT, "/A/Sub").unwrap().is_some());
    }

    #[test]
    fn second_identical_reconcile_is_a_no_op() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();
        signals.drain();

        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();
        assert!(report.is_empty());
        assert_eq!(signals.pending(), (0, 0));
    }

    #[test]
    fn changes_and_removals_are_reported() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();
        repository::upsert_record(
            &conn,
            &to_record(ACCOUNT, &entry("deep", "/A/Sub", "deep.txt", RecordKind::File), false),
        )
        .unwrap();
        signals.drain();

        let mut next = listing();
        next.retain(|e| e.identifier != "d1");
        next[1].etag = "etag-f1-v2".to_string();
        next[1].size = 4096;

        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &next, false).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.updated, 1);
        assert_eq!(report.deleted, 1);
        assert!(repository::get_record(&conn, ACCOUNT, "deep").unwrap().is_none());

        let snapshot = signals.drain();
        assert_eq!(snapshot.changed[0].identifier, "f1");
        assert_eq!(snapshot.deleted, vec!["d1".to_string(), "deep".to_string()]);
        assert!(snapshot.containers.contains("/A/Sub"));
    }

    #[test]
    fn in_flight_records_survive_refresh() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        let mut uploading = to_record(
            ACCOUNT,
            &entry("up1", "/A", "video.mp4", RecordKind::File),
            false,
        );
        uploading.sync_status = SyncStatus::Uploading;
        repository::upsert_record(&conn, &uploading).unwrap();

        let mut downloading = to_record(ACCOUNT, &entry("f1", "/A", "report.pdf", RecordKind::File), false);
        downloading.sync_status = SyncStatus::Downloading;
        repository::upsert_record(&conn, &downloading).unwrap();

        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();
        assert_eq!(report.deleted, 0);

        let kept = repository::get_record(&conn, ACCOUNT, "up1").unwrap().unwrap();
        assert_eq!(kept.sync_status, SyncStatus::Uploading);
        let merged = repository::get_record(&conn, ACCOUNT, "f1").unwrap().unwrap();
        assert_eq!(merged.sync_status, SyncStatus::Downloading);
    }

    #[test]
    fn records_outside_scope_are_untouched() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        let outside = to_record(ACCOUNT, &entry("x1", "/B", "other.txt", RecordKind::File), false);
        repository::upsert_record(&conn, &outside).unwrap();

        apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();
        apply_listing(&conn, &signals, ACCOUNT, "/A", &[], false).unwrap();

        assert!(repository::get_record(&conn, ACCOUNT, "x1").unwrap().is_some());
        assert!(repository::list_by_parent(&conn, ACCOUNT, "/A").unwrap().is_empty());
    }

    #[test]
    fn malformed_listing_aborts_without_writes() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        apply_listing(&conn, &signals, ACCOUNT, "/A", &listing(), false).unwrap();

        let mut broken = listing();
        broken[2].identifier = String::new();
        broken.remove(1);

        assert!(apply_listing(&conn, &signals, ACCOUNT, "/A", &broken, false).is_err());
        assert_eq!(repository::list_by_parent(&conn, ACCOUNT, "/A").unwrap().len(), 3);
    }

    #[test]
    fn encryption_flows_down_from_the_folder() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        let mut entries = listing();
        entries[0].e2e_encrypted = true;

        apply_listing(&conn, &signals, ACCOUNT, "/A", &entries, false).unwrap();

        let file = repository::get_record(&conn, ACCOUNT, "f1").unwrap().unwrap();
        assert!(file.encrypted);
        assert!(repository::get_directory(&conn, ACCOUNT, "/A/Sub").unwrap().unwrap().encrypted);

        let sub = vec![
            entry("d1", "/A/Sub", "", RecordKind::Directory),
            entry("s1", "/A/Sub", "secret.txt", RecordKind::File),
        ];
        apply_listing(&conn, &signals, ACCOUNT, "/A/Sub", &sub, false).unwrap();
        assert!(repository::get_record(&conn, ACCOUNT, "s1").unwrap().unwrap().encrypted);
    }

    #[test]
    fn folder_listing_can_clear_its_own_encryption() {
        let conn = setup_db();
        let signals = SignalQueue::new();
        let mut entries = listing();
        entries[0].e2e_encrypted = true;
        apply_listing(&conn, &signals, ACCOUNT, "/A", &entries, false).unwrap();
        assert!(repository::get_directory(&conn, ACCOUNT, "/A").unwrap().unwrap().encrypted);

        entries[0].e2e_encrypted = false;
        let report = apply_listing(&conn, &signals, ACCOUNT, "/A", &entries, false).unwrap();

        assert_eq!(report.updated, 3);
        assert!(!repository::get_directory(&conn, ACCOUNT, "/A").unwrap().unwrap().encrypted);
        assert!(!repository::get_record(&conn, ACCOUNT, "f1").unwrap().unwrap().encrypted);
        assert!(!repository::get_directory(&conn, ACCOUNT, "/A/Sub").unwrap().unwrap().encrypted);
        assert!(!lock_service::is_encrypted(&conn, ACCOUNT, "/A").unwrap());
    }

    #[test]
    fn media_search_replaces_window() {
        use chrono::{Duration, TimeZone, Utc};

        let conn = setup_db();
        let signals = SignalQueue::new();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = DateWindow {
            lte: now,
            gte: now - Duration::days(30),
        };

        let mut photo = entry("p1", "/Photos", "IMG_1.jpg", RecordKind::File);
        photo.content_type = Some("image/jpeg".to_string());
        photo.modified_at = now - Duration::days(3);
        let mut stale = photo.clone();
        stale.identifier = "p0".to_string();
        stale.name = "IMG_0.jpg".to_string();

        let first =
            apply_media_search(&conn, &signals, ACCOUNT, "/", &window, &[photo.clone(), stale], false)
                .unwrap();
        assert!(first.is_different);
        assert_eq!(first.new_inserts, 2);

        let second =
            apply_media_search(&conn, &signals, ACCOUNT, "/", &window, &[photo.clone()], false)
                .unwrap();
        assert!(second.is_different);
        assert_eq!(second.new_inserts, 0);
        assert!(repository::get_record(&conn, ACCOUNT, "p0").unwrap().is_none());

        let third =
            apply_media_search(&conn, &signals, ACCOUNT, "/", &window, &[photo], false).unwrap();
        assert!(!third.is_different);
    }

    #[tokio::test]
    async fn refresh_folder_publishes_report() {
        let remote = Arc::new(MockRemote::new());
        remote.set_folder("/A", listing());
        let state = test_state(remote.clone());
        let mut rx = state.events.receiver();

        let report = refresh_folder(&state, "/A/").await.unwrap();
        assert_eq!(report.inserted, 3);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::FolderReconciled);
        assert_eq!(remote.calls(), vec!["list /A"]);
    }

    #[tokio::test]
    async fn failed_listing_leaves_store_alone() {
        let remote = Arc::new(MockRemote::new());
        remote.set_folder("/A", listing());
        let state = test_state(remote.clone());
        refresh_folder(&state, "/A").await.unwrap();

        remote.fail("list /A", 503, "maintenance");
        let err = refresh_folder(&state, "/A").await.unwrap_err();
        assert_eq!(err.error_code(), 503);

        let conn = state.conn().unwrap();
        assert_eq!(repository::list_by_parent(&conn, ACCOUNT, "/A").unwrap().len(), 3);
    }
}
