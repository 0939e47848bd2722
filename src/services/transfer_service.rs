use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data::repository;
use crate::error::AppError;
use crate::models::event::SyncEvent;
use crate::models::record::{Permissions, Record, RecordKind, SyncStatus};
use crate::models::search::RemoteEntry;
use crate::naming;
use crate::scope_path;
use crate::services::lock_service;
use crate::services::reconcile_service;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub parent_path: String,
    pub name: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub modified_at: DateTime<Utc>,
}

fn announce(state: &AppState, record: &Record) {
    state.signals.signal_changed(record);
    state.events.publish(SyncEvent::TransferChanged {
        record: record.clone(),
    });
}

/// Moves a record between transfer states, refusing transitions that do not
/// start from one of `from`.
fn transition(
    state: &AppState,
    identifier: &str,
    from: &[SyncStatus],
    to: SyncStatus,
) -> Result<Record, AppError> {
    let record = {
        let conn = state.conn()?;
        let mut record = repository::get_record(&conn, &state.account, identifier)?
            .ok_or_else(|| AppError::NotFound(format!("record {identifier}")))?;
        if !from.contains(&record.sync_status) {
            return Err(AppError::Validation(format!(
                "{} cannot go from {} to {to}",
                record.name, record.sync_status
            )));
        }
        repository::set_sync_status(&conn, &state.account, identifier, to)?;
        record.sync_status = to;
        record
    };

    debug!(identifier, status = %to, "transfer state changed");
    announce(state, &record);
    Ok(record)
}

/// Records a local file as waiting for upload under a placeholder identifier.
pub fn queue_upload(state: &AppState, request: UploadRequest) -> Result<Record, AppError> {
    let name = naming::validate_file_name(&request.name)?;
    let parent_path = scope_path::normalize(&request.parent_path);

    let record = {
        let conn = state.conn()?;
        let record = Record {
            identifier: format!("upload-{}", Uuid::new_v4()),
            account: state.account.clone(),
            parent_path: parent_path.clone(),
            name,
            kind: RecordKind::File,
            size: request.size,
            modified_at: request.modified_at,
            favorite: false,
            encrypted: lock_service::is_encrypted(&conn, &state.account, &parent_path)?,
            permissions: Permissions::ALL,
            sync_status: SyncStatus::PendingUpload,
            content_type: request.content_type,
            live_photo: false,
            etag: String::new(),
            upload_order: repository::max_upload_order(&conn, &state.account)? + 1,
        };
        repository::upsert_record(&conn, &record)?;
        record
    };

    info!(path = %record.path(), order = record.upload_order, "upload queued");
    announce(state, &record);
    Ok(record)
}

/// Oldest waiting upload, or `None` while the concurrency cap is reached.
pub fn next_upload(state: &AppState) -> Result<Option<Record>, AppError> {
    let conn = state.conn()?;
    let settings = crate::services::settings_service::load(&conn)?;
    let active = repository::count_by_status(&conn, &state.account, SyncStatus::Uploading)?;
    if active >= settings.max_concurrent_uploads {
        debug!(active, cap = settings.max_concurrent_uploads, "upload slots full");
        return Ok(None);
    }
    Ok(
        repository::list_by_status(&conn, &state.account, SyncStatus::PendingUpload)?
            .into_iter()
            .next(),
    )
}

pub fn upload_started(state: &AppState, identifier: &str) -> Result<Record, AppError> {
    transition(
        state,
        identifier,
        &[SyncStatus::PendingUpload],
        SyncStatus::Uploading,
    )
}

/// Settles an upload. On success the placeholder is replaced by the record
/// the server reported.
pub fn upload_finished(
    state: &AppState,
    identifier: &str,
    result: Result<RemoteEntry, AppError>,
) -> Result<Record, AppError> {
    let entry = match result {
        Ok(entry) => entry,
        Err(e) => {
            warn!(identifier, error = %e, "upload failed");
            return transition(state, identifier, &[SyncStatus::Uploading], SyncStatus::Error);
        }
    };

    let (placeholder, uploaded) = {
        let conn = state.conn()?;
        let placeholder = repository::get_record(&conn, &state.account, identifier)?
            .ok_or_else(|| AppError::NotFound(format!("record {identifier}")))?;
        if placeholder.sync_status != SyncStatus::Uploading {
            return Err(AppError::Validation(format!(
                "{} is not uploading",
                placeholder.name
            )));
        }

        let mut uploaded = reconcile_service::to_record(&state.account, &entry, placeholder.encrypted);
        uploaded.parent_path = placeholder.parent_path.clone();
        uploaded.name = placeholder.name.clone();
        uploaded.upload_order = placeholder.upload_order;

        let tx = conn.unchecked_transaction()?;
        repository::delete_record(&tx, &state.account, &placeholder.identifier)?;
        repository::upsert_record(&tx, &uploaded)?;
        tx.commit()?;
        (placeholder, uploaded)
    };

    info!(path = %uploaded.path(), identifier = %uploaded.identifier, "upload finished");
    state.signals.batch(|batch| {
        batch.deleted(&placeholder);
        batch.changed(&uploaded);
    });
    state.events.publish(SyncEvent::TransferChanged {
        record: uploaded.clone(),
    });
    Ok(uploaded)
}

pub fn retry_upload(state: &AppState, identifier: &str) -> Result<Record, AppError> {
    transition(state, identifier, &[SyncStatus::Error], SyncStatus::PendingUpload)
}

pub fn queue_download(state: &AppState, identifier: &str) -> Result<Record, AppError> {
    let record = {
        let conn = state.conn()?;
        repository::get_record(&conn, &state.account, identifier)?
    };
    if record.as_ref().is_some_and(Record::is_directory) {
        return Err(AppError::Validation("folders are not downloaded".to_string()));
    }
    transition(
        state,
        identifier,
        &[SyncStatus::Synced, SyncStatus::Error],
        SyncStatus::PendingDownload,
    )
}

pub fn download_started(state: &AppState, identifier: &str) -> Result<Record, AppError> {
    transition(
        state,
        identifier,
        &[SyncStatus::PendingDownload],
        SyncStatus::Downloading,
    )
}

pub fn download_finished(
    state: &AppState,
    identifier: &str,
    result: Result<(), AppError>,
) -> Result<Record, AppError> {
    let to = match result {
        Ok(()) => SyncStatus::Synced,
        Err(e) => {
            warn!(identifier, error = %e, "download failed");
            SyncStatus::Error
        }
    };
    transition(state, identifier, &[SyncStatus::Downloading], to)
}
