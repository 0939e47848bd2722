use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::data::repository;
use crate::error::AppError;
use crate::models::event::SyncEvent;
use crate::models::operation::{MutationKind, Outcome};
use crate::models::record::{DirectoryRow, Record, RecordKind};
use crate::naming;
use crate::scope_path;
use crate::services::lock_service;
use crate::services::reconcile_service;
use crate::state::AppState;

fn load_record(state: &AppState, identifier: &str) -> Result<Record, AppError> {
    let conn = state.conn()?;
    repository::get_record(&conn, &state.account, identifier)?
        .ok_or_else(|| AppError::NotFound(format!("record {identifier}")))
}

fn reload(conn: &rusqlite::Connection, state: &AppState, identifier: &str) -> Result<Record, AppError> {
    repository::get_record(conn, &state.account, identifier)?
        .ok_or_else(|| AppError::NotFound(format!("record {identifier}")))
}

fn report(kind: MutationKind, subject: &str, outcome: &Outcome) {
    if outcome.is_success() {
        info!(%kind, subject, "mutation completed");
    } else {
        warn!(
            %kind,
            subject,
            code = outcome.error_code,
            error = %outcome.error_description,
            "mutation failed"
        );
    }
}

fn spawn_rebuild(state: &AppState, folder: &DirectoryRow) {
    let remote = Arc::clone(&state.remote);
    let account = state.account.clone();
    let path = folder.path.clone();
    let handle = tokio::spawn(async move {
        match remote.rebuild_manifest(&account, &path).await {
            Ok(()) => debug!(folder = %path, "manifest rebuilt"),
            Err(e) => warn!(folder = %path, error = %e, "manifest rebuild failed"),
        }
    });
    state.track_rebuild(handle);
}

/// Runs `mutation` under the folder's lock when `folder` is encrypted.
///
/// The manifest is rebuilt whenever the mutation returns `Ok`, and the lock
/// is released whatever it returns. Once the mutation is applied the result
/// stands: a failed unlock is logged and published as
/// [`SyncEvent::FolderUnlockFailed`] instead of turning the outcome into an
/// error.
async fn with_folder_lock<T, Fut>(
    state: &AppState,
    folder: Option<DirectoryRow>,
    mutation: Fut,
) -> Result<T, AppError>
where
    Fut: Future<Output = Result<T, AppError>>,
{
    let Some(folder) = folder else {
        return mutation.await;
    };

    let lock = state
        .locks
        .acquire(state.remote.as_ref(), &state.account, &folder)
        .await?;

    let result = mutation.await;
    if result.is_ok() {
        spawn_rebuild(state, &folder);
    }

    if let Err(e) = state
        .locks
        .release(state.remote.as_ref(), &state.account, lock)
        .await
    {
        state.events.publish(SyncEvent::FolderUnlockFailed {
            account: state.account.clone(),
            folder: folder.path.clone(),
            outcome: Outcome::from(&e),
        });
    }

    result
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

async fn delete_one(state: &AppState, record: &Record) -> Result<(), AppError> {
    match state.remote.delete(&state.account, &record.path()).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            debug!(path = %record.path(), "already gone on server");
        }
        Err(e) => return Err(e),
    }

    let conn = state.conn()?;
    let tx = conn.unchecked_transaction()?;
    let descendants = if record.is_directory() {
        repository::delete_subtree(&tx, &state.account, &record.path())?
    } else {
        Vec::new()
    };
    repository::delete_record(&tx, &state.account, &record.identifier)?;
    tx.commit()?;

    state.signals.batch(|batch| {
        for removed in std::iter::once(record).chain(&descendants) {
            batch.deleted(removed);
        }
    });
    Ok(())
}

async fn delete_flow(state: &AppState, record: &Record) -> Result<(), AppError> {
    if !record.permissions.can_delete() {
        return Err(AppError::PermissionDenied(format!(
            "no permission to delete {}",
            record.name
        )));
    }

    let (companion, folder) = {
        let conn = state.conn()?;
        (
            repository::find_live_companion(&conn, record)?,
            lock_service::encrypted_folder(&conn, &state.account, &record.parent_path)?,
        )
    };

    // The inner result carries a primary failure that happened after the
    // companion was already removed, so the folder still gets its rebuild.
    let primary = with_folder_lock(state, folder, async {
        let companion_removed = match &companion {
            Some(companion) => {
                delete_one(state, companion).await?;
                true
            }
            None => false,
        };
        match delete_one(state, record).await {
            Err(e) if !companion_removed => Err(e),
            result => Ok::<_, AppError>(result),
        }
    })
    .await?;
    primary
}

/// Deletes the item remotely, then locally. A 404 from the server counts as
/// already deleted.
pub async fn delete(state: &AppState, identifier: &str) -> Outcome {
    let record = match load_record(state, identifier) {
        Ok(record) => record,
        Err(e) => return rejected(MutationKind::Delete, identifier, &e),
    };

    let outcome = Outcome::from(delete_flow(state, &record).await);
    report(MutationKind::Delete, &record.path(), &outcome);
    state.events.publish(SyncEvent::DeleteFile {
        record,
        outcome: outcome.clone(),
    });
    outcome
}

// ---------------------------------------------------------------------------
// Rename
// ---------------------------------------------------------------------------

async fn rename_flow(state: &AppState, record: &Record, new_name: &str) -> Result<Record, AppError> {
    if !record.permissions.can_update() {
        return Err(AppError::PermissionDenied(format!(
            "no permission to rename {}",
            record.name
        )));
    }
    let name = naming::validate_file_name(new_name)?;
    if name == record.name {
        return Ok(record.clone());
    }

    let folder = {
        let conn = state.conn()?;
        if repository::get_by_path(&conn, &state.account, &record.parent_path, &name)?.is_some() {
            return Err(AppError::Validation(format!(
                "an item named {name} already exists"
            )));
        }
        lock_service::encrypted_folder(&conn, &state.account, &record.parent_path)?
    };

    let old_path = record.path();
    let new_path = scope_path::join(&record.parent_path, &name);

    with_folder_lock(state, folder, async {
        state
            .remote
            .move_item(&state.account, &old_path, &new_path, false)
            .await?;

        let conn = state.conn()?;
        let tx = conn.unchecked_transaction()?;
        repository::rename_record(&tx, &state.account, &record.identifier, &name)?;
        if record.is_directory() {
            repository::rebase_subtree(&tx, &state.account, &old_path, &new_path)?;
        }
        tx.commit()?;

        let updated = reload(&conn, state, &record.identifier)?;
        state.signals.signal_changed(&updated);
        Ok::<_, AppError>(updated)
    })
    .await
}

pub async fn rename(state: &AppState, identifier: &str, new_name: &str) -> Outcome {
    let record = match load_record(state, identifier) {
        Ok(record) => record,
        Err(e) => return rejected(MutationKind::Rename, identifier, &e),
    };

    let (record, outcome) = match rename_flow(state, &record, new_name).await {
        Ok(updated) => (updated, Outcome::success()),
        Err(e) => (record, Outcome::from(&e)),
    };
    report(MutationKind::Rename, &record.path(), &outcome);
    state.events.publish(SyncEvent::RenameFile {
        record,
        new_name: new_name.to_string(),
        outcome: outcome.clone(),
    });
    outcome
}

// ---------------------------------------------------------------------------
// Favorite
// ---------------------------------------------------------------------------

async fn favorite_flow(state: &AppState, record: &Record, favorite: bool) -> Result<Record, AppError> {
    state
        .remote
        .set_favorite(&state.account, &record.path(), favorite)
        .await?;

    let conn = state.conn()?;
    repository::set_favorite(&conn, &state.account, &record.identifier, favorite)?;
    reload(&conn, state, &record.identifier)
}

/// Favorites never touch the encrypted manifest, so no folder lock is taken.
pub async fn set_favorite(state: &AppState, identifier: &str, favorite: bool) -> Outcome {
    let record = match load_record(state, identifier) {
        Ok(record) => record,
        Err(e) => return rejected(MutationKind::Favorite, identifier, &e),
    };

    let (record, outcome) = match favorite_flow(state, &record, favorite).await {
        Ok(updated) => (updated, Outcome::success()),
        Err(e) => (record, Outcome::from(&e)),
    };
    // On failure this re-announces the unchanged record so the browser reverts.
    state.signals.signal_changed(&record);
    report(MutationKind::Favorite, &record.path(), &outcome);
    state.events.publish(SyncEvent::FavoriteFile {
        record,
        favorite,
        outcome: outcome.clone(),
    });
    outcome
}

// ---------------------------------------------------------------------------
// Create folder
// ---------------------------------------------------------------------------

fn parent_record(
    conn: &rusqlite::Connection,
    account: &str,
    folder_path: &str,
) -> Result<Option<Record>, AppError> {
    let Some(grandparent) = scope_path::parent(folder_path) else {
        return Ok(None);
    };
    let name = folder_path.rsplit('/').next().unwrap_or_default();
    repository::get_by_path(conn, account, &grandparent, name)
}

async fn create_flow(state: &AppState, parent_path: &str, name: &str) -> Result<Record, AppError> {
    let cleaned = naming::validate_file_name(&naming::remove_forbidden_characters(name))?;

    let (folder_name, folder) = {
        let conn = state.conn()?;
        if let Some(parent) = parent_record(&conn, &state.account, parent_path)? {
            if !parent.permissions.can_create() {
                return Err(AppError::PermissionDenied(format!(
                    "no permission to create folders in {}",
                    parent.name
                )));
            }
        }
        let existing: Vec<String> = repository::list_by_parent(&conn, &state.account, parent_path)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        (
            naming::unique_name(&cleaned, &existing, true),
            lock_service::encrypted_folder(&conn, &state.account, parent_path)?,
        )
    };

    let path = scope_path::join(parent_path, &folder_name);
    let encrypted = folder.is_some();

    with_folder_lock(state, folder, async {
        let entry = state.remote.create_folder(&state.account, &path).await?;
        if encrypted {
            state
                .remote
                .mark_encrypted(&state.account, &entry.identifier, &path)
                .await?;
        }

        let mut record = reconcile_service::to_record(&state.account, &entry, encrypted);
        record.parent_path = parent_path.to_string();
        record.name = folder_name.clone();
        record.kind = RecordKind::Directory;

        let conn = state.conn()?;
        let tx = conn.unchecked_transaction()?;
        repository::upsert_record(&tx, &record)?;
        repository::upsert_directory(
            &tx,
            &DirectoryRow {
                account: state.account.clone(),
                path: path.clone(),
                identifier: entry.identifier.clone(),
                encrypted,
                etag: entry.etag.clone(),
            },
        )?;
        tx.commit()?;

        state.signals.signal_changed(&record);
        Ok::<_, AppError>(record)
    })
    .await
}

/// Creates `name` under `parent_path`, suffixing ` (n)` when the name is
/// already taken in that folder.
pub async fn create_folder(state: &AppState, parent_path: &str, name: &str) -> Outcome {
    let parent_path = scope_path::normalize(parent_path);

    let (record, name, outcome) = match create_flow(state, &parent_path, name).await {
        Ok(record) => {
            let name = record.name.clone();
            (Some(record), name, Outcome::success())
        }
        Err(e) => (
            None,
            naming::remove_forbidden_characters(name),
            Outcome::from(&e),
        ),
    };
    report(
        MutationKind::CreateFolder,
        &scope_path::join(&parent_path, &name),
        &outcome,
    );
    state.events.publish(SyncEvent::CreateFolder {
        parent_path,
        name,
        record,
        outcome: outcome.clone(),
    });
    outcome
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

async fn move_flow(state: &AppState, record: &Record, destination: &str) -> Result<Record, AppError> {
    if !record.permissions.can_update() {
        return Err(AppError::PermissionDenied(format!(
            "no permission to move {}",
            record.name
        )));
    }
    if destination == record.parent_path {
        return Ok(record.clone());
    }
    let old_path = record.path();
    if record.is_directory() && scope_path::is_within_scope(destination, &old_path) {
        return Err(AppError::Validation(format!(
            "cannot move {} into itself",
            record.name
        )));
    }

    {
        let conn = state.conn()?;
        if record.encrypted
            || lock_service::is_encrypted(&conn, &state.account, &record.parent_path)?
            || lock_service::is_encrypted(&conn, &state.account, destination)?
        {
            return Err(AppError::Validation(
                "moving encrypted items is not supported".to_string(),
            ));
        }
        if repository::get_by_path(&conn, &state.account, destination, &record.name)?.is_some() {
            return Err(AppError::Validation(format!(
                "an item named {} already exists in {destination}",
                record.name
            )));
        }
    }

    let new_path = scope_path::join(destination, &record.name);
    state
        .remote
        .move_item(&state.account, &old_path, &new_path, false)
        .await?;

    let conn = state.conn()?;
    let tx = conn.unchecked_transaction()?;
    repository::move_record(
        &tx,
        &state.account,
        &record.identifier,
        destination,
        &record.name,
        false,
    )?;
    if record.is_directory() {
        repository::rebase_subtree(&tx, &state.account, &old_path, &new_path)?;
    }
    tx.commit()?;

    let updated = reload(&conn, state, &record.identifier)?;
    state.signals.signal_changed(&updated);
    Ok(updated)
}

/// Moves the item into the folder `destination`, keeping its name.
pub async fn move_record(state: &AppState, identifier: &str, destination: &str) -> Outcome {
    let record = match load_record(state, identifier) {
        Ok(record) => record,
        Err(e) => return rejected(MutationKind::Move, identifier, &e),
    };
    let destination = scope_path::normalize(destination);

    let (record, outcome) = match move_flow(state, &record, &destination).await {
        Ok(updated) => (updated, Outcome::success()),
        Err(e) => (record, Outcome::from(&e)),
    };
    report(MutationKind::Move, &record.path(), &outcome);
    state.events.publish(SyncEvent::MoveFile {
        record,
        destination,
        outcome: outcome.clone(),
    });
    outcome
}

/// The record could not be loaded, so there is nothing to attach an event to.
fn rejected(kind: MutationKind, identifier: &str, error: &AppError) -> Outcome {
    let outcome = Outcome::from(error);
    report(kind, identifier, &outcome);
    outcome
}
