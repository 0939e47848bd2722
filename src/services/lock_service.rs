use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::data::repository;
use crate::error::AppError;
use crate::models::record::DirectoryRow;
use crate::scope_path;
use crate::services::remote_service::RemoteApi;

/// Per-folder serialization for encrypted-folder mutations. Different
/// folders never wait on each other.
#[derive(Debug, Default)]
pub struct DirectoryLocks {
    folders: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// A held lock on one encrypted folder. Must be handed back through
/// [`DirectoryLock::release`] so the server-side token is returned.
#[derive(Debug)]
pub struct DirectoryLock {
    pub folder: DirectoryRow,
    pub token: String,
    _guard: OwnedMutexGuard<()>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut folders = self
            .folders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(folders.entry(path.to_string()).or_default())
    }

    pub async fn acquire(
        &self,
        remote: &dyn RemoteApi,
        account: &str,
        folder: &DirectoryRow,
    ) -> Result<DirectoryLock, AppError> {
        let guard = self.slot(&folder.path).lock_owned().await;

        let token = match remote
            .lock_folder(account, &folder.identifier, &folder.path)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                drop(guard);
                self.prune(&folder.path);
                return Err(AppError::EncryptionLock(format!("{}: {e}", folder.path)));
            }
        };

        debug!(folder = %folder.path, "encrypted folder locked");
        Ok(DirectoryLock {
            folder: folder.clone(),
            token,
            _guard: guard,
        })
    }

    pub async fn release(
        &self,
        remote: &dyn RemoteApi,
        account: &str,
        lock: DirectoryLock,
    ) -> Result<(), AppError> {
        let result = remote
            .unlock_folder(account, &lock.folder.identifier, &lock.folder.path, &lock.token)
            .await;
        let path = lock.folder.path.clone();
        drop(lock);
        self.prune(&path);

        match result {
            Ok(()) => {
                debug!(folder = %path, "encrypted folder unlocked");
                Ok(())
            }
            Err(e) => {
                warn!(folder = %path, error = %e, "failed to unlock encrypted folder");
                Err(AppError::EncryptionLock(format!("{path}: {e}")))
            }
        }
    }

    fn prune(&self, path: &str) {
        let mut folders = self
            .folders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(slot) = folders.get(path) {
            if Arc::strong_count(slot) == 1 {
                folders.remove(path);
            }
        }
    }

    pub fn tracked(&self) -> usize {
        self.folders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Resolves the encrypted folder governing `path`: the folder itself when it
/// is encrypted, else the nearest encrypted ancestor.
pub fn encrypted_folder(
    conn: &Connection,
    account: &str,
    path: &str,
) -> Result<Option<DirectoryRow>, AppError> {
    let path = scope_path::normalize(path);
    let own = repository::get_directory(conn, account, &path)?;
    if own.as_ref().is_some_and(|d| d.encrypted) {
        return Ok(own);
    }
    for ancestor in scope_path::ancestors(&path) {
        if let Some(dir) = repository::get_directory(conn, account, &ancestor)? {
            if dir.encrypted {
                let identifier = match own {
                    Some(own) => own.identifier,
                    None => folder_identifier(conn, account, &path)?,
                };
                return Ok(Some(DirectoryRow {
                    account: account.to_string(),
                    path: path.clone(),
                    identifier,
                    encrypted: true,
                    etag: String::new(),
                }));
            }
        }
    }
    Ok(None)
}

fn folder_identifier(conn: &Connection, account: &str, path: &str) -> Result<String, AppError> {
    let Some(parent) = scope_path::parent(path) else {
        return Ok(String::new());
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    Ok(repository::get_by_path(conn, account, &parent, name)?
        .map(|r| r.identifier)
        .unwrap_or_default())
}

pub fn is_encrypted(conn: &Connection, account: &str, path: &str) -> Result<bool, AppError> {
    Ok(encrypted_folder(conn, account, path)?.is_some())
}

/// Whether any folder above `path` is encrypted. The row for `path` itself
/// is not consulted.
pub fn ancestor_encrypted(conn: &Connection, account: &str, path: &str) -> Result<bool, AppError> {
    for ancestor in scope_path::ancestors(&scope_path::normalize(path)) {
        if repository::get_directory(conn, account, &ancestor)?.is_some_and(|d| d.encrypted) {
            return Ok(true);
        }
    }
    Ok(false)
}
