use async_trait::async_trait;

use crate::error::AppError;
use crate::models::search::{DateWindow, RemoteEntry};

/// WebDAV-side operations the sync core depends on.
///
/// Failures come back as [`AppError::Network`] carrying the HTTP-like status,
/// or [`AppError::NotFound`] for 404.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_folder(&self, account: &str, path: &str) -> Result<Vec<RemoteEntry>, AppError>;

    async fn search_media(
        &self,
        account: &str,
        root: &str,
        window: DateWindow,
    ) -> Result<Vec<RemoteEntry>, AppError>;

    async fn delete(&self, account: &str, path: &str) -> Result<(), AppError>;

    async fn move_item(
        &self,
        account: &str,
        source: &str,
        destination: &str,
        overwrite: bool,
    ) -> Result<(), AppError>;

    async fn set_favorite(&self, account: &str, path: &str, favorite: bool)
        -> Result<(), AppError>;

    async fn create_folder(&self, account: &str, path: &str) -> Result<RemoteEntry, AppError>;

    async fn lock_folder(
        &self,
        account: &str,
        identifier: &str,
        path: &str,
    ) -> Result<String, AppError>;

    async fn unlock_folder(
        &self,
        account: &str,
        identifier: &str,
        path: &str,
        token: &str,
    ) -> Result<(), AppError>;

    async fn rebuild_manifest(&self, account: &str, path: &str) -> Result<(), AppError>;

    async fn mark_encrypted(
        &self,
        account: &str,
        identifier: &str,
        path: &str,
    ) -> Result<(), AppError>;
}
