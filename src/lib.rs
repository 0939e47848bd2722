pub mod data;
pub mod error;
pub mod models;
pub mod naming;
pub mod scope_path;
pub mod services;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

pub use error::AppError;
pub use models::event::{EventKind, ReconcileReport, SyncEvent};
pub use models::operation::Outcome;
pub use models::record::{Record, RecordKind, SyncStatus};
pub use services::remote_service::RemoteApi;
pub use state::AppState;

/// Opens (or creates) the record store for `account` and wires it to
/// `remote`. Without `db_path` the store lives in the platform data dir.
pub fn open_state(
    account: impl Into<String>,
    remote: Arc<dyn RemoteApi>,
    db_path: Option<PathBuf>,
) -> Result<AppState, AppError> {
    let db_path = match db_path {
        Some(path) => path,
        None => data::default_database_path()?,
    };
    let conn = data::open_database(&db_path)?;
    let account = account.into();
    info!(%account, path = %db_path.display(), "record store opened");
    Ok(AppState::new(account, conn, db_path, remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote_service::mock::MockRemote;

    #[test]
    fn open_state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sync.db");

        let state = open_state(
            "alice@cloud.example",
            Arc::new(MockRemote::new()),
            Some(db_path.clone()),
        )
        .unwrap();
        let mut settings = state.settings().unwrap();
        settings.favorites_first = false;
        state.save_settings(&settings).unwrap();
        drop(state);

        let reopened =
            open_state("alice@cloud.example", Arc::new(MockRemote::new()), Some(db_path)).unwrap();
        assert!(!reopened.settings().unwrap().favorites_first);
    }
}
