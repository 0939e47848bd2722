use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::services::event_bus::EventBus;
use crate::services::lock_service::DirectoryLocks;
use crate::services::remote_service::RemoteApi;
use crate::services::settings_service::{self, SyncSettings};
use crate::services::signal_service::SignalQueue;

/// Everything one signed-in account needs: the record store (single writer),
/// the remote, and the outbound event and signal channels.
pub struct AppState {
    pub account: String,
    pub db: Mutex<rusqlite::Connection>,
    pub db_path: PathBuf,
    pub remote: Arc<dyn RemoteApi>,
    pub events: Arc<EventBus>,
    pub signals: Arc<SignalQueue>,
    pub locks: DirectoryLocks,
    pub rebuilds: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        account: impl Into<String>,
        conn: rusqlite::Connection,
        db_path: PathBuf,
        remote: Arc<dyn RemoteApi>,
    ) -> Self {
        Self {
            account: account.into(),
            db: Mutex::new(conn),
            db_path,
            remote,
            events: Arc::new(EventBus::new()),
            signals: Arc::new(SignalQueue::new()),
            locks: DirectoryLocks::new(),
            rebuilds: Mutex::new(Vec::new()),
        }
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, AppError> {
        self.db.lock().map_err(|e| AppError::General(e.to_string()))
    }

    pub fn settings(&self) -> Result<SyncSettings, AppError> {
        let conn = self.conn()?;
        settings_service::load(&conn)
    }

    pub fn save_settings(&self, settings: &SyncSettings) -> Result<(), AppError> {
        let conn = self.conn()?;
        settings_service::save(&conn, settings)
    }

    pub fn track_rebuild(&self, handle: JoinHandle<()>) {
        let mut rebuilds = self
            .rebuilds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rebuilds.retain(|h| !h.is_finished());
        rebuilds.push(handle);
    }

    /// Waits for every manifest rebuild spawned so far.
    pub async fn flush_rebuilds(&self) {
        let pending: Vec<JoinHandle<()>> = {
            let mut rebuilds = self
                .rebuilds
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *rebuilds)
        };
        for handle in pending {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(remote: Arc<dyn RemoteApi>) -> AppState {
    AppState::new(
        "alice@cloud.example",
        crate::data::repository::setup_db(),
        PathBuf::new(),
        remote,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote_service::mock::MockRemote;

    #[test]
    fn settings_round_trip_through_state() {
        let state = test_state(Arc::new(MockRemote::new()));
        let mut settings = state.settings().unwrap();
        settings.show_hidden = true;
        state.save_settings(&settings).unwrap();
        assert!(state.settings().unwrap().show_hidden);
    }

    #[tokio::test]
    async fn flush_waits_for_tracked_tasks() {
        let state = test_state(Arc::new(MockRemote::new()));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&done);
        state.track_rebuild(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));

        state.flush_rebuilds().await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
