use serde::{Deserialize, Serialize};

use crate::models::operation::Outcome;
use crate::models::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DeleteFile,
    RenameFile,
    FavoriteFile,
    CreateFolder,
    MoveFile,
    FolderReconciled,
    TransferChanged,
    FolderUnlockFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    DeleteFile {
        record: Record,
        outcome: Outcome,
    },
    RenameFile {
        record: Record,
        new_name: String,
        outcome: Outcome,
    },
    FavoriteFile {
        record: Record,
        favorite: bool,
        outcome: Outcome,
    },
    CreateFolder {
        parent_path: String,
        name: String,
        record: Option<Record>,
        outcome: Outcome,
    },
    MoveFile {
        record: Record,
        destination: String,
        outcome: Outcome,
    },
    FolderReconciled {
        account: String,
        scope: String,
        report: ReconcileReport,
    },
    TransferChanged {
        record: Record,
    },
    /// The server lock on an encrypted folder could not be returned after a
    /// mutation that was already applied.
    FolderUnlockFailed {
        account: String,
        folder: String,
        outcome: Outcome,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeleteFile { .. } => EventKind::DeleteFile,
            Self::RenameFile { .. } => EventKind::RenameFile,
            Self::FavoriteFile { .. } => EventKind::FavoriteFile,
            Self::CreateFolder { .. } => EventKind::CreateFolder,
            Self::MoveFile { .. } => EventKind::MoveFile,
            Self::FolderReconciled { .. } => EventKind::FolderReconciled,
            Self::TransferChanged { .. } => EventKind::TransferChanged,
            Self::FolderUnlockFailed { .. } => EventKind::FolderUnlockFailed,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::DeleteFile { outcome, .. }
            | Self::RenameFile { outcome, .. }
            | Self::FavoriteFile { outcome, .. }
            | Self::CreateFolder { outcome, .. }
            | Self::MoveFile { outcome, .. }
            | Self::FolderUnlockFailed { outcome, .. } => Some(outcome),
            Self::FolderReconciled { .. } | Self::TransferChanged { .. } => None,
        }
    }
}
