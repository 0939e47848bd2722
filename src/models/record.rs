use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    File,
    Directory,
}

impl RecordKind {
    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    PendingUpload,
    Uploading,
    PendingDownload,
    Downloading,
    Error,
}

impl SyncStatus {
    pub fn is_in_flight(self) -> bool {
        !matches!(self, Self::Synced)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::PendingUpload => write!(f, "pending_upload"),
            Self::Uploading => write!(f, "uploading"),
            Self::PendingDownload => write!(f, "pending_download"),
            Self::Downloading => write!(f, "downloading"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending_upload" => Ok(Self::PendingUpload),
            "uploading" => Ok(Self::Uploading),
            "pending_download" => Ok(Self::PendingDownload),
            "downloading" => Ok(Self::Downloading),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown sync status: {s}")),
        }
    }
}

/// Permission bitmask as reported by the server.
///
/// The server sends a letter string (`"RGDNVCK"`); an empty string means the
/// entry carries no restrictions and parses to [`Permissions::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(pub u8);

impl Permissions {
    pub const READ: u8 = 0b0_0001;
    pub const UPDATE: u8 = 0b0_0010;
    pub const CREATE: u8 = 0b0_0100;
    pub const DELETE: u8 = 0b0_1000;
    pub const SHARE: u8 = 0b1_0000;
    pub const ALL: Self = Self(0b1_1111);
    pub const NONE: Self = Self(0);

    pub fn parse(value: &str) -> Self {
        if value.trim().is_empty() {
            return Self::ALL;
        }
        let mut bits = 0;
        for ch in value.chars() {
            bits |= match ch {
                'G' => Self::READ,
                'W' | 'N' | 'V' => Self::UPDATE,
                'C' | 'K' => Self::CREATE,
                'D' => Self::DELETE,
                'R' => Self::SHARE,
                _ => 0,
            };
        }
        Self(bits)
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn can_delete(self) -> bool {
        self.contains(Self::DELETE)
    }

    pub fn can_update(self) -> bool {
        self.contains(Self::UPDATE)
    }

    pub fn can_create(self) -> bool {
        self.contains(Self::CREATE)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: String,
    pub account: String,
    pub parent_path: String,
    pub name: String,
    pub kind: RecordKind,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
    pub favorite: bool,
    pub encrypted: bool,
    pub permissions: Permissions,
    pub sync_status: SyncStatus,
    pub content_type: Option<String>,
    pub live_photo: bool,
    pub etag: String,
    pub upload_order: i64,
}

impl Record {
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    pub fn path(&self) -> String {
        scope_path::join(&self.parent_path, &self.name)
    }

    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    pub fn base_name(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }

    pub fn is_media(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/") || ct.starts_with("video/"))
    }

    /// True when the remote listing contents that matter to the UI differ.
    pub fn differs_from(&self, other: &Record) -> bool {
        self.etag != other.etag
            || self.name != other.name
            || self.parent_path != other.parent_path
            || self.favorite != other.favorite
            || self.size != other.size
            || self.modified_at != other.modified_at
            || self.permissions != other.permissions
            || self.encrypted != other.encrypted
            || self.live_photo != other.live_photo
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRow {
    pub account: String,
    pub path: String,
    pub identifier: String,
    pub encrypted: bool,
    pub etag: String,
}

#[cfg(test)]
pub(crate) fn sample_record(identifier: &str, parent_path: &str, name: &str) -> Record {
    use chrono::TimeZone;

    Record {
        identifier: identifier.to_string(),
        account: "alice@cloud.example".to_string(),
        parent_path: parent_path.to_string(),
        name: name.to_string(),
        kind: RecordKind::File,
        size: 1024,
        modified_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        favorite: false,
        encrypted: false,
        permissions: Permissions::ALL,
        sync_status: SyncStatus::Synced,
        content_type: None,
        live_photo: false,
        etag: format!("etag-{identifier}"),
        upload_order: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_permission_letters() {
        let perms = Permissions::parse("RGDNVCK");
        assert!(perms.can_delete());
        assert!(perms.can_update());
        assert!(perms.can_create());
        assert!(perms.contains(Permissions::SHARE));

        let read_only = Permissions::parse("G");
        assert!(!read_only.can_delete());
        assert!(!read_only.can_update());
    }

    #[test]
    fn empty_permissions_are_unrestricted() {
        assert_eq!(Permissions::parse(""), Permissions::ALL);
    }

    #[test]
    fn path_and_extension() {
        let record = sample_record("1", "/A", "IMG_0001.HEIC");
        assert_eq!(record.path(), "/A/IMG_0001.HEIC");
        assert_eq!(record.extension().as_deref(), Some("heic"));
        assert_eq!(record.base_name(), "IMG_0001");

        let dotfile = sample_record("2", "/", ".env");
        assert_eq!(dotfile.path(), "/.env");
        assert!(dotfile.extension().is_none());
        assert!(dotfile.is_hidden());
    }

    #[test]
    fn sync_status_round_trips_through_text() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::PendingUpload,
            SyncStatus::Uploading,
            SyncStatus::PendingDownload,
            SyncStatus::Downloading,
            SyncStatus::Error,
        ] {
            assert_eq!(status.to_string().parse::<SyncStatus>(), Ok(status));
        }
        assert!("bogus".parse::<SyncStatus>().is_err());
    }
}
