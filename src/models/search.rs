use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::record::RecordKind;

/// One entry of a remote PROPFIND listing or search result.
///
/// A folder listing carries the folder itself as the entry with an empty name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub identifier: String,
    pub parent_path: String,
    pub name: String,
    pub kind: RecordKind,
    pub size: i64,
    pub modified_at: DateTime<Utc>,
    pub favorite: bool,
    pub e2e_encrypted: bool,
    pub permissions: String,
    pub content_type: Option<String>,
    pub etag: String,
    pub live_photo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub lte: DateTime<Utc>,
    pub gte: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.gte && instant <= self.lte
    }

    pub fn span_days(&self) -> i64 {
        (self.lte - self.gte).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediaSearchReport {
    pub is_different: bool,
    pub new_inserts: usize,
}
