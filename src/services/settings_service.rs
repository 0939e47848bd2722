use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::data::repository;
use crate::error::AppError;
use crate::models::sort::{SortField, SortSpec};

const KEY_SHOW_HIDDEN: &str = "show_hidden";
const KEY_DIRECTORIES_ON_TOP: &str = "directories_on_top";
const KEY_FAVORITES_FIRST: &str = "favorites_first";
const KEY_SORT_FIELD: &str = "sort_field";
const KEY_SORT_ASCENDING: &str = "sort_ascending";
const KEY_MAX_CONCURRENT_UPLOADS: &str = "max_concurrent_uploads";
const KEY_MEDIA_ROOT: &str = "media_root";

const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub show_hidden: bool,
    pub directories_on_top: bool,
    pub favorites_first: bool,
    pub sort: SortSpec,
    pub max_concurrent_uploads: usize,
    pub media_root: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            show_hidden: false,
            directories_on_top: true,
            favorites_first: true,
            sort: SortSpec::default(),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            media_root: "/".to_string(),
        }
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

pub fn load(conn: &Connection) -> Result<SyncSettings, AppError> {
    let defaults = SyncSettings::default();

    let sort_field = repository::get_setting(conn, KEY_SORT_FIELD)?
        .and_then(|v| SortField::parse(&v))
        .unwrap_or(defaults.sort.field);

    let max_concurrent_uploads = repository::get_setting(conn, KEY_MAX_CONCURRENT_UPLOADS)?
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(defaults.max_concurrent_uploads);

    Ok(SyncSettings {
        show_hidden: parse_bool(
            repository::get_setting(conn, KEY_SHOW_HIDDEN)?,
            defaults.show_hidden,
        ),
        directories_on_top: parse_bool(
            repository::get_setting(conn, KEY_DIRECTORIES_ON_TOP)?,
            defaults.directories_on_top,
        ),
        favorites_first: parse_bool(
            repository::get_setting(conn, KEY_FAVORITES_FIRST)?,
            defaults.favorites_first,
        ),
        sort: SortSpec {
            field: sort_field,
            ascending: parse_bool(
                repository::get_setting(conn, KEY_SORT_ASCENDING)?,
                defaults.sort.ascending,
            ),
        },
        max_concurrent_uploads,
        media_root: repository::get_setting(conn, KEY_MEDIA_ROOT)?
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.media_root),
    })
}

pub fn save(conn: &Connection, settings: &SyncSettings) -> Result<(), AppError> {
    let tx = conn.unchecked_transaction()?;
    repository::set_setting(&tx, KEY_SHOW_HIDDEN, &settings.show_hidden.to_string())?;
    repository::set_setting(
        &tx,
        KEY_DIRECTORIES_ON_TOP,
        &settings.directories_on_top.to_string(),
    )?;
    repository::set_setting(
        &tx,
        KEY_FAVORITES_FIRST,
        &settings.favorites_first.to_string(),
    )?;
    repository::set_setting(&tx, KEY_SORT_FIELD, settings.sort.field.as_str())?;
    repository::set_setting(&tx, KEY_SORT_ASCENDING, &settings.sort.ascending.to_string())?;
    repository::set_setting(
        &tx,
        KEY_MAX_CONCURRENT_UPLOADS,
        &settings.max_concurrent_uploads.to_string(),
    )?;
    repository::set_setting(&tx, KEY_MEDIA_ROOT, &settings.media_root)?;
    tx.commit()?;
    Ok(())
}
