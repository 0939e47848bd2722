use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::repository;
use crate::error::AppError;
use crate::models::record::Record;
use crate::models::sort::{GroupBy, SortField, SortSpec};
use crate::scope_path;
use crate::services::settings_service::SyncSettings;
use crate::state::AppState;

const LIVE_COMPANION_EXTENSION: &str = "mov";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasourceOptions {
    pub sort: SortSpec,
    pub directories_on_top: bool,
    pub favorites_first: bool,
}

impl From<&SyncSettings> for DatasourceOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            sort: settings.sort,
            directories_on_top: settings.directories_on_top,
            favorites_first: settings.favorites_first,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceItem {
    pub record: Record,
    /// Identifier of the hidden `.mov` paired with this still, if any.
    pub live_companion: Option<String>,
}

impl DatasourceItem {
    pub fn has_live_companion(&self) -> bool {
        self.live_companion.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// `None` for the single section produced by [`GroupBy::None`].
    pub day: Option<NaiveDate>,
    pub items: Vec<DatasourceItem>,
}

fn is_companion_candidate(record: &Record) -> bool {
    record.live_photo
        && !record.is_directory()
        && record.extension().as_deref() == Some(LIVE_COMPANION_EXTENSION)
}

fn companion_key(record: &Record) -> (String, String) {
    (record.parent_path.clone(), record.base_name().to_string())
}

fn compare_by_field(a: &Record, b: &Record, field: SortField) -> Ordering {
    let primary = match field {
        SortField::Name => a
            .name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name)),
        SortField::Date => a.modified_at.cmp(&b.modified_at),
        SortField::Size => a.size.cmp(&b.size),
        SortField::UploadOrder => a.upload_order.cmp(&b.upload_order),
    };
    primary.then_with(|| a.identifier.cmp(&b.identifier))
}

/// Rank of the fixed groups that never flip with the sort direction.
fn group_rank(record: &Record, options: &DatasourceOptions) -> (u8, u8) {
    let kind = if options.directories_on_top && !record.is_directory() {
        1
    } else {
        0
    };
    let favorite = if options.favorites_first && !record.favorite {
        1
    } else {
        0
    };
    (kind, favorite)
}

pub fn compare(a: &Record, b: &Record, options: &DatasourceOptions) -> Ordering {
    group_rank(a, options)
        .cmp(&group_rank(b, options))
        .then_with(|| {
            let ordering = compare_by_field(a, b, options.sort.field);
            if options.sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        })
}

/// Orders `records` for display and folds live photo companions into
/// their paired still.
pub fn build(records: Vec<Record>, options: &DatasourceOptions) -> Vec<DatasourceItem> {
    let mut stills: HashMap<(String, String), usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if !record.is_directory() && !is_companion_candidate(record) {
            stills.entry(companion_key(record)).or_insert(index);
        }
    }

    let mut companions: HashMap<usize, String> = HashMap::new();
    for record in records.iter().filter(|r| is_companion_candidate(r)) {
        if let Some(&still) = stills.get(&companion_key(record)) {
            companions.insert(still, record.identifier.clone());
        }
    }

    let mut items: Vec<DatasourceItem> = records
        .into_iter()
        .enumerate()
        .filter(|(_, record)| !is_companion_candidate(record))
        .map(|(index, record)| DatasourceItem {
            record,
            live_companion: companions.remove(&index),
        })
        .collect();

    items.sort_by(|a, b| compare(&a.record, &b.record, options));
    items
}

/// Partitions into ordered sections. Sections follow the sort direction;
/// items inside each section are ordered as by [`build`].
pub fn build_sections(
    records: Vec<Record>,
    options: &DatasourceOptions,
    group_by: GroupBy,
) -> Vec<Section> {
    let items = build(records, options);
    match group_by {
        GroupBy::None => {
            if items.is_empty() {
                Vec::new()
            } else {
                vec![Section { day: None, items }]
            }
        }
        GroupBy::Day => {
            let mut groups: BTreeMap<NaiveDate, Vec<DatasourceItem>> = BTreeMap::new();
            for item in items {
                groups
                    .entry(item.record.modified_at.date_naive())
                    .or_default()
                    .push(item);
            }
            let sections = groups.into_iter().map(|(day, items)| Section {
                day: Some(day),
                items,
            });
            if options.sort.ascending {
                sections.collect()
            } else {
                sections.rev().collect()
            }
        }
    }
}

/// Current display snapshot of one folder, using the persisted settings.
pub fn folder_snapshot(state: &AppState, folder_path: &str) -> Result<Vec<DatasourceItem>, AppError> {
    let conn = state.conn()?;
    let settings = crate::services::settings_service::load(&conn)?;
    let records = repository::list_by_parent(&conn, &state.account, &scope_path::normalize(folder_path))?
        .into_iter()
        .filter(|r| settings.show_hidden || !r.is_hidden())
        .collect();
    Ok(build(records, &DatasourceOptions::from(&settings)))
}
