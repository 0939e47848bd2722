use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::repository;
use crate::error::AppError;
use crate::models::search::{DateWindow, MediaSearchReport};
use crate::services::reconcile_service;
use crate::state::AppState;

/// Results wanted before backfill stops widening on a changed window.
pub const TARGET_RESULTS: usize = 100;

const INITIAL_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStep {
    pub window: DateWindow,
    pub report: MediaSearchReport,
}

/// Lower bound of the widest window: midnight UTC on 1 January of year 1.
pub fn distant_past() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Widens `window` into the past, or returns `None` when backfill is done:
/// the window already reaches the distant past, or the last search changed
/// the store and `accumulated` new results reached [`TARGET_RESULTS`].
pub fn next_window(window: &DateWindow, accumulated: usize, changed: bool) -> Option<DateWindow> {
    if window.gte <= distant_past() {
        return None;
    }
    if changed && accumulated >= TARGET_RESULTS {
        return None;
    }

    let widen_by = match window.span_days() {
        0..=89 => Some(90),
        90..=179 => Some(180),
        180..=364 => Some(365),
        _ => None,
    };
    let gte = widen_by
        .and_then(|days| window.gte.checked_sub_signed(Duration::days(days)))
        .map(start_of_day)
        .unwrap_or_else(distant_past);
    Some(DateWindow {
        lte: window.lte,
        gte: gte.max(distant_past()),
    })
}

/// Window covering the days currently on screen. When the oldest visible
/// day is also the oldest stored day, the window reaches 30 days further
/// back and may keep widening.
pub fn visible_window(visible_days: &[NaiveDate], oldest_stored: Option<NaiveDate>) -> Option<(DateWindow, bool)> {
    let newest = visible_days.iter().max()?;
    let oldest = visible_days.iter().min()?;
    let lte = day_start(*newest) + Duration::days(1);

    if oldest_stored == Some(*oldest) {
        Some((
            DateWindow {
                lte,
                gte: day_start(*oldest) - Duration::days(INITIAL_WINDOW_DAYS),
            },
            true,
        ))
    } else {
        Some((
            DateWindow {
                lte,
                gte: day_start(*oldest) - Duration::days(1),
            },
            false,
        ))
    }
}

/// Runs one media search and folds the result into the store.
pub async fn search_window(state: &AppState, window: DateWindow) -> Result<MediaSearchReport, AppError> {
    let settings = state.settings()?;
    let entries = state
        .remote
        .search_media(&state.account, &settings.media_root, window)
        .await?;

    let conn = state.conn()?;
    reconcile_service::apply_media_search(
        &conn,
        &state.signals,
        &state.account,
        &settings.media_root,
        &window,
        &entries,
        settings.show_hidden,
    )
}

async fn run_search(state: &AppState, start: DateWindow, add_past: bool) -> Result<Vec<SearchStep>, AppError> {
    let mut window = start;
    let mut accumulated = 0;
    let mut steps = Vec::new();

    loop {
        let report = search_window(state, window).await?;
        accumulated += report.new_inserts;
        debug!(
            span_days = window.span_days(),
            new_inserts = report.new_inserts,
            changed = report.is_different,
            "media window searched"
        );
        let changed = report.is_different;
        steps.push(SearchStep { window, report });

        if !add_past {
            break;
        }
        match next_window(&window, accumulated, changed) {
            Some(next) => window = next,
            None => break,
        }
    }

    Ok(steps)
}

/// Brings the media store up to date. An empty store starts from the last
/// 30 days and widens into the past; otherwise the span from the oldest
/// known item to `now` is refreshed once.
pub async fn backfill(state: &AppState, now: DateTime<Utc>) -> Result<Vec<SearchStep>, AppError> {
    let oldest = {
        let conn = state.conn()?;
        repository::oldest_media_date(&conn, &state.account)?
    };

    let (start, add_past) = match oldest {
        None => (
            DateWindow {
                lte: now,
                gte: now - Duration::days(INITIAL_WINDOW_DAYS),
            },
            true,
        ),
        Some(oldest) => (
            DateWindow {
                lte: now,
                gte: oldest.min(now),
            },
            false,
        ),
    };

    let steps = run_search(state, start, add_past).await?;
    info!(
        searches = steps.len(),
        inserted = steps.iter().map(|s| s.report.new_inserts).sum::<usize>(),
        "media backfill finished"
    );
    Ok(steps)
}

/// Refreshes the days on screen, widening past the oldest one when nothing
/// older is stored yet.
pub async fn refresh_visible(state: &AppState, visible_days: &[NaiveDate]) -> Result<Vec<SearchStep>, AppError> {
    let oldest_stored = {
        let conn = state.conn()?;
        repository::oldest_media_date(&conn, &state.account)?.map(|d| d.date_naive())
    };
    match visible_window(visible_days, oldest_stored) {
        Some((start, add_past)) => run_search(state, start, add_past).await,
        None => Ok(Vec::new()),
    }
}
