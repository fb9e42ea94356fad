//! Uniform timeline grid
//!
//! The grid is the backbone every label and feature is attached to: one row
//! per `interval` from session start to session end, first point at the start
//! instant. Points are computed as `start + k * interval`, so spacing never
//! drifts regardless of session length.

use crate::types::{GridRow, Session, Timestamp};
use chrono::Duration;

/// Build the grid timestamps for a session window.
///
/// Returns an empty vector when either bound is missing, when `end < start`
/// or when `interval` is not positive. Callers skip such sessions.
pub fn build_grid(
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    interval: Duration,
) -> Vec<Timestamp> {
    let (Some(start), Some(end)) = (start, end) else {
        return Vec::new();
    };

    let step_ms = interval.num_milliseconds();
    if end < start || step_ms <= 0 {
        return Vec::new();
    }

    let span_ms = (end - start).num_milliseconds();
    let points = span_ms / step_ms + 1;

    (0..points)
        .map(|k| start + Duration::milliseconds(k * step_ms))
        .collect()
}

/// Build the grid rows for a single session
pub fn build_session_timeline(session: &Session, interval: Duration) -> Vec<GridRow> {
    let grid = build_grid(session.date_start, session.date_end, interval);

    if grid.is_empty() {
        log::warn!(
            "Session {} has missing or invalid date_start/date_end, skipping",
            session.session_key
        );
        return Vec::new();
    }

    log::debug!(
        "Session {}: {} grid points ({:?} -> {:?}, {}s interval)",
        session.session_key,
        grid.len(),
        session.date_start,
        session.date_end,
        interval.num_seconds()
    );

    grid.into_iter()
        .map(|ts| GridRow::new(session, ts))
        .collect()
}

/// Build and concatenate grids for many sessions.
///
/// Sessions with an empty grid are skipped. The result is ordered by
/// (session key, timestamp).
pub fn build_all_timelines(sessions: &[Session], interval: Duration) -> Vec<GridRow> {
    let mut rows: Vec<GridRow> = Vec::new();
    let mut built = 0usize;

    for session in sessions {
        let timeline = build_session_timeline(session, interval);
        if !timeline.is_empty() {
            built += 1;
            rows.extend(timeline);
        }
    }

    if rows.is_empty() {
        log::warn!("No timelines built, check session date fields");
        return rows;
    }

    rows.sort_by(|a, b| {
        a.session_key
            .cmp(&b.session_key)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    log::info!(
        "Built timeline: {} total grid points across {} sessions",
        rows.len(),
        built
    );
    rows
}
