//! Label assignment on the timeline grid
//!
//! For each grid timestamp `t` the next event is the earliest event strictly
//! after `t`. The label is positive when that event is at most `horizon` away;
//! the time-to-event is the gap capped at `cap`, or exactly `cap` when no
//! future event exists.

use crate::time::{ensure_sorted, seconds_f64};
use crate::types::{GridRow, Label, Result, Timestamp};
use chrono::Duration;

/// Compute labels for sorted grid timestamps against sorted event starts
pub fn assign_labels(
    grid: &[Timestamp],
    events: &[Timestamp],
    horizon: Duration,
    cap: Duration,
) -> Result<Vec<Label>> {
    ensure_sorted("labeler", None, events.iter().copied())?;

    let cap_seconds = seconds_f64(cap);

    let labels = grid
        .iter()
        .map(|&t| {
            let next = events.partition_point(|&e| e <= t);
            match events.get(next) {
                Some(&event) => {
                    let gap = event - t;
                    Label {
                        positive: gap <= horizon,
                        time_to_event_seconds: seconds_f64(gap).min(cap_seconds),
                    }
                }
                None => Label {
                    positive: false,
                    time_to_event_seconds: cap_seconds,
                },
            }
        })
        .collect();

    Ok(labels)
}

/// Stamp labels onto one session's grid rows in place
pub fn label_rows(
    rows: &mut [GridRow],
    events: &[Timestamp],
    horizon: Duration,
    cap: Duration,
) -> Result<()> {
    let grid: Vec<Timestamp> = rows.iter().map(|r| r.timestamp).collect();
    let session_key = rows.first().map(|r| r.session_key);

    let labels = assign_labels(&grid, events, horizon, cap).map_err(|e| match session_key {
        Some(key) => e.in_session(key),
        None => e,
    })?;

    for (row, label) in rows.iter_mut().zip(labels) {
        row.label = Some(label);
    }

    let positives = rows
        .iter()
        .filter(|r| r.label.map_or(false, |l| l.positive))
        .count();
    if !rows.is_empty() {
        log::debug!(
            "Labels assigned: {} positive / {} total ({:.1}% positive rate)",
            positives,
            rows.len(),
            positives as f64 * 100.0 / rows.len() as f64
        );
    }
    Ok(())
}
