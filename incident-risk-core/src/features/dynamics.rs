//! Race dynamics features from position and interval series
//!
//! Both series are keyed by `driver_number`. Readings that are not numeric
//! (lapped cars report gaps like "+1 LAP") are treated as missing.

use super::{aux_timestamps, grid_timestamps, FeatureBuilder, SessionInputs};
use crate::config::EngineConfig;
use crate::rolling::window_bounds;
use crate::types::{AuxRow, GridRow, Result, Value};
use chrono::Duration;
use std::collections::BTreeMap;

/// Columns produced by [`DynamicsFeatures`]
pub const DYNAMICS_FEATURE_COLUMNS: [&str; 5] = [
    "position_changes_120s",
    "driver_position_volatility_300s",
    "gap_std_120s",
    "pack_density_1_5s",
    "pack_density_3_0s",
];

const DRIVER_COLUMN: &str = "driver_number";

#[derive(Debug, Clone)]
pub struct DynamicsFeatures {
    window: Duration,
    long_window: Duration,
}

fn driver_of(row: &AuxRow) -> Option<String> {
    row.values.get(DRIVER_COLUMN).map(Value::to_string)
}

/// Position samples per driver, in source order
fn positions_by_driver(rows: &[AuxRow]) -> BTreeMap<String, Vec<f64>> {
    let mut drivers: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let (Some(driver), Some(position)) = (driver_of(row), row.number("position")) {
            drivers.entry(driver).or_default().push(position);
        }
    }
    drivers
}

/// Number of successive position samples that differ, summed over drivers
pub fn position_changes(rows: &[AuxRow]) -> usize {
    positions_by_driver(rows)
        .values()
        .map(|p| p.windows(2).filter(|w| w[1] != w[0]).count())
        .sum()
}

/// Mean over drivers of each driver's mean absolute position change.
///
/// `Some(0.0)` for an empty window, `None` when no driver has two samples.
pub fn position_volatility(rows: &[AuxRow]) -> Option<f64> {
    if rows.is_empty() {
        return Some(0.0);
    }

    let per_driver: Vec<f64> = positions_by_driver(rows)
        .values()
        .filter(|p| p.len() >= 2)
        .map(|p| {
            let total: f64 = p.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
            total / (p.len() - 1) as f64
        })
        .collect();

    if per_driver.is_empty() {
        return None;
    }
    Some(per_driver.iter().sum::<f64>() / per_driver.len() as f64)
}

/// Latest non-null value of `column` per driver
fn latest_by_driver(rows: &[AuxRow], column: &str) -> BTreeMap<String, f64> {
    let mut latest = BTreeMap::new();
    for row in rows {
        if let (Some(driver), Some(value)) = (driver_of(row), row.number(column)) {
            latest.insert(driver, value);
        }
    }
    latest
}

/// Sample standard deviation; `None` for fewer than two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

/// Fraction of values strictly below `threshold`; `None` when empty
pub fn fraction_below(values: &[f64], threshold: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let close = values.iter().filter(|v| **v < threshold).count();
    Some(close as f64 / values.len() as f64)
}

impl DynamicsFeatures {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            window: Duration::seconds(config.dynamics_window_seconds),
            long_window: Duration::seconds(config.dynamics_long_window_seconds),
        }
    }

    fn apply_positions(&self, rows: &mut [GridRow], position: &[AuxRow]) -> Result<()> {
        if position.is_empty() {
            for row in rows.iter_mut() {
                row.set("position_changes_120s", Some(Value::Number(0.0)));
                row.set("driver_position_volatility_300s", Some(Value::Number(0.0)));
            }
            return Ok(());
        }

        let query = grid_timestamps(rows);
        let source = aux_timestamps(position);
        let short = window_bounds(&query, &source, self.window)?;
        let long = window_bounds(&query, &source, self.long_window)?;

        for ((row, short), long) in rows.iter_mut().zip(short).zip(long) {
            let changes = position_changes(&position[short]);
            row.set("position_changes_120s", Some(Value::from(changes)));
            row.set(
                "driver_position_volatility_300s",
                position_volatility(&position[long]).map(Value::Number),
            );
        }
        Ok(())
    }

    fn apply_intervals(&self, rows: &mut [GridRow], intervals: &[AuxRow]) -> Result<()> {
        if intervals.is_empty() {
            for row in rows.iter_mut() {
                for column in &DYNAMICS_FEATURE_COLUMNS[2..] {
                    row.set(*column, None);
                }
            }
            return Ok(());
        }

        let query = grid_timestamps(rows);
        let source = aux_timestamps(intervals);
        let bounds = window_bounds(&query, &source, self.window)?;

        for (row, range) in rows.iter_mut().zip(bounds) {
            let window = &intervals[range];
            let gaps: Vec<f64> = latest_by_driver(window, "gap_to_leader")
                .into_values()
                .collect();
            let spacing: Vec<f64> = latest_by_driver(window, "interval").into_values().collect();

            row.set("gap_std_120s", sample_std(&gaps).map(Value::Number));
            row.set(
                "pack_density_1_5s",
                fraction_below(&spacing, 1.5).map(Value::Number),
            );
            row.set(
                "pack_density_3_0s",
                fraction_below(&spacing, 3.0).map(Value::Number),
            );
        }
        Ok(())
    }
}

impl FeatureBuilder for DynamicsFeatures {
    fn name(&self) -> &'static str {
        "dynamics"
    }

    fn apply(&self, rows: &mut [GridRow], inputs: &SessionInputs<'_>) -> Result<()> {
        if inputs.position.is_empty() && inputs.intervals.is_empty() {
            if let Some(first) = rows.first() {
                log::warn!(
                    "No position or interval data for session {}",
                    first.session_key
                );
            }
        }

        self.apply_positions(rows, inputs.position)?;
        self.apply_intervals(rows, inputs.intervals)
    }
}
