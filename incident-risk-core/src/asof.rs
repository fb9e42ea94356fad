//! Point-in-time ("last known value") join
//!
//! Each grid row receives the auxiliary columns of the most recent auxiliary
//! row of the same session with `timestamp <= t`. Rows are partitioned by
//! session internally, so a globally sorted input spanning several sessions is
//! handled correctly and a session never sees another session's readings.
//!
//! Policies:
//! - no qualifying row, or the match is older than the tolerance → null columns
//! - an auxiliary column whose name the grid already owns is dropped, the grid
//!   value wins
//! - either side out of chronological order within a session → error

use crate::time::ensure_sorted;
use crate::types::{AuxRow, EngineError, GridRow, Result, SessionKey};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome counters for one join
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsofStats {
    /// Grid rows that received a non-stale match
    pub matched: usize,
    /// Grid rows whose best match was older than the tolerance
    pub stale: usize,
    /// Grid rows visited
    pub total: usize,
}

/// As-of join between a grid and one auxiliary series
#[derive(Debug, Clone, Default)]
pub struct AsofJoin {
    tolerance: Option<Duration>,
    columns: Option<Vec<String>>,
}

impl AsofJoin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: discard matches older than `tolerance`
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Builder method: only join these auxiliary columns
    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Columns to attach, after dropping names the grid already owns
    fn join_columns(&self, grid: &[GridRow], aux: &[AuxRow]) -> Vec<String> {
        let candidates: BTreeSet<String> = match &self.columns {
            Some(cols) => cols.iter().cloned().collect(),
            None => aux.iter().flat_map(|r| r.values.keys().cloned()).collect(),
        };

        let (kept, dropped): (Vec<String>, Vec<String>) = candidates
            .into_iter()
            .partition(|col| !grid.iter().any(|row| row.has_column(col)));

        if !dropped.is_empty() {
            log::debug!(
                "as-of join: dropping auxiliary columns already on the grid: {:?}",
                dropped
            );
        }
        kept
    }

    /// Join `aux` onto `grid` in place
    pub fn apply(&self, grid: &mut [GridRow], aux: &[AuxRow]) -> Result<AsofStats> {
        let columns = self.join_columns(grid, aux);

        let mut grid_parts: BTreeMap<SessionKey, Vec<usize>> = BTreeMap::new();
        for (idx, row) in grid.iter().enumerate() {
            grid_parts.entry(row.session_key).or_default().push(idx);
        }

        let mut aux_parts: BTreeMap<SessionKey, Vec<&AuxRow>> = BTreeMap::new();
        for row in aux {
            aux_parts.entry(row.session_key).or_default().push(row);
        }

        for (&key, rows) in &aux_parts {
            ensure_sorted("asof", Some(key), rows.iter().map(|r| r.timestamp))?;
        }

        let mut stats = AsofStats::default();

        for (&key, indices) in &grid_parts {
            ensure_sorted("asof", Some(key), indices.iter().map(|&i| grid[i].timestamp))?;

            let partition: &[&AuxRow] = aux_parts.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            if partition.is_empty() {
                log::debug!("as-of join: no auxiliary rows for session {}", key);
            }

            let mut next = 0usize;
            for &idx in indices {
                let row = &mut grid[idx];
                stats.total += 1;

                while next < partition.len() && partition[next].timestamp <= row.timestamp {
                    next += 1;
                }

                let matched = match next.checked_sub(1).map(|i| partition[i]) {
                    Some(source) => {
                        if source.session_key != row.session_key {
                            return Err(EngineError::CrossEntityLeakage {
                                component: "asof",
                                expected: row.session_key,
                                found: source.session_key,
                            });
                        }
                        let stale = self
                            .tolerance
                            .map_or(false, |tol| row.timestamp - source.timestamp > tol);
                        if stale {
                            stats.stale += 1;
                            None
                        } else {
                            Some(source)
                        }
                    }
                    None => None,
                };

                if matched.is_some() {
                    stats.matched += 1;
                }

                for col in &columns {
                    let value = matched.and_then(|source| source.values.get(col).cloned());
                    row.set(col.clone(), value);
                }
            }
        }

        log::debug!(
            "as-of join: {}/{} rows matched ({} stale)",
            stats.matched,
            stats.total,
            stats.stale
        );
        Ok(stats)
    }
}

/// Join with default options (no tolerance, all auxiliary columns)
pub fn asof_join(grid: &mut [GridRow], aux: &[AuxRow]) -> Result<AsofStats> {
    AsofJoin::new().apply(grid, aux)
}
