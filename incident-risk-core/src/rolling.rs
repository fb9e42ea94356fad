//! Trailing-window aggregation over sorted event streams
//!
//! Every primitive evaluates the interval `(t - window, t]` for each query
//! timestamp `t`: a source row exactly at `t - window` is excluded, a source
//! row exactly at `t` is included.
//!
//! Queries and sources must both be sorted. Window bounds are found with two
//! forward-only pointers, so locating all windows is `O(n + m)`. Reductions run
//! over the window slice in source order, which makes the results identical to
//! the re-scan definition in [`naive`].

use crate::time::ensure_sorted;
use crate::types::{AuxRow, EngineError, Result, Timestamp, Value};
use chrono::Duration;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Range;
use std::str::FromStr;

/// Named reducer applied to the values inside a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Max,
    Min,
    /// Population standard deviation
    Std,
    Sum,
}

impl FromStr for Reducer {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Reducer::Mean),
            "max" => Ok(Reducer::Max),
            "min" => Ok(Reducer::Min),
            "std" => Ok(Reducer::Std),
            "sum" => Ok(Reducer::Sum),
            other => Err(EngineError::UnknownReducer(other.to_string())),
        }
    }
}

impl Reducer {
    /// Reduce the non-null values; `None` when there are none
    pub fn apply<I>(self, values: I) -> Option<f64>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let values: Vec<f64> = values
            .into_iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .collect();

        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();

        let reduced = match self {
            Reducer::Sum => sum,
            Reducer::Mean => sum / n,
            Reducer::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reducer::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reducer::Std => {
                let mean = sum / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                var.sqrt()
            }
        };
        Some(reduced)
    }
}

fn check_window(window: Duration) -> Result<()> {
    if window <= Duration::zero() {
        return Err(EngineError::InvalidConfig(format!(
            "rolling window must be positive, got {}s",
            window.num_seconds()
        )));
    }
    Ok(())
}

fn check_len(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(EngineError::LengthMismatch {
            component: "rolling",
            expected,
            found,
        });
    }
    Ok(())
}

/// Index range of the source rows inside `(t - window, t]` for every query
pub fn window_bounds(
    query: &[Timestamp],
    source: &[Timestamp],
    window: Duration,
) -> Result<Vec<Range<usize>>> {
    check_window(window)?;
    ensure_sorted("rolling", None, query.iter().copied())?;
    ensure_sorted("rolling", None, source.iter().copied())?;

    let mut bounds = Vec::with_capacity(query.len());
    let mut lo = 0usize;
    let mut hi = 0usize;

    for &t in query {
        let start = t - window;
        while lo < source.len() && source[lo] <= start {
            lo += 1;
        }
        while hi < source.len() && source[hi] <= t {
            hi += 1;
        }
        bounds.push(lo.min(hi)..hi);
    }

    Ok(bounds)
}

/// Number of source timestamps in each query window
pub fn rolling_count(
    query: &[Timestamp],
    source: &[Timestamp],
    window: Duration,
) -> Result<Vec<usize>> {
    Ok(window_bounds(query, source, window)?
        .into_iter()
        .map(|r| r.len())
        .collect())
}

/// Reduce the values whose timestamps fall in each query window.
///
/// An empty window (or one holding only nulls) yields `None`, never zero.
pub fn rolling_reduce(
    query: &[Timestamp],
    source: &[Timestamp],
    values: &[Option<f64>],
    window: Duration,
    reducer: Reducer,
) -> Result<Vec<Option<f64>>> {
    check_len(source.len(), values.len())?;

    Ok(window_bounds(query, source, window)?
        .into_iter()
        .map(|r| reducer.apply(values[r].iter().copied()))
        .collect())
}

/// Number of distinct categorical values in each query window
pub fn rolling_distinct_count<T>(
    query: &[Timestamp],
    source: &[Timestamp],
    values: &[T],
    window: Duration,
) -> Result<Vec<usize>>
where
    T: Eq + Hash,
{
    check_len(source.len(), values.len())?;
    let bounds = window_bounds(query, source, window)?;

    let mut counts: HashMap<&T, usize> = HashMap::new();
    let mut current = 0..0;
    let mut result = Vec::with_capacity(bounds.len());

    for range in bounds {
        for value in &values[current.end..range.end] {
            *counts.entry(value).or_insert(0) += 1;
        }
        for value in &values[current.start..range.start] {
            if let Some(count) = counts.get_mut(value) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(value);
                }
            }
        }
        result.push(counts.len());
        current = range;
    }

    Ok(result)
}

/// Extract a numeric column from auxiliary rows.
///
/// Missing cells are null. A categorical cell is a type error.
pub fn numeric_column(rows: &[AuxRow], column: &str) -> Result<Vec<Option<f64>>> {
    rows.iter()
        .map(|row| match row.values.get(column) {
            None => Ok(None),
            Some(Value::Number(v)) => Ok(Some(*v)),
            Some(Value::Category(_)) => Err(EngineError::TypeMismatch {
                component: "rolling",
                column: column.to_string(),
                expected: "numeric",
            }),
        })
        .collect()
}

/// Rolling reduction of one numeric column of an auxiliary series
pub fn rolling_reduce_column(
    query: &[Timestamp],
    rows: &[AuxRow],
    column: &str,
    window: Duration,
    reducer: Reducer,
) -> Result<Vec<Option<f64>>> {
    let source: Vec<Timestamp> = rows.iter().map(|r| r.timestamp).collect();
    let values = numeric_column(rows, column)?;
    rolling_reduce(query, &source, &values, window, reducer)
}

/// Re-scan reference definitions, `O(n * m)`.
///
/// These are the behavioral definitions the windowed versions above are
/// checked against.
pub mod naive {
    use super::Reducer;
    use crate::types::Timestamp;
    use chrono::Duration;
    use std::collections::HashSet;
    use std::hash::Hash;

    fn in_window(ts: Timestamp, t: Timestamp, window: Duration) -> bool {
        ts > t - window && ts <= t
    }

    pub fn count(query: &[Timestamp], source: &[Timestamp], window: Duration) -> Vec<usize> {
        query
            .iter()
            .map(|&t| source.iter().filter(|&&s| in_window(s, t, window)).count())
            .collect()
    }

    pub fn reduce(
        query: &[Timestamp],
        source: &[Timestamp],
        values: &[Option<f64>],
        window: Duration,
        reducer: Reducer,
    ) -> Vec<Option<f64>> {
        query
            .iter()
            .map(|&t| {
                reducer.apply(
                    source
                        .iter()
                        .zip(values)
                        .filter(|(s, _)| in_window(**s, t, window))
                        .map(|(_, v)| *v),
                )
            })
            .collect()
    }

    pub fn distinct_count<T: Eq + Hash>(
        query: &[Timestamp],
        source: &[Timestamp],
        values: &[T],
        window: Duration,
    ) -> Vec<usize> {
        query
            .iter()
            .map(|&t| {
                source
                    .iter()
                    .zip(values)
                    .filter(|(s, _)| in_window(**s, t, window))
                    .map(|(_, v)| v)
                    .collect::<HashSet<_>>()
                    .len()
            })
            .collect()
    }
}
