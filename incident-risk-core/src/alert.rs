//! Threshold alert policy simulation
//!
//! An alert fires at a grid point when the predicted probability is at or
//! above the threshold. Each threshold yields one [`AlertPolicyRow`] with the
//! confusion counts, rates, alert volume per session and the median lead time
//! of correctly raised alerts.

use crate::types::{EngineError, Result, SessionKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One grid point as seen by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub session_key: SessionKey,
    pub probability: f64,
    pub label: bool,
    pub time_to_event_seconds: f64,
}

/// Operational metrics for one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicyRow {
    pub threshold: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub true_positive_rate: f64,
    pub false_positive_rate: f64,
    pub precision: f64,
    /// Mean over sessions of the number of alerts raised in the session
    pub alerts_per_entity: f64,
    /// Median time-to-event over true positive alerts; `None` without any
    pub median_lead_time_seconds: Option<f64>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Median of a slice; `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Evaluate a single threshold
pub fn evaluate_threshold(points: &[ScoredPoint], threshold: f64) -> AlertPolicyRow {
    let (mut tp, mut fp, mut fn_, mut tn) = (0usize, 0usize, 0usize, 0usize);
    let mut alerts_by_session: BTreeMap<SessionKey, usize> = BTreeMap::new();
    let mut lead_times = Vec::new();

    for point in points {
        let alert = point.probability >= threshold;
        let alerts = alerts_by_session.entry(point.session_key).or_insert(0);
        if alert {
            *alerts += 1;
        }

        match (alert, point.label) {
            (true, true) => {
                tp += 1;
                lead_times.push(point.time_to_event_seconds);
            }
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    let alerts_per_entity = if alerts_by_session.is_empty() {
        0.0
    } else {
        alerts_by_session.values().sum::<usize>() as f64 / alerts_by_session.len() as f64
    };

    AlertPolicyRow {
        threshold,
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        true_negatives: tn,
        true_positive_rate: ratio(tp, tp + fn_),
        false_positive_rate: ratio(fp, fp + tn),
        precision: ratio(tp, tp + fp),
        alerts_per_entity,
        median_lead_time_seconds: median(&lead_times),
    }
}

/// Evaluate every threshold, in the order given
pub fn evaluate_alert_policy(
    points: &[ScoredPoint],
    thresholds: &[f64],
) -> Result<Vec<AlertPolicyRow>> {
    if let Some(p) = points.iter().find(|p| !(0.0..=1.0).contains(&p.probability)) {
        return Err(EngineError::InvalidConfig(format!(
            "probability {} for session {} outside [0, 1]",
            p.probability, p.session_key
        )));
    }

    let rows: Vec<AlertPolicyRow> = thresholds
        .iter()
        .map(|&t| evaluate_threshold(points, t))
        .collect();

    log::info!(
        "Alert policy evaluated for {} threshold(s) over {} points",
        thresholds.len(),
        points.len()
    );
    Ok(rows)
}

/// Pair probabilities with labeled points
pub fn score_points(
    labels: impl IntoIterator<Item = (SessionKey, bool, f64)>,
    probabilities: &[f64],
) -> Result<Vec<ScoredPoint>> {
    let labels: Vec<(SessionKey, bool, f64)> = labels.into_iter().collect();
    if labels.len() != probabilities.len() {
        return Err(EngineError::LengthMismatch {
            component: "alert",
            expected: labels.len(),
            found: probabilities.len(),
        });
    }

    Ok(labels
        .into_iter()
        .zip(probabilities)
        .map(|((session_key, label, tte), &probability)| ScoredPoint {
            session_key,
            probability,
            label,
            time_to_event_seconds: tte,
        })
        .collect())
}
