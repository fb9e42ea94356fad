//! Probability quality metrics for a binary risk score
//!
//! Average precision is the primary metric since positives are rare. ROC-AUC
//! is rank based with tied scores sharing their average rank.

use crate::types::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Summary of a probability vector against binary labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMetrics {
    pub n_samples: usize,
    pub n_positive: usize,
    pub positive_rate: f64,
    /// Area under the precision/recall step curve; `None` without positives
    pub average_precision: Option<f64>,
    /// `None` unless both classes are present
    pub roc_auc: Option<f64>,
    /// Mean squared error of the probabilities; `None` for empty input
    pub brier_score: Option<f64>,
}

/// One non-empty bin of a calibration table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub fraction_positive: f64,
}

fn check_inputs(labels: &[bool], probabilities: &[f64]) -> Result<()> {
    if labels.len() != probabilities.len() {
        return Err(EngineError::LengthMismatch {
            component: "metrics",
            expected: labels.len(),
            found: probabilities.len(),
        });
    }
    if let Some(p) = probabilities.iter().find(|p| p.is_nan()) {
        return Err(EngineError::InvalidConfig(format!(
            "probability {} is not a number",
            p
        )));
    }
    Ok(())
}

/// Average precision: sum over score thresholds of (ΔR) × P
pub fn average_precision(labels: &[bool], probabilities: &[f64]) -> Option<f64> {
    let total_positive = labels.iter().filter(|l| **l).count();
    if total_positive == 0 {
        return None;
    }

    let mut pairs: Vec<(f64, bool)> = probabilities.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut previous_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;

    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0 == score {
            if pairs[i].1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / total_positive as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - previous_recall) * precision;
        previous_recall = recall;
    }

    Some(ap)
}

/// 1-based ranks of `values` with ties sharing their average rank
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Rank-based area under the ROC curve
pub fn roc_auc(labels: &[bool], probabilities: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|l| **l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let ranks = average_ranks(probabilities);
    let positive_rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l)
        .map(|(r, _)| *r)
        .sum();

    let n_pos = n_pos as f64;
    Some((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Mean squared difference between probability and outcome
pub fn brier_score(labels: &[bool], probabilities: &[f64]) -> Option<f64> {
    if labels.is_empty() {
        return None;
    }
    let total: f64 = probabilities
        .iter()
        .zip(labels)
        .map(|(p, l)| {
            let y = if *l { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum();
    Some(total / labels.len() as f64)
}

/// Compute every summary metric
pub fn compute_metrics(labels: &[bool], probabilities: &[f64]) -> Result<ProbabilityMetrics> {
    check_inputs(labels, probabilities)?;

    let n_samples = labels.len();
    let n_positive = labels.iter().filter(|l| **l).count();
    let positive_rate = if n_samples == 0 {
        0.0
    } else {
        n_positive as f64 / n_samples as f64
    };

    let metrics = ProbabilityMetrics {
        n_samples,
        n_positive,
        positive_rate,
        average_precision: average_precision(labels, probabilities),
        roc_auc: roc_auc(labels, probabilities),
        brier_score: brier_score(labels, probabilities),
    };

    log::info!(
        "PR-AUC={} | ROC-AUC={} | Brier={}",
        fmt_optional(metrics.average_precision),
        fmt_optional(metrics.roc_auc),
        fmt_optional(metrics.brier_score)
    );
    Ok(metrics)
}

fn fmt_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{:.4}", v))
}

/// Fixed-width calibration table over [0, 1]; empty bins are omitted
pub fn calibration_curve(
    labels: &[bool],
    probabilities: &[f64],
    n_bins: usize,
) -> Result<Vec<CalibrationBin>> {
    check_inputs(labels, probabilities)?;
    if n_bins == 0 {
        return Err(EngineError::InvalidConfig(
            "calibration needs at least one bin".to_string(),
        ));
    }

    let mut sums = vec![(0usize, 0.0f64, 0usize); n_bins];
    for (&p, &label) in probabilities.iter().zip(labels) {
        let bin = ((p.clamp(0.0, 1.0) * n_bins as f64) as usize).min(n_bins - 1);
        let slot = &mut sums[bin];
        slot.0 += 1;
        slot.1 += p;
        if label {
            slot.2 += 1;
        }
    }

    let width = 1.0 / n_bins as f64;
    Ok(sums
        .into_iter()
        .enumerate()
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(i, (count, total, positives))| CalibrationBin {
            lower: i as f64 * width,
            upper: (i + 1) as f64 * width,
            count,
            mean_predicted: total / count as f64,
            fraction_positive: positives as f64 / count as f64,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [bool; 4] = [true, false, true, false];
    const PROBS: [f64; 4] = [0.9, 0.8, 0.7, 0.1];

    #[test]
    fn test_average_precision() {
        let ap = average_precision(&LABELS, &PROBS).unwrap();
        assert!((ap - 5.0 / 6.0).abs() < 1e-12);

        assert_eq!(average_precision(&[false, false], &[0.3, 0.6]), None);
        assert_eq!(average_precision(&[true, false], &[0.9, 0.1]), Some(1.0));
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&LABELS, &PROBS), Some(0.75));
        assert_eq!(roc_auc(&[true, false], &[0.9, 0.1]), Some(1.0));
        assert_eq!(roc_auc(&[true, true], &[0.9, 0.1]), None);
    }

    #[test]
    fn test_roc_auc_ties_share_rank() {
        assert_eq!(roc_auc(&[true, false], &[0.5, 0.5]), Some(0.5));
        assert_eq!(average_ranks(&[0.2, 0.5, 0.5, 0.9]), vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_brier() {
        let brier = brier_score(&LABELS, &PROBS).unwrap();
        let expected = (0.01 + 0.64 + 0.09 + 0.01) / 4.0;
        assert!((brier - expected).abs() < 1e-12);
        assert_eq!(brier_score(&[], &[]), None);
    }

    #[test]
    fn test_compute_metrics() {
        let metrics = compute_metrics(&LABELS, &PROBS).unwrap();
        assert_eq!(metrics.n_samples, 4);
        assert_eq!(metrics.n_positive, 2);
        assert_eq!(metrics.positive_rate, 0.5);
        assert!(metrics.roc_auc.is_some());

        assert!(compute_metrics(&LABELS, &PROBS[..3]).is_err());
    }

    #[test]
    fn test_calibration_bins() {
        let labels = [false, false, true, true, true];
        let probs = [0.05, 0.15, 0.12, 0.95, 1.0];
        let bins = calibration_curve(&labels, &probs, 10).unwrap();

        assert_eq!(bins.len(), 3);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 2);
        assert_eq!(bins[1].fraction_positive, 0.5);
        assert!((bins[1].mean_predicted - 0.135).abs() < 1e-12);
        // 1.0 falls into the last bin
        assert_eq!(bins[2].count, 2);
        assert_eq!(bins[2].fraction_positive, 1.0);

        assert!(calibration_curve(&labels, &probs, 0).is_err());
    }
}
