//! Report generation
//!
//! Build summaries and evaluation reports, each as JSON and as a Markdown
//! table document.

use crate::batch::BatchOutcome;
use anyhow::{Context, Result};
use incident_risk_core::{
    calibration_curve, compute_metrics, evaluate_alert_policy, AlertPolicyRow, CalibrationBin,
    ProbabilityMetrics, ScoredPoint, SessionKey,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

/// Per-session line of the build summary
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_key: SessionKey,
    pub meeting_name: String,
    pub rows: usize,
    pub events: usize,
    pub positive_rows: usize,
}

/// What a `build` run produced
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub sessions: Vec<SessionSummary>,
    pub skipped: Vec<SkippedSession>,
    pub total_rows: usize,
    pub positive_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSession {
    pub session_key: SessionKey,
    pub reason: String,
}

impl BuildSummary {
    pub fn from_outcome(outcome: &BatchOutcome) -> Self {
        let sessions: Vec<SessionSummary> = outcome
            .frames
            .iter()
            .map(|f| SessionSummary {
                session_key: f.session.session_key,
                meeting_name: f.session.meeting_name.clone(),
                rows: f.rows.len(),
                events: f.events.len(),
                positive_rows: f.positives(),
            })
            .collect();

        let total_rows: usize = sessions.iter().map(|s| s.rows).sum();
        let positives: usize = sessions.iter().map(|s| s.positive_rows).sum();

        Self {
            skipped: outcome
                .skipped
                .iter()
                .map(|(key, reason)| SkippedSession {
                    session_key: *key,
                    reason: reason.clone(),
                })
                .collect(),
            total_rows,
            positive_rate: if total_rows == 0 {
                0.0
            } else {
                positives as f64 / total_rows as f64
            },
            sessions,
        }
    }

    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "# Incident Risk Feature Build\n")?;
        writeln!(
            out,
            "**Rows**: {} | **Sessions**: {} | **Skipped**: {} | Positive rate: {:.2}%\n",
            self.total_rows,
            self.sessions.len(),
            self.skipped.len(),
            self.positive_rate * 100.0
        )?;
        writeln!(out, "| Session | Meeting | Rows | Events | Positive rows |")?;
        writeln!(out, "|---------|---------|------|--------|---------------|")?;
        for s in &self.sessions {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                s.session_key, s.meeting_name, s.rows, s.events, s.positive_rows
            )?;
        }

        if !self.skipped.is_empty() {
            writeln!(out, "\n## Skipped sessions\n")?;
            for s in &self.skipped {
                writeln!(out, "- {}: {}", s.session_key, s.reason)?;
            }
        }
        Ok(())
    }
}

/// Metrics, alert policy table and calibration for one set of predictions
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub n_sessions: usize,
    pub metrics: ProbabilityMetrics,
    pub alert_policy: Vec<AlertPolicyRow>,
    pub calibration: Vec<CalibrationBin>,
}

impl EvaluationReport {
    pub fn build(points: &[ScoredPoint], thresholds: &[f64], calibration_bins: usize) -> Result<Self> {
        let labels: Vec<bool> = points.iter().map(|p| p.label).collect();
        let probabilities: Vec<f64> = points.iter().map(|p| p.probability).collect();
        let sessions: BTreeSet<SessionKey> = points.iter().map(|p| p.session_key).collect();

        Ok(Self {
            n_sessions: sessions.len(),
            metrics: compute_metrics(&labels, &probabilities)?,
            alert_policy: evaluate_alert_policy(points, thresholds)?,
            calibration: calibration_curve(&labels, &probabilities, calibration_bins)?,
        })
    }

    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metric = |v: Option<f64>| v.map_or_else(|| "N/A".to_string(), |v| format!("{:.4}", v));
        let m = &self.metrics;

        writeln!(out, "# Incident Risk Forecasting - Evaluation Report\n")?;
        writeln!(
            out,
            "**Evaluated**: {} rows | {} sessions | Positive rate: {:.2}%\n",
            m.n_samples,
            self.n_sessions,
            m.positive_rate * 100.0
        )?;

        writeln!(out, "## Model Performance\n")?;
        writeln!(out, "| PR-AUC | ROC-AUC | Brier Score |")?;
        writeln!(out, "|--------|---------|-------------|")?;
        writeln!(
            out,
            "| {} | {} | {} |",
            metric(m.average_precision),
            metric(m.roc_auc),
            metric(m.brier_score)
        )?;

        writeln!(out, "\n## Alert Policy Analysis\n")?;
        writeln!(
            out,
            "| Threshold | Alerts/Session | Median Lead Time (s) | TPR | FPR | Precision |"
        )?;
        writeln!(
            out,
            "|-----------|----------------|----------------------|-----|-----|-----------|"
        )?;
        for row in &self.alert_policy {
            let lead = row
                .median_lead_time_seconds
                .map_or_else(|| "N/A".to_string(), |v| format!("{:.0}", v));
            writeln!(
                out,
                "| {:.2} | {:.1} | {} | {:.3} | {:.3} | {:.3} |",
                row.threshold,
                row.alerts_per_entity,
                lead,
                row.true_positive_rate,
                row.false_positive_rate,
                row.precision
            )?;
        }

        if !self.calibration.is_empty() {
            writeln!(out, "\n## Calibration\n")?;
            writeln!(out, "| Bin | Count | Mean predicted | Fraction positive |")?;
            writeln!(out, "|-----|-------|----------------|-------------------|")?;
            for bin in &self.calibration {
                writeln!(
                    out,
                    "| {:.1}-{:.1} | {} | {:.3} | {:.3} |",
                    bin.lower, bin.upper, bin.count, bin.mean_predicted, bin.fraction_positive
                )?;
            }
        }
        Ok(())
    }
}

/// Write a serializable report as pretty JSON
pub fn write_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
    log::info!("Report saved to {:?}", path);
    Ok(())
}

/// Write a Markdown document
pub fn write_markdown(path: &Path, markdown: &str) -> Result<()> {
    fs::write(path, markdown).with_context(|| format!("Failed to write report: {:?}", path))?;
    log::info!("Report saved to {:?}", path);
    Ok(())
}
