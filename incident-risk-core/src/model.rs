//! Contract with the external risk model

use crate::alert::{score_points, ScoredPoint};
use crate::pipeline::SessionFrame;
use crate::types::{EngineError, Result, LABEL_COLUMN};

/// A model that turns a labeled frame into one probability per row
pub trait RiskModel {
    /// Probability of an event within the horizon, one per row of `frame`
    fn predict_proba(&self, frame: &SessionFrame) -> Result<Vec<f64>>;
}

/// Run `model` over a frame and pair its output with the frame's labels.
///
/// The model must return one probability per row. Rows without a label are
/// left out of the result.
pub fn score_frame<M: RiskModel + ?Sized>(model: &M, frame: &SessionFrame) -> Result<Vec<ScoredPoint>> {
    let probabilities = model.predict_proba(frame)?;
    if probabilities.len() != frame.rows.len() {
        return Err(EngineError::LengthMismatch {
            component: "model",
            expected: frame.rows.len(),
            found: probabilities.len(),
        });
    }

    let (labels, kept): (Vec<_>, Vec<f64>) = frame
        .rows
        .iter()
        .zip(probabilities)
        .filter_map(|(r, p)| {
            r.label
                .map(|l| ((r.session_key, l.positive, l.time_to_event_seconds), p))
        })
        .unzip();

    let missing = frame.rows.len() - kept.len();
    if missing > 0 {
        log::warn!(
            "Session {}: skipped {} row(s) without {}",
            frame.session.session_key,
            missing,
            LABEL_COLUMN
        );
    }
    score_points(labels, &kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::evaluate_alert_policy;
    use crate::config::EngineConfig;
    use crate::detector::IncidentVocabulary;
    use crate::features::SessionInputs;
    use crate::pipeline::FeaturePipeline;
    use crate::types::{RaceControlRow, Session};
    use chrono::{Duration, TimeZone, Utc};

    /// Scores a row by how many race control messages arrived recently
    struct MessageRateModel;

    impl RiskModel for MessageRateModel {
        fn predict_proba(&self, frame: &SessionFrame) -> Result<Vec<f64>> {
            Ok(frame
                .rows
                .iter()
                .map(|r| (r.number("msg_count_180s").unwrap_or(0.0) / 4.0).min(1.0))
                .collect())
        }
    }

    struct TruncatingModel;

    impl RiskModel for TruncatingModel {
        fn predict_proba(&self, frame: &SessionFrame) -> Result<Vec<f64>> {
            Ok(vec![0.5; frame.rows.len().saturating_sub(1)])
        }
    }

    fn frame() -> SessionFrame {
        let start = Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap();
        let session = Session {
            session_key: 9158,
            meeting_key: 1219,
            year: 2023,
            meeting_name: "Singapore Grand Prix".into(),
            date_start: Some(start),
            date_end: Some(start + Duration::minutes(20)),
        };
        let log: Vec<RaceControlRow> = [8, 9, 10, 10, 11]
            .iter()
            .map(|m| RaceControlRow {
                session_key: 9158,
                timestamp: start + Duration::minutes(*m),
                category: Some("Flag".into()),
                flag: Some("YELLOW".into()),
                message: Some("YELLOW IN TRACK SECTOR 4".into()),
            })
            .chain(std::iter::once(RaceControlRow {
                session_key: 9158,
                timestamp: start + Duration::minutes(12),
                category: Some("SafetyCar".into()),
                flag: None,
                message: Some("SAFETY CAR DEPLOYED".into()),
            }))
            .collect();

        let pipeline =
            FeaturePipeline::new(EngineConfig::default(), IncidentVocabulary::safety_car().unwrap())
                .unwrap();
        let inputs = SessionInputs {
            race_control: &log,
            ..Default::default()
        };
        pipeline.process_session(&session, &inputs).unwrap().unwrap()
    }

    #[test]
    fn test_score_frame_feeds_alert_policy() {
        let frame = frame();
        let points = score_frame(&MessageRateModel, &frame).unwrap();
        assert_eq!(points.len(), frame.rows.len());

        let report = evaluate_alert_policy(&points, &[0.5]).unwrap();
        assert!(report[0].true_positives > 0);
        assert!(report[0].median_lead_time_seconds.is_some());
    }

    #[test]
    fn test_unlabeled_rows_are_skipped() {
        let mut frame = frame();
        frame.rows[0].label = None;
        frame.rows[1].label = None;

        let points = score_frame(&MessageRateModel, &frame).unwrap();
        assert_eq!(points.len(), frame.rows.len() - 2);
        assert!(points.iter().all(|p| p.time_to_event_seconds > 0.0));
    }

    #[test]
    fn test_model_output_length_checked() {
        let err = score_frame(&TruncatingModel, &frame()).unwrap_err();
        assert!(matches!(err, EngineError::LengthMismatch { .. }));
    }
}
