//! Parallel per-session processing
//!
//! Sessions are independent, so each one runs on the rayon pool. A session
//! that fails with a recoverable error is logged and skipped; cross-session
//! leakage aborts the whole batch.

use crate::input::InputData;
use anyhow::{bail, Result};
use incident_risk_core::{EngineError, FeaturePipeline, SessionFrame, SessionKey};
use rayon::prelude::*;

/// Frames that were built, plus the sessions that were skipped and why
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Ordered by session key
    pub frames: Vec<SessionFrame>,
    pub skipped: Vec<(SessionKey, String)>,
}

enum SessionResult {
    Built(SessionFrame),
    Empty(SessionKey),
    Failed(SessionKey, EngineError),
}

/// Process every loaded session
pub fn run_batch(pipeline: &FeaturePipeline, data: &InputData) -> Result<BatchOutcome> {
    log::info!("Processing {} session(s)", data.sessions.len());

    let results: Vec<SessionResult> = data
        .sessions
        .par_iter()
        .map(|session| {
            let key = session.session_key;
            match pipeline.process_session(session, &data.inputs_for(key)) {
                Ok(Some(frame)) => SessionResult::Built(frame),
                Ok(None) => SessionResult::Empty(key),
                Err(err) => SessionResult::Failed(key, err),
            }
        })
        .collect();

    let mut outcome = BatchOutcome::default();
    for result in results {
        match result {
            SessionResult::Built(frame) => outcome.frames.push(frame),
            SessionResult::Empty(key) => {
                log::warn!("Empty timeline for session {}, skipping", key);
                outcome.skipped.push((key, "empty timeline".to_string()));
            }
            SessionResult::Failed(key, err) if err.is_recoverable() => {
                log::error!("Session {} failed: {}", key, err);
                outcome.skipped.push((key, err.to_string()));
            }
            SessionResult::Failed(key, err) => {
                bail!("Aborting batch, session {}: {}", key, err);
            }
        }
    }

    outcome.frames.sort_by_key(|f| f.session.session_key);
    log::info!(
        "Batch complete: {} session(s) built, {} skipped",
        outcome.frames.len(),
        outcome.skipped.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use incident_risk_core::{AuxRow, EngineConfig, IncidentVocabulary, RaceControlRow, Session};

    fn session(key: SessionKey, minutes: Option<i64>) -> Session {
        let start = Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap();
        Session {
            session_key: key,
            meeting_key: 1219,
            year: 2023,
            meeting_name: "Singapore Grand Prix".into(),
            date_start: Some(start),
            date_end: minutes.map(|m| start + Duration::minutes(m)),
        }
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(EngineConfig::default(), IncidentVocabulary::safety_car().unwrap())
            .unwrap()
    }

    #[test]
    fn test_failures_are_isolated() {
        let start = Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap();
        let mut data = InputData {
            sessions: vec![session(3, Some(10)), session(1, Some(10)), session(2, None)],
            ..Default::default()
        };
        // Out of order weather rows make session 3 fail
        data.weather.insert(
            3,
            vec![
                AuxRow::new(3, start + Duration::minutes(5)).with_number("rainfall", 0.0),
                AuxRow::new(3, start).with_number("rainfall", 0.0),
            ],
        );

        let outcome = run_batch(&pipeline(), &data).unwrap();
        assert_eq!(outcome.frames.len(), 1);
        assert_eq!(outcome.frames[0].session.session_key, 1);
        assert_eq!(outcome.skipped.len(), 2);
    }

    #[test]
    fn test_leakage_aborts() {
        let start = Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap();
        let mut data = InputData {
            sessions: vec![session(1, Some(10)), session(2, Some(10))],
            ..Default::default()
        };
        data.race_control.insert(
            1,
            vec![RaceControlRow {
                session_key: 2,
                timestamp: start,
                category: None,
                flag: None,
                message: None,
            }],
        );

        let err = run_batch(&pipeline(), &data).unwrap_err();
        assert!(err.to_string().contains("Aborting batch"));
    }

    #[test]
    fn test_frames_ordered_by_session() {
        let data = InputData {
            sessions: vec![session(9, Some(5)), session(4, Some(5)), session(6, Some(5))],
            ..Default::default()
        };
        let outcome = run_batch(&pipeline(), &data).unwrap();
        let keys: Vec<SessionKey> = outcome.frames.iter().map(|f| f.session.session_key).collect();
        assert_eq!(keys, vec![4, 6, 9]);
    }
}
