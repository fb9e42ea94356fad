//! Per-session orchestration: grid → events → labels → features

use crate::config::EngineConfig;
use crate::detector::{EventDetector, IncidentVocabulary};
use crate::features::{default_builders, FeatureBuilder, SessionInputs};
use crate::labeler::label_rows;
use crate::timeline::build_session_timeline;
use crate::types::{GridRow, Result, Session, Timestamp};
use std::collections::BTreeSet;

/// Labeled, feature-augmented grid of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFrame {
    pub session: Session,
    /// Detected event start timestamps, sorted
    pub events: Vec<Timestamp>,
    /// Grid rows in timestamp order
    pub rows: Vec<GridRow>,
}

impl SessionFrame {
    /// Number of positively labeled rows
    pub fn positives(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.label.map_or(false, |l| l.positive))
            .count()
    }

    /// Sorted union of the feature column names over all rows
    pub fn feature_columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|r| r.features.keys().cloned())
            .collect()
    }
}

/// Runs the full per-session computation with a fixed configuration
pub struct FeaturePipeline {
    config: EngineConfig,
    vocabulary: IncidentVocabulary,
    builders: Vec<Box<dyn FeatureBuilder + Send + Sync>>,
}

impl FeaturePipeline {
    /// Create a pipeline with the standard feature builders
    pub fn new(config: EngineConfig, vocabulary: IncidentVocabulary) -> Result<Self> {
        config.validate()?;
        let builders = default_builders(&config)?;
        Ok(Self {
            config,
            vocabulary,
            builders,
        })
    }

    /// Builder method: append a custom feature builder
    pub fn with_builder(mut self, builder: Box<dyn FeatureBuilder + Send + Sync>) -> Self {
        self.builders.push(builder);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the frame for one session.
    ///
    /// Returns `Ok(None)` when the session has no usable bounds. Every input
    /// slice must belong to `session` and be sorted by timestamp.
    pub fn process_session(
        &self,
        session: &Session,
        inputs: &SessionInputs<'_>,
    ) -> Result<Option<SessionFrame>> {
        let key = session.session_key;
        self.run(session, inputs).map_err(|e| e.in_session(key))
    }

    fn run(&self, session: &Session, inputs: &SessionInputs<'_>) -> Result<Option<SessionFrame>> {
        let key = session.session_key;
        inputs.check_session(key)?;

        let mut rows = build_session_timeline(session, self.config.grid_interval());
        if rows.is_empty() {
            return Ok(None);
        }

        let detector = EventDetector::new(&self.vocabulary, self.config.merge_window());
        let events = detector.detect(key, inputs.race_control)?;

        label_rows(
            &mut rows,
            &events,
            self.config.horizon(),
            self.config.time_to_event_cap(),
        )?;

        for builder in &self.builders {
            builder.apply(&mut rows, inputs)?;
            log::trace!("Session {}: {} features applied", key, builder.name());
        }

        let frame = SessionFrame {
            session: session.clone(),
            events,
            rows,
        };

        log::info!(
            "Processed {} (session {}): {} rows, {} event(s), {} positive",
            session.meeting_name,
            key,
            frame.rows.len(),
            frame.events.len(),
            frame.positives()
        );
        Ok(Some(frame))
    }
}

/// Concatenate frames into one row set ordered by (session, timestamp)
pub fn concat_frames(frames: Vec<SessionFrame>) -> Vec<GridRow> {
    let mut rows: Vec<GridRow> = frames.into_iter().flat_map(|f| f.rows).collect();
    rows.sort_by(|a, b| {
        a.session_key
            .cmp(&b.session_key)
            .then(a.timestamp.cmp(&b.timestamp))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuxRow, EngineError, RaceControlRow, LABEL_COLUMN};
    use chrono::{Duration, TimeZone, Utc};

    fn session(key: i64) -> Session {
        let start = Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap();
        Session {
            session_key: key,
            meeting_key: 1219,
            year: 2023,
            meeting_name: "Singapore Grand Prix".into(),
            date_start: Some(start),
            date_end: Some(start + Duration::minutes(60)),
        }
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(EngineConfig::default(), IncidentVocabulary::safety_car().unwrap())
            .unwrap()
    }

    fn sc_message(key: i64, minute: i64) -> RaceControlRow {
        RaceControlRow {
            session_key: key,
            timestamp: session(key).date_start.unwrap() + Duration::minutes(minute),
            category: Some("SafetyCar".into()),
            flag: None,
            message: Some("SAFETY CAR DEPLOYED".into()),
        }
    }

    #[test]
    fn test_full_session() {
        let log = vec![sc_message(1, 30), sc_message(1, 31)];
        let inputs = SessionInputs {
            race_control: &log,
            ..Default::default()
        };
        let frame = pipeline()
            .process_session(&session(1), &inputs)
            .unwrap()
            .unwrap();

        assert_eq!(frame.rows.len(), 121);
        assert_eq!(frame.events.len(), 1);
        assert_eq!(frame.positives(), 10);

        let columns = frame.feature_columns();
        assert!(columns.contains("msg_count_60s"));
        assert!(columns.contains("rainfall"));
        assert!(columns.contains("pack_density_3_0s"));
        assert!(!columns.contains(LABEL_COLUMN));
    }

    #[test]
    fn test_session_without_bounds_is_skipped() {
        let mut broken = session(1);
        broken.date_start = None;
        let result = pipeline()
            .process_session(&broken, &SessionInputs::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_foreign_rows_are_leakage() {
        let weather = vec![AuxRow::new(2, session(1).date_start.unwrap())];
        let inputs = SessionInputs {
            weather: &weather,
            ..Default::default()
        };
        let err = pipeline().process_session(&session(1), &inputs).unwrap_err();
        assert!(matches!(err, EngineError::CrossEntityLeakage { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unsorted_input_reports_session() {
        let log = vec![sc_message(7, 20), sc_message(7, 10)];
        let inputs = SessionInputs {
            race_control: &log,
            ..Default::default()
        };
        let err = pipeline().process_session(&session(7), &inputs).unwrap_err();
        assert!(matches!(err, EngineError::Unsorted { session_key: Some(7), .. }));
        assert!(err.is_recoverable());
    }

    struct ElapsedSeconds;

    impl FeatureBuilder for ElapsedSeconds {
        fn name(&self) -> &'static str {
            "elapsed"
        }

        fn apply(&self, rows: &mut [GridRow], _inputs: &SessionInputs<'_>) -> Result<()> {
            let Some(start) = rows.first().map(|r| r.timestamp) else {
                return Ok(());
            };
            for row in rows.iter_mut() {
                let elapsed = (row.timestamp - start).num_seconds() as f64;
                row.set("elapsed_seconds", Some(elapsed.into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_custom_builder_runs_after_defaults() {
        let frame = pipeline()
            .with_builder(Box::new(ElapsedSeconds))
            .process_session(&session(1), &SessionInputs::default())
            .unwrap()
            .unwrap();

        assert!(frame.feature_columns().contains("elapsed_seconds"));
        assert!(frame.feature_columns().contains("msg_count_60s"));
        assert_eq!(frame.rows[0].number("elapsed_seconds"), Some(0.0));
        assert_eq!(frame.rows[120].number("elapsed_seconds"), Some(3600.0));
    }

    #[test]
    fn test_oversized_horizon_is_rejected() {
        let config = EngineConfig::default().with_horizon(i64::MAX);
        let result = FeaturePipeline::new(config, IncidentVocabulary::safety_car().unwrap());
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_concat_orders_by_session() {
        let p = pipeline();
        let empty = SessionInputs::default();
        let frames = vec![
            p.process_session(&session(5), &empty).unwrap().unwrap(),
            p.process_session(&session(2), &empty).unwrap().unwrap(),
        ];
        let rows = concat_frames(frames);
        assert_eq!(rows.len(), 242);
        assert_eq!(rows[0].session_key, 2);
        assert_eq!(rows[241].session_key, 5);
    }
}
