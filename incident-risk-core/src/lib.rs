//! Incident Risk Core Library
//!
//! A stateless library that turns irregular, multi-session race logs into a
//! uniformly sampled, point-in-time correct feature matrix with supervised
//! labels, and evaluates threshold alert policies over model probabilities.
//!
//! # Architecture
//!
//! Leaf-first:
//! - [`rolling`]: trailing-window count, reduce and distinct-count
//! - [`asof`]: "last known value" join, partitioned by session
//! - [`timeline`]: uniform grid per session
//! - [`detector`]: incident start classification and clustering
//! - [`labeler`]: horizon label and capped time-to-event
//! - [`features`]: text, weather and race dynamics builders
//! - [`alert`] and [`metrics`]: evaluation of model output
//!
//! Every value attached to a grid row at time `t` comes from source rows at or
//! before `t`, and never from another session.
//!
//! The library does NOT:
//! - Fetch or cache data
//! - Train or host a model (see [`RiskModel`])
//! - Read or write files
//!
//! File loading, batching and reports live in the application layer
//! (incident-risk-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use incident_risk_core::{EngineConfig, FeaturePipeline, IncidentVocabulary, SessionInputs};
//! # fn sessions() -> Vec<incident_risk_core::Session> { Vec::new() }
//!
//! let config = EngineConfig::new().with_grid_interval(30).with_horizon(300);
//! let pipeline = FeaturePipeline::new(config, IncidentVocabulary::safety_car()?)?;
//!
//! for session in sessions() {
//!     let inputs = SessionInputs::default();
//!     if let Some(frame) = pipeline.process_session(&session, &inputs)? {
//!         println!("{}: {} rows", session.session_key, frame.rows.len());
//!     }
//! }
//! # Ok::<(), incident_risk_core::EngineError>(())
//! ```

// Public modules
pub mod alert;
pub mod asof;
pub mod config;
pub mod detector;
pub mod features;
pub mod labeler;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod rolling;
pub mod time;
pub mod timeline;
pub mod types;

// Re-export main types for convenience
pub use alert::{evaluate_alert_policy, AlertPolicyRow, ScoredPoint};
pub use asof::{asof_join, AsofJoin, AsofStats};
pub use config::EngineConfig;
pub use detector::{Classification, CodeClass, EventDetector, IncidentVocabulary};
pub use features::{FeatureBuilder, SessionInputs};
pub use labeler::{assign_labels, label_rows};
pub use metrics::{calibration_curve, compute_metrics, CalibrationBin, ProbabilityMetrics};
pub use model::{score_frame, RiskModel};
pub use pipeline::{concat_frames, FeaturePipeline, SessionFrame};
pub use rolling::{rolling_count, rolling_distinct_count, rolling_reduce, Reducer};
pub use time::parse_timestamp;
pub use timeline::{build_all_timelines, build_grid, build_session_timeline};
pub use types::{
    AuxRow, EngineError, GridRow, Label, RaceControlRow, Result, Session, SessionKey, Timestamp,
    Value, LABEL_COLUMN, TIME_TO_EVENT_COLUMN,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: default configuration builds a pipeline
        let pipeline =
            FeaturePipeline::new(EngineConfig::default(), IncidentVocabulary::safety_car().unwrap());
        assert!(pipeline.is_ok());
        assert!(!VERSION.is_empty());
    }
}
