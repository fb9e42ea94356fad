//! Feature builders
//!
//! Each builder is a thin composition of the rolling aggregator and the as-of
//! join. Builders enrich one session's grid rows in place and only ever read
//! source rows at or before each grid timestamp.

mod dynamics;
mod text;
mod weather;

pub use dynamics::{DynamicsFeatures, DYNAMICS_FEATURE_COLUMNS};
pub use text::{TextFeatures, KEYWORD_FLAGS, TEXT_FEATURE_COLUMNS};
pub use weather::{WeatherFeatures, WEATHER_COLUMNS, WEATHER_FEATURE_COLUMNS};

use crate::config::EngineConfig;
use crate::types::{AuxRow, EngineError, GridRow, RaceControlRow, Result, SessionKey, Timestamp};

/// One session's source records, each slice sorted by timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionInputs<'a> {
    pub race_control: &'a [RaceControlRow],
    pub weather: &'a [AuxRow],
    pub position: &'a [AuxRow],
    pub intervals: &'a [AuxRow],
}

impl<'a> SessionInputs<'a> {
    /// Verify that every record belongs to `session_key`
    pub fn check_session(&self, session_key: SessionKey) -> Result<()> {
        let keys = self
            .race_control
            .iter()
            .map(|r| r.session_key)
            .chain(self.weather.iter().map(|r| r.session_key))
            .chain(self.position.iter().map(|r| r.session_key))
            .chain(self.intervals.iter().map(|r| r.session_key));

        for found in keys {
            if found != session_key {
                return Err(EngineError::CrossEntityLeakage {
                    component: "features",
                    expected: session_key,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// A per-domain feature builder
pub trait FeatureBuilder {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Add this builder's columns to one session's grid rows
    fn apply(&self, rows: &mut [GridRow], inputs: &SessionInputs<'_>) -> Result<()>;
}

/// The standard builder set: text, weather, dynamics
pub fn default_builders(config: &EngineConfig) -> Result<Vec<Box<dyn FeatureBuilder + Send + Sync>>> {
    Ok(vec![
        Box::new(TextFeatures::new(config)?),
        Box::new(WeatherFeatures::new(config)),
        Box::new(DynamicsFeatures::new(config)),
    ])
}

pub(crate) fn grid_timestamps(rows: &[GridRow]) -> Vec<Timestamp> {
    rows.iter().map(|r| r.timestamp).collect()
}

pub(crate) fn aux_timestamps(rows: &[AuxRow]) -> Vec<Timestamp> {
    rows.iter().map(|r| r.timestamp).collect()
}
