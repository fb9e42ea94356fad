//! Engine configuration types
//!
//! Every window, horizon and tolerance used by the engine lives here. Values
//! are plain seconds so the struct can be deserialized straight from the
//! `[engine]` table of the CLI's config file.

use crate::types::{EngineError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Upper bound for every configured duration (one week)
pub const MAX_DURATION_SECONDS: i64 = 7 * 24 * 3600;

/// Configuration for timeline, label and feature computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Spacing of the uniform timeline
    #[serde(default = "default_grid_interval")]
    pub grid_interval_seconds: i64,

    /// Forward-looking window that defines a positive label
    #[serde(default = "default_horizon")]
    pub prediction_horizon_seconds: i64,

    /// Maximum gap between candidate rows of the same event
    #[serde(default = "default_merge_window")]
    pub merge_window_seconds: i64,

    /// Ceiling for the time-to-event label
    #[serde(default = "default_cap")]
    pub time_to_event_cap_seconds: i64,

    /// Short rolling window for log-derived features
    #[serde(default = "default_short_window")]
    pub short_window_seconds: i64,

    /// Medium rolling window for log-derived features
    #[serde(default = "default_medium_window")]
    pub medium_window_seconds: i64,

    /// Long rolling window for log-derived features
    #[serde(default = "default_long_window")]
    pub long_window_seconds: i64,

    /// Rolling window for race dynamics features
    #[serde(default = "default_dynamics_window")]
    pub dynamics_window_seconds: i64,

    /// Long rolling window for race dynamics features
    #[serde(default = "default_dynamics_long_window")]
    pub dynamics_long_window_seconds: i64,

    /// Maximum staleness of an as-of joined weather reading
    #[serde(default = "default_weather_tolerance")]
    pub weather_tolerance_seconds: i64,

    /// Probability thresholds evaluated by the alert policy report
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: Vec<f64>,
}

fn default_grid_interval() -> i64 {
    30
}

fn default_horizon() -> i64 {
    300
}

fn default_merge_window() -> i64 {
    300
}

fn default_cap() -> i64 {
    1800
}

fn default_short_window() -> i64 {
    60
}

fn default_medium_window() -> i64 {
    180
}

fn default_long_window() -> i64 {
    600
}

fn default_dynamics_window() -> i64 {
    120
}

fn default_dynamics_long_window() -> i64 {
    300
}

fn default_weather_tolerance() -> i64 {
    600
}

fn default_alert_thresholds() -> Vec<f64> {
    vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_interval_seconds: default_grid_interval(),
            prediction_horizon_seconds: default_horizon(),
            merge_window_seconds: default_merge_window(),
            time_to_event_cap_seconds: default_cap(),
            short_window_seconds: default_short_window(),
            medium_window_seconds: default_medium_window(),
            long_window_seconds: default_long_window(),
            dynamics_window_seconds: default_dynamics_window(),
            dynamics_long_window_seconds: default_dynamics_long_window(),
            weather_tolerance_seconds: default_weather_tolerance(),
            alert_thresholds: default_alert_thresholds(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the grid interval
    pub fn with_grid_interval(mut self, seconds: i64) -> Self {
        self.grid_interval_seconds = seconds;
        self
    }

    /// Builder method: set the prediction horizon
    pub fn with_horizon(mut self, seconds: i64) -> Self {
        self.prediction_horizon_seconds = seconds;
        self
    }

    /// Builder method: set the event merge window
    pub fn with_merge_window(mut self, seconds: i64) -> Self {
        self.merge_window_seconds = seconds;
        self
    }

    /// Builder method: set the time-to-event cap
    pub fn with_time_to_event_cap(mut self, seconds: i64) -> Self {
        self.time_to_event_cap_seconds = seconds;
        self
    }

    /// Builder method: set the weather as-of tolerance
    pub fn with_weather_tolerance(mut self, seconds: i64) -> Self {
        self.weather_tolerance_seconds = seconds;
        self
    }

    /// Builder method: replace the alert thresholds
    pub fn with_alert_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Check that every duration is positive and at most a week, and every
    /// threshold is a probability
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("grid_interval_seconds", self.grid_interval_seconds),
            ("prediction_horizon_seconds", self.prediction_horizon_seconds),
            ("merge_window_seconds", self.merge_window_seconds),
            ("time_to_event_cap_seconds", self.time_to_event_cap_seconds),
            ("short_window_seconds", self.short_window_seconds),
            ("medium_window_seconds", self.medium_window_seconds),
            ("long_window_seconds", self.long_window_seconds),
            ("dynamics_window_seconds", self.dynamics_window_seconds),
            ("dynamics_long_window_seconds", self.dynamics_long_window_seconds),
            ("weather_tolerance_seconds", self.weather_tolerance_seconds),
        ];

        for (name, value) in durations {
            if value <= 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
            if value > MAX_DURATION_SECONDS {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be at most {} seconds, got {}",
                    name, MAX_DURATION_SECONDS, value
                )));
            }
        }

        if let Some(bad) = self
            .alert_thresholds
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(EngineError::InvalidConfig(format!(
                "alert threshold {} outside [0, 1]",
                bad
            )));
        }

        Ok(())
    }

    pub fn grid_interval(&self) -> Duration {
        Duration::seconds(self.grid_interval_seconds)
    }

    pub fn horizon(&self) -> Duration {
        Duration::seconds(self.prediction_horizon_seconds)
    }

    pub fn merge_window(&self) -> Duration {
        Duration::seconds(self.merge_window_seconds)
    }

    pub fn time_to_event_cap(&self) -> Duration {
        Duration::seconds(self.time_to_event_cap_seconds)
    }

    pub fn weather_tolerance(&self) -> Duration {
        Duration::seconds(self.weather_tolerance_seconds)
    }
}
