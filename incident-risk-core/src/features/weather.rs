//! Environmental features: last known weather readings plus short trends

use super::{grid_timestamps, FeatureBuilder, SessionInputs};
use crate::asof::AsofJoin;
use crate::config::EngineConfig;
use crate::rolling::{rolling_reduce_column, Reducer};
use crate::types::{GridRow, Result, Value};
use chrono::Duration;

/// Weather readings joined as-of onto the grid
pub const WEATHER_COLUMNS: [&str; 6] = [
    "rainfall",
    "track_temperature",
    "air_temperature",
    "wind_speed",
    "humidity",
    "pressure",
];

/// Derived weather trend columns
pub const WEATHER_FEATURE_COLUMNS: [&str; 2] = ["max_rainfall_5m", "track_temp_delta_5m"];

#[derive(Debug, Clone)]
pub struct WeatherFeatures {
    tolerance: Duration,
    trend_window: Duration,
}

impl WeatherFeatures {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tolerance: config.weather_tolerance(),
            trend_window: config.horizon(),
        }
    }

    fn fill_null(rows: &mut [GridRow]) {
        for row in rows {
            for column in WEATHER_COLUMNS.iter().chain(&WEATHER_FEATURE_COLUMNS) {
                row.set(*column, None);
            }
        }
    }
}

impl FeatureBuilder for WeatherFeatures {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn apply(&self, rows: &mut [GridRow], inputs: &SessionInputs<'_>) -> Result<()> {
        let weather = inputs.weather;

        if weather.is_empty() {
            if let Some(first) = rows.first() {
                log::warn!("No weather data for session {}", first.session_key);
            }
            Self::fill_null(rows);
            return Ok(());
        }

        AsofJoin::new()
            .with_tolerance(self.tolerance)
            .with_columns(WEATHER_COLUMNS)
            .apply(rows, weather)?;

        let query = grid_timestamps(rows);
        let max_rain =
            rolling_reduce_column(&query, weather, "rainfall", self.trend_window, Reducer::Max)?;
        let min_track = rolling_reduce_column(
            &query,
            weather,
            "track_temperature",
            self.trend_window,
            Reducer::Min,
        )?;

        for ((row, rain), min_temp) in rows.iter_mut().zip(max_rain).zip(min_track) {
            let delta = match (row.number("track_temperature"), min_temp) {
                (Some(current), Some(min)) => Some(Value::Number(current - min)),
                _ => None,
            };
            row.set("max_rainfall_5m", rain.map(Value::Number));
            row.set("track_temp_delta_5m", delta);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuxRow, Session, Timestamp};
    use chrono::{TimeZone, Utc};

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2023, 9, 17, 12, 0, 0).unwrap()
    }

    fn grid(minutes: std::ops::Range<i64>) -> Vec<GridRow> {
        let session = Session {
            session_key: 9158,
            meeting_key: 1219,
            year: 2023,
            meeting_name: "Singapore Grand Prix".into(),
            date_start: None,
            date_end: None,
        };
        minutes
            .map(|m| GridRow::new(&session, base() + Duration::minutes(m)))
            .collect()
    }

    fn reading(minute: i64, rain: f64, track: f64) -> AuxRow {
        AuxRow::new(9158, base() + Duration::minutes(minute))
            .with_number("rainfall", rain)
            .with_number("track_temperature", track)
            .with_number("air_temperature", 29.0)
    }

    #[test]
    fn test_asof_and_trends() {
        let weather = vec![
            reading(0, 0.0, 40.0),
            reading(2, 1.0, 38.5),
            reading(4, 0.0, 37.0),
        ];
        let mut rows = grid(0..8);
        let inputs = SessionInputs {
            weather: &weather,
            ..Default::default()
        };
        WeatherFeatures::new(&EngineConfig::default())
            .apply(&mut rows, &inputs)
            .unwrap();

        assert_eq!(rows[1].number("track_temperature"), Some(40.0));
        assert_eq!(rows[3].number("rainfall"), Some(1.0));
        assert_eq!(rows[3].number("max_rainfall_5m"), Some(1.0));
        assert_eq!(rows[4].number("track_temp_delta_5m"), Some(0.0));
        assert_eq!(rows[1].number("track_temp_delta_5m"), Some(0.0));

        // At minute 5 the window (0, 5] holds readings 2 and 4
        assert_eq!(rows[5].number("track_temperature"), Some(37.0));
        assert_eq!(rows[5].number("track_temp_delta_5m"), Some(0.0));
        // At minute 7 the window (2, 7] holds only reading 4
        assert_eq!(rows[7].number("max_rainfall_5m"), Some(0.0));

        // Columns with no source data are present but null
        assert!(rows[0].features.contains_key("humidity"));
        assert_eq!(rows[0].number("humidity"), None);
    }

    #[test]
    fn test_delta_against_window_minimum() {
        let weather = vec![reading(0, 0.0, 35.0), reading(1, 0.0, 41.0)];
        let mut rows = grid(1..2);
        let inputs = SessionInputs {
            weather: &weather,
            ..Default::default()
        };
        WeatherFeatures::new(&EngineConfig::default())
            .apply(&mut rows, &inputs)
            .unwrap();
        assert_eq!(rows[0].number("track_temp_delta_5m"), Some(6.0));
    }

    #[test]
    fn test_stale_readings_become_null() {
        let weather = vec![reading(0, 0.5, 30.0)];
        let mut rows = grid(10..12);
        let inputs = SessionInputs {
            weather: &weather,
            ..Default::default()
        };
        WeatherFeatures::new(&EngineConfig::default())
            .apply(&mut rows, &inputs)
            .unwrap();

        assert_eq!(rows[0].number("rainfall"), Some(0.5));
        assert_eq!(rows[1].number("rainfall"), None);
        assert_eq!(rows[1].number("max_rainfall_5m"), None);
        assert_eq!(rows[1].number("track_temp_delta_5m"), None);
    }

    #[test]
    fn test_missing_weather_is_all_null() {
        let mut rows = grid(0..3);
        WeatherFeatures::new(&EngineConfig::default())
            .apply(&mut rows, &SessionInputs::default())
            .unwrap();

        for row in &rows {
            for column in WEATHER_COLUMNS.iter().chain(&WEATHER_FEATURE_COLUMNS) {
                assert_eq!(row.features.get(*column), Some(&None));
            }
        }
    }
}
