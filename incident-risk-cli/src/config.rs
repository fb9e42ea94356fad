//! Configuration loading and parsing

use anyhow::{Context, Result};
use incident_risk_core::{CodeClass, EngineConfig, IncidentVocabulary};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
}

/// Record dumps, one JSON array per endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    pub sessions: Option<PathBuf>,
    pub race_control: Option<PathBuf>,
    pub weather: Option<PathBuf>,
    pub position: Option<PathBuf>,
    pub intervals: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    /// Number of calibration bins in the evaluation report
    #[serde(default = "default_calibration_bins")]
    pub calibration_bins: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            formats: default_formats(),
            calibration_bins: default_calibration_bins(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Csv, OutputFormat::Json, OutputFormat::Markdown]
}

fn default_calibration_bins() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
    Markdown,
}

/// Additions to the built-in Safety Car vocabulary
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VocabularyConfig {
    #[serde(default)]
    pub start_categories: Vec<String>,
    #[serde(default)]
    pub start_flags: Vec<String>,
    /// Codes that must never mark a start, even if built in
    #[serde(default)]
    pub neutral_categories: Vec<String>,
    #[serde(default)]
    pub neutral_flags: Vec<String>,
    #[serde(default)]
    pub start_patterns: Vec<String>,
    #[serde(default)]
    pub end_patterns: Vec<String>,
}

impl VocabularyConfig {
    /// Build the detection vocabulary: Safety Car defaults plus these additions
    pub fn build(&self) -> Result<IncidentVocabulary> {
        let mut vocabulary = IncidentVocabulary::safety_car()?;

        for code in &self.start_categories {
            vocabulary = vocabulary.with_category(code.clone(), CodeClass::Start);
        }
        for code in &self.start_flags {
            vocabulary = vocabulary.with_flag(code.clone(), CodeClass::Start);
        }
        for code in &self.neutral_categories {
            vocabulary = vocabulary.with_category(code.clone(), CodeClass::Neutral);
        }
        for code in &self.neutral_flags {
            vocabulary = vocabulary.with_flag(code.clone(), CodeClass::Neutral);
        }

        if !self.start_patterns.is_empty() || !self.end_patterns.is_empty() {
            vocabulary = vocabulary
                .with_extra_patterns(&self.start_patterns, &self.end_patterns)
                .context("Invalid vocabulary pattern")?;
        }

        Ok(vocabulary)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .engine
        .validate()
        .with_context(|| format!("Invalid [engine] section in {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_risk_core::RaceControlRow;
    use chrono::Utc;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [input]
            sessions = "data/sessions.json"
            race_control = "data/race_control.json"

            [output]
            dir = "out"
            formats = ["csv", "markdown"]

            [engine]
            grid_interval_seconds = 10
            alert_thresholds = [0.25, 0.5]
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.input.sessions, Some(PathBuf::from("data/sessions.json")));
        assert!(config.input.weather.is_none());
        assert_eq!(config.output.formats, vec![OutputFormat::Csv, OutputFormat::Markdown]);
        assert_eq!(config.output.calibration_bins, 10);
        assert_eq!(config.engine.grid_interval_seconds, 10);
        assert_eq!(config.engine.prediction_horizon_seconds, 300);
        assert_eq!(config.engine.alert_thresholds, vec![0.25, 0.5]);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.output.dir, PathBuf::from("output"));
        assert_eq!(config.output.formats.len(), 3);
    }

    #[test]
    fn test_load_config_rejects_invalid_engine() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmerge_window_seconds = 0").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("merge_window_seconds"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_vocabulary_additions() {
        let config = VocabularyConfig {
            start_categories: vec!["RedFlag".into()],
            neutral_flags: vec!["SC".into()],
            end_patterns: vec![r"(?i)\bSUSPENDED\b".into()],
            ..Default::default()
        };
        let vocabulary = config.build().unwrap();

        let row = |category: &str, flag: &str, message: &str| RaceControlRow {
            session_key: 1,
            timestamp: Utc::now(),
            category: Some(category.to_string()),
            flag: Some(flag.to_string()),
            message: Some(message.to_string()),
        };

        assert!(vocabulary.classify(&row("RedFlag", "", "RED FLAG")).is_start());
        assert!(!vocabulary.classify(&row("Flag", "SC", "")).is_start());
        assert!(!vocabulary
            .classify(&row("RedFlag", "", "SESSION SUSPENDED"))
            .is_start());
    }

    #[test]
    fn test_invalid_pattern_reported() {
        let config = VocabularyConfig {
            start_patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        assert!(config.build().is_err());
    }
}
