//! Core types for the incident risk engine
//!
//! This module defines the record shapes the engine consumes (sessions, race
//! control rows, auxiliary series rows) and the grid rows it produces. The
//! engine never mutates its inputs - every output is derived fresh from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type used throughout the engine
pub type Timestamp = DateTime<Utc>;

/// Session identifier (OpenF1 `session_key`)
pub type SessionKey = i64;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Name of the binary label column
pub const LABEL_COLUMN: &str = "y_sc_5m";

/// Name of the capped time-to-next-event column
pub const TIME_TO_EVENT_COLUMN: &str = "time_to_sc_seconds";

/// Column names owned by every grid row. Auxiliary columns with these names
/// are never joined onto the grid.
pub const GRID_COLUMNS: [&str; 7] = [
    "session_key",
    "meeting_key",
    "year",
    "meeting_name",
    "timestamp",
    LABEL_COLUMN,
    TIME_TO_EVENT_COLUMN,
];

/// Errors that can occur while building timelines, labels and features
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{component}: timestamps not in chronological order at index {index} (session {session_key:?}, value {value})")]
    Unsorted {
        component: &'static str,
        session_key: Option<SessionKey>,
        index: usize,
        value: Timestamp,
    },

    #[error("{component}: invalid timestamp {value:?}")]
    InvalidTimestamp {
        component: &'static str,
        value: String,
    },

    #[error("{component}: column '{column}' is not {expected}")]
    TypeMismatch {
        component: &'static str,
        column: String,
        expected: &'static str,
    },

    #[error("{component}: cross-session leakage, expected session {expected} but found {found}")]
    CrossEntityLeakage {
        component: &'static str,
        expected: SessionKey,
        found: SessionKey,
    },

    #[error("{component}: length mismatch, expected {expected} but found {found}")]
    LengthMismatch {
        component: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Unknown reducer '{0}' (expected one of mean, max, min, std, sum)")]
    UnknownReducer(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

impl EngineError {
    /// Attach a session key to errors raised below the session level
    pub fn in_session(self, key: SessionKey) -> Self {
        match self {
            EngineError::Unsorted {
                component,
                session_key: None,
                index,
                value,
            } => EngineError::Unsorted {
                component,
                session_key: Some(key),
                index,
                value,
            },
            other => other,
        }
    }

    /// Whether a batch may log this error and continue with other sessions.
    ///
    /// Leakage across sessions is a defect in the caller, never a data problem,
    /// so it must stop the batch.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::CrossEntityLeakage { .. })
    }
}

impl From<regex::Error> for EngineError {
    fn from(err: regex::Error) -> Self {
        EngineError::InvalidPattern(err.to_string())
    }
}

/// Session descriptor, sourced externally and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub session_key: SessionKey,
    /// Grouping identifier (race weekend)
    pub meeting_key: i64,
    /// Season year
    pub year: i32,
    /// Display name of the meeting
    pub meeting_name: String,
    /// Session start (None when the source had no usable value)
    pub date_start: Option<Timestamp>,
    /// Session end (None when the source had no usable value)
    pub date_end: Option<Timestamp>,
}

/// One race control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceControlRow {
    pub session_key: SessionKey,
    pub timestamp: Timestamp,
    /// Structured category code (e.g. "SafetyCar", "Flag")
    pub category: Option<String>,
    /// Structured flag code (e.g. "YELLOW", "SC")
    pub flag: Option<String>,
    /// Free-text message
    pub message: Option<String>,
}

impl RaceControlRow {
    /// Category code, or "" when absent
    pub fn category_str(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }

    /// Flag code, or "" when absent
    pub fn flag_str(&self) -> &str {
        self.flag.as_deref().unwrap_or("")
    }

    /// Message text, or "" when absent
    pub fn message_str(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// A value carried by an auxiliary series row or a feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Numeric reading
    Number(f64),
    /// Categorical or free-text value
    Category(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{}", v),
            Value::Category(v) => write!(f, "{}", v),
        }
    }
}

impl Value {
    /// Numeric view of the value; NaN is treated as missing
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    /// Categorical view of the value
    pub fn as_category(&self) -> Option<&str> {
        match self {
            Value::Category(v) => Some(v),
            Value::Number(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Category(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Category(v.to_string())
    }
}

/// One row of an auxiliary series (weather, positions, intervals, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxRow {
    pub session_key: SessionKey,
    pub timestamp: Timestamp,
    /// Named value columns; a missing key means the reading was null
    pub values: BTreeMap<String, Value>,
}

impl AuxRow {
    /// Create a row with no value columns
    pub fn new(session_key: SessionKey, timestamp: Timestamp) -> Self {
        Self {
            session_key,
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Builder method: add a numeric column
    pub fn with_number(mut self, column: impl Into<String>, value: f64) -> Self {
        self.values.insert(column.into(), Value::Number(value));
        self
    }

    /// Builder method: add a categorical column
    pub fn with_category(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), Value::Category(value.into()));
        self
    }

    /// Numeric value of a column, if present
    pub fn number(&self, column: &str) -> Option<f64> {
        self.values.get(column).and_then(Value::as_f64)
    }
}

/// Label attributes of a grid point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// True when the next event starts within the prediction horizon
    pub positive: bool,
    /// Seconds until the next event, capped
    pub time_to_event_seconds: f64,
}

/// One point of the uniform evaluation grid, enriched in place by the
/// labeler and the feature builders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub session_key: SessionKey,
    pub meeting_key: i64,
    pub year: i32,
    pub meeting_name: String,
    pub timestamp: Timestamp,
    pub label: Option<Label>,
    /// Feature columns; `None` is a null value
    pub features: BTreeMap<String, Option<Value>>,
}

impl GridRow {
    /// Create an unlabeled grid row for a session
    pub fn new(session: &Session, timestamp: Timestamp) -> Self {
        Self {
            session_key: session.session_key,
            meeting_key: session.meeting_key,
            year: session.year,
            meeting_name: session.meeting_name.clone(),
            timestamp,
            label: None,
            features: BTreeMap::new(),
        }
    }

    /// Set a feature column
    pub fn set(&mut self, column: impl Into<String>, value: Option<Value>) {
        self.features.insert(column.into(), value);
    }

    /// Numeric value of a feature column, if present and non-null
    pub fn number(&self, column: &str) -> Option<f64> {
        self.features
            .get(column)
            .and_then(|v| v.as_ref())
            .and_then(Value::as_f64)
    }

    /// Whether a column name is already owned by this row
    pub fn has_column(&self, column: &str) -> bool {
        GRID_COLUMNS.contains(&column) || self.features.contains_key(column)
    }
}
