//! Loading of JSON record dumps
//!
//! Each endpoint dump is a JSON array of flat objects as served by OpenF1:
//! `session_key` plus a `date` timestamp on every row, endpoint specific value
//! fields otherwise. Rows are partitioned by session and stably sorted by
//! timestamp before they reach the engine.

use anyhow::{Context, Result};
use incident_risk_core::time::{parse_timestamp, require_timestamp};
use incident_risk_core::{AuxRow, RaceControlRow, Session, SessionInputs, SessionKey, Timestamp, Value};
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Structural problems in a record dump
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("{file}: expected a JSON array of records")]
    NotAnArray { file: String },

    #[error("{file}: record {index} is not an object")]
    NotAnObject { file: String, index: usize },

    #[error("{file}: record {index} is missing '{field}'")]
    MissingField {
        file: String,
        index: usize,
        field: &'static str,
    },
}

/// Fields that identify a row rather than carry a reading
const KEY_FIELDS: [&str; 3] = ["session_key", "meeting_key", "date"];

type Record = Map<String, Json>;

/// Anything that belongs to one session at one instant
pub trait SessionRecord {
    fn session_key(&self) -> SessionKey;
    fn timestamp(&self) -> Timestamp;
}

impl SessionRecord for RaceControlRow {
    fn session_key(&self) -> SessionKey {
        self.session_key
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl SessionRecord for AuxRow {
    fn session_key(&self) -> SessionKey {
        self.session_key
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {:?}", path))?;
    let json: Json = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input file: {:?}", path))?;

    let file = path.display().to_string();
    let Json::Array(items) = json else {
        return Err(InputError::NotAnArray { file }.into());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Json::Object(map) => Ok(map),
            _ => Err(InputError::NotAnObject {
                file: file.clone(),
                index,
            }
            .into()),
        })
        .collect()
}

fn integer_field(record: &Record, field: &str) -> Option<i64> {
    match record.get(field)? {
        Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(record: &Record, field: &str) -> Option<String> {
    match record.get(field)? {
        Json::String(s) => Some(s.clone()),
        Json::Null => None,
        other => Some(other.to_string()),
    }
}

fn timestamp_field(record: &Record, field: &str) -> Option<Timestamp> {
    record.get(field)?.as_str().and_then(parse_timestamp)
}

/// A row's `date`: absent or null is `None`, anything unparseable is an error
fn row_timestamp(record: &Record, file: &str, index: usize) -> Result<Option<Timestamp>> {
    let raw = match record.get("date") {
        None | Some(Json::Null) => return Ok(None),
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let ts = require_timestamp("input", &raw)
        .with_context(|| format!("{}: record {} has an unusable 'date'", file, index))?;
    Ok(Some(ts))
}

fn require_key(record: &Record, file: &str, index: usize) -> Result<SessionKey> {
    integer_field(record, "session_key").ok_or_else(|| {
        InputError::MissingField {
            file: file.to_string(),
            index,
            field: "session_key",
        }
        .into()
    })
}

/// JSON scalar to engine value; null and nested values are dropped
fn to_value(json: &Json) -> Option<Value> {
    match json {
        Json::Number(n) => n.as_f64().map(Value::Number),
        Json::Bool(b) => Some(Value::Number(if *b { 1.0 } else { 0.0 })),
        Json::String(s) => Some(Value::Category(s.clone())),
        _ => None,
    }
}

/// Load session descriptors.
///
/// Unparseable bounds become `None`; such sessions produce an empty grid.
pub fn load_sessions(path: &Path) -> Result<Vec<Session>> {
    let file = path.display().to_string();
    let records = read_records(path)?;

    let sessions = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let session_key = require_key(record, &file, index)?;
            let meeting_name = ["meeting_name", "location", "circuit_short_name"]
                .iter()
                .find_map(|f| string_field(record, f))
                .unwrap_or_else(|| "?".to_string());

            Ok(Session {
                session_key,
                meeting_key: integer_field(record, "meeting_key").unwrap_or_default(),
                year: integer_field(record, "year").unwrap_or_default() as i32,
                meeting_name,
                date_start: timestamp_field(record, "date_start"),
                date_end: timestamp_field(record, "date_end"),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    log::info!("Loaded {} session(s) from {:?}", sessions.len(), path);
    Ok(sessions)
}

fn warn_dropped(path: &Path, dropped: usize) {
    if dropped > 0 {
        log::warn!(
            "{:?}: dropped {} row(s) without a 'date'",
            path,
            dropped
        );
    }
}

/// Load race control messages
pub fn load_race_control(path: &Path) -> Result<Vec<RaceControlRow>> {
    let file = path.display().to_string();
    let records = read_records(path)?;
    let mut rows = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for (index, record) in records.iter().enumerate() {
        let session_key = require_key(record, &file, index)?;
        let Some(timestamp) = row_timestamp(record, &file, index)? else {
            dropped += 1;
            continue;
        };
        rows.push(RaceControlRow {
            session_key,
            timestamp,
            category: string_field(record, "category"),
            flag: string_field(record, "flag"),
            message: string_field(record, "message"),
        });
    }

    warn_dropped(path, dropped);
    log::info!("Loaded {} race control row(s) from {:?}", rows.len(), path);
    Ok(rows)
}

/// Load an auxiliary series; every non-key scalar field becomes a value column
pub fn load_aux(path: &Path) -> Result<Vec<AuxRow>> {
    let file = path.display().to_string();
    let records = read_records(path)?;
    let mut rows = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for (index, record) in records.iter().enumerate() {
        let session_key = require_key(record, &file, index)?;
        let Some(timestamp) = row_timestamp(record, &file, index)? else {
            dropped += 1;
            continue;
        };

        let mut row = AuxRow::new(session_key, timestamp);
        for (field, json) in record {
            if KEY_FIELDS.contains(&field.as_str()) {
                continue;
            }
            if let Some(value) = to_value(json) {
                row.values.insert(field.clone(), value);
            }
        }
        rows.push(row);
    }

    warn_dropped(path, dropped);
    log::info!("Loaded {} row(s) from {:?}", rows.len(), path);
    Ok(rows)
}

/// Group rows by session, each group stably sorted by timestamp
pub fn partition_by_session<T: SessionRecord>(rows: Vec<T>) -> HashMap<SessionKey, Vec<T>> {
    let mut parts: HashMap<SessionKey, Vec<T>> = HashMap::new();
    for row in rows {
        parts.entry(row.session_key()).or_default().push(row);
    }
    for rows in parts.values_mut() {
        rows.sort_by_key(|r| r.timestamp());
    }
    parts
}

/// All loaded inputs, partitioned by session
#[derive(Debug, Default)]
pub struct InputData {
    pub sessions: Vec<Session>,
    pub race_control: HashMap<SessionKey, Vec<RaceControlRow>>,
    pub weather: HashMap<SessionKey, Vec<AuxRow>>,
    pub position: HashMap<SessionKey, Vec<AuxRow>>,
    pub intervals: HashMap<SessionKey, Vec<AuxRow>>,
}

fn slice_for<T>(parts: &HashMap<SessionKey, Vec<T>>, key: SessionKey) -> &[T] {
    parts.get(&key).map(Vec::as_slice).unwrap_or(&[])
}

impl InputData {
    /// The engine's view of one session's rows
    pub fn inputs_for(&self, key: SessionKey) -> SessionInputs<'_> {
        SessionInputs {
            race_control: slice_for(&self.race_control, key),
            weather: slice_for(&self.weather, key),
            position: slice_for(&self.position, key),
            intervals: slice_for(&self.intervals, key),
        }
    }
}

/// Load whichever dumps are configured; absent auxiliary dumps are empty
pub fn load_inputs(
    sessions: &Path,
    race_control: Option<&Path>,
    weather: Option<&Path>,
    position: Option<&Path>,
    intervals: Option<&Path>,
) -> Result<InputData> {
    let aux = |path: Option<&Path>, name: &str| -> Result<HashMap<SessionKey, Vec<AuxRow>>> {
        match path {
            Some(p) => Ok(partition_by_session(load_aux(p)?)),
            None => {
                log::warn!("No {} input configured, its features will be null", name);
                Ok(HashMap::new())
            }
        }
    };

    let race_control = match race_control {
        Some(p) => partition_by_session(load_race_control(p)?),
        None => {
            log::warn!("No race_control input configured, no events will be detected");
            HashMap::new()
        }
    };

    Ok(InputData {
        sessions: load_sessions(sessions)?,
        race_control,
        weather: aux(weather, "weather")?,
        position: aux(position, "position")?,
        intervals: aux(intervals, "intervals")?,
    })
}
