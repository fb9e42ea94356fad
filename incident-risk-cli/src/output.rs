//! Feature matrix CSV output and the evaluation inputs read back from CSV

use anyhow::{Context, Result};
use incident_risk_core::time::parse_timestamp;
use incident_risk_core::{
    GridRow, ScoredPoint, SessionFrame, SessionKey, Timestamp, LABEL_COLUMN, TIME_TO_EVENT_COLUMN,
};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::Path;

const KEY_COLUMNS: [&str; 5] = ["session_key", "meeting_key", "year", "meeting_name", "timestamp"];

fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn row_record(row: &GridRow, features: &BTreeSet<String>) -> Vec<String> {
    let mut record = vec![
        row.session_key.to_string(),
        row.meeting_key.to_string(),
        row.year.to_string(),
        row.meeting_name.clone(),
        format_timestamp(row.timestamp),
    ];

    match row.label {
        Some(label) => {
            record.push(if label.positive { "1" } else { "0" }.to_string());
            record.push(label.time_to_event_seconds.to_string());
        }
        None => record.extend([String::new(), String::new()]),
    }

    for column in features {
        let cell = match row.features.get(column) {
            Some(Some(value)) => value.to_string(),
            _ => String::new(),
        };
        record.push(cell);
    }
    record
}

/// Write the feature matrix: keys, descriptor, labels, then features sorted by name
pub fn write_matrix<W: Write>(writer: W, frames: &[SessionFrame]) -> Result<usize> {
    let features: BTreeSet<String> = frames.iter().flat_map(|f| f.feature_columns()).collect();

    let mut csv = csv::Writer::from_writer(writer);
    let header: Vec<&str> = KEY_COLUMNS
        .iter()
        .copied()
        .chain([LABEL_COLUMN, TIME_TO_EVENT_COLUMN])
        .chain(features.iter().map(String::as_str))
        .collect();
    csv.write_record(&header)?;

    let mut written = 0usize;
    for frame in frames {
        for row in &frame.rows {
            csv.write_record(row_record(row, &features))?;
            written += 1;
        }
    }
    csv.flush()?;
    Ok(written)
}

/// Write the feature matrix to a file
pub fn write_matrix_file(path: &Path, frames: &[SessionFrame]) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create matrix file: {:?}", path))?;
    let written = write_matrix(std::io::BufWriter::new(file), frames)
        .with_context(|| format!("Failed to write matrix file: {:?}", path))?;
    log::info!("Wrote {} row(s) to {:?}", written, path);
    Ok(written)
}

/// Label columns of one matrix row
#[derive(Debug, Deserialize)]
struct LabeledRecord {
    session_key: SessionKey,
    timestamp: String,
    y_sc_5m: Option<u8>,
    time_to_sc_seconds: Option<f64>,
}

/// One externally produced probability
#[derive(Debug, Deserialize)]
struct PredictionRecord {
    session_key: SessionKey,
    timestamp: String,
    probability: f64,
}

fn parse_key(session_key: SessionKey, raw: &str, line: usize) -> Result<(SessionKey, Timestamp)> {
    let ts = parse_timestamp(raw)
        .with_context(|| format!("Line {}: invalid timestamp {:?}", line, raw))?;
    Ok((session_key, ts))
}

/// Join predictions onto the labeled matrix by (session, timestamp).
///
/// Matrix rows without a prediction or without a label are left out.
pub fn join_predictions<R1: Read, R2: Read>(matrix: R1, predictions: R2) -> Result<Vec<ScoredPoint>> {
    let mut probabilities: HashMap<(SessionKey, Timestamp), f64> = HashMap::new();
    for (i, record) in csv::Reader::from_reader(predictions).deserialize::<PredictionRecord>().enumerate() {
        let record: PredictionRecord = record.context("Failed to parse prediction row")?;
        let key = parse_key(record.session_key, &record.timestamp, i + 2)?;
        probabilities.insert(key, record.probability);
    }

    let mut points = Vec::new();
    let mut unmatched = 0usize;
    for (i, record) in csv::Reader::from_reader(matrix).deserialize::<LabeledRecord>().enumerate() {
        let record: LabeledRecord = record.context("Failed to parse matrix row")?;
        let key = parse_key(record.session_key, &record.timestamp, i + 2)?;

        let (Some(label), Some(tte)) = (record.y_sc_5m, record.time_to_sc_seconds) else {
            unmatched += 1;
            continue;
        };
        let Some(probability) = probabilities.remove(&key) else {
            unmatched += 1;
            continue;
        };

        points.push(ScoredPoint {
            session_key: record.session_key,
            probability,
            label: label == 1,
            time_to_event_seconds: tte,
        });
    }

    if unmatched > 0 {
        log::warn!("{} matrix row(s) had no label or prediction", unmatched);
    }
    if !probabilities.is_empty() {
        log::warn!(
            "{} prediction(s) did not match any matrix row",
            probabilities.len()
        );
    }
    Ok(points)
}

/// Join a matrix file with a predictions file
pub fn join_prediction_files(matrix: &Path, predictions: &Path) -> Result<Vec<ScoredPoint>> {
    let matrix_file = std::fs::File::open(matrix)
        .with_context(|| format!("Failed to open matrix file: {:?}", matrix))?;
    let prediction_file = std::fs::File::open(predictions)
        .with_context(|| format!("Failed to open predictions file: {:?}", predictions))?;
    join_predictions(matrix_file, prediction_file)
}
