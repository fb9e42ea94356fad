//! Features derived from race control messages

use super::{grid_timestamps, FeatureBuilder, SessionInputs};
use crate::config::EngineConfig;
use crate::rolling::{rolling_count, rolling_distinct_count, window_bounds};
use crate::types::{GridRow, Result, Timestamp, Value};
use chrono::Duration;
use regex::RegexSet;
use std::collections::HashMap;

/// Keyword flag columns and the word-bounded pattern each one looks for
pub const KEYWORD_FLAGS: [(&str, &str); 8] = [
    ("debris_flag", r"(?i)\bDEBRIS\b"),
    ("crash_flag", r"(?i)\b(CRASH|ACCIDENT|COLLISION|INCIDENT)\b"),
    ("stopped_flag", r"(?i)\bSTOPPED\b"),
    ("rain_flag", r"(?i)\b(RAIN|WET|SLIPPERY|AQUAPLANING)\b"),
    ("yellow_flag", r"(?i)\bYELLOW\b"),
    ("red_flag", r"(?i)\bRED FLAG\b"),
    ("track_limits_flag", r"(?i)\bTRACK LIMITS\b"),
    ("investigation_flag", r"(?i)\bINVESTIGATION\b"),
];

/// Non-flag columns produced by [`TextFeatures`]
pub const TEXT_FEATURE_COLUMNS: [&str; 6] = [
    "msg_count_60s",
    "msg_count_180s",
    "msg_count_600s",
    "unique_categories_180s",
    "category_entropy_180s",
    "recent_messages_concat",
];

const MESSAGE_SEPARATOR: &str = " | ";

/// Message counts, category diversity, keyword flags and recent text
#[derive(Debug, Clone)]
pub struct TextFeatures {
    short_window: Duration,
    medium_window: Duration,
    long_window: Duration,
    keywords: RegexSet,
}

impl TextFeatures {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            short_window: Duration::seconds(config.short_window_seconds),
            medium_window: Duration::seconds(config.medium_window_seconds),
            long_window: Duration::seconds(config.long_window_seconds),
            keywords: RegexSet::new(KEYWORD_FLAGS.iter().map(|(_, pattern)| *pattern))?,
        })
    }

    fn fill_empty(row: &mut GridRow) {
        for column in &TEXT_FEATURE_COLUMNS[..5] {
            row.set(*column, Some(Value::Number(0.0)));
        }
        row.set("recent_messages_concat", Some(Value::from("")));
        for (flag, _) in KEYWORD_FLAGS {
            row.set(flag, Some(Value::Number(0.0)));
        }
    }
}

/// Shannon entropy in bits; 0 for an empty slice
pub fn shannon_entropy(values: &[&str]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(*value).or_insert(0) += 1;
    }

    let total = values.len() as f64;
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

impl FeatureBuilder for TextFeatures {
    fn name(&self) -> &'static str {
        "text"
    }

    fn apply(&self, rows: &mut [GridRow], inputs: &SessionInputs<'_>) -> Result<()> {
        let log = inputs.race_control;

        if log.is_empty() {
            if let Some(first) = rows.first() {
                log::warn!("No race control data for session {}", first.session_key);
            }
            rows.iter_mut().for_each(Self::fill_empty);
            return Ok(());
        }

        let query = grid_timestamps(rows);
        let source: Vec<Timestamp> = log.iter().map(|r| r.timestamp).collect();
        let categories: Vec<&str> = log.iter().map(|r| r.category_str()).collect();

        let short = rolling_count(&query, &source, self.short_window)?;
        let long = rolling_count(&query, &source, self.long_window)?;
        let unique = rolling_distinct_count(&query, &source, &categories, self.medium_window)?;
        let medium = window_bounds(&query, &source, self.medium_window)?;

        for (i, row) in rows.iter_mut().enumerate() {
            let range = medium[i].clone();
            let messages: Vec<&str> = log[range.clone()].iter().map(|r| r.message_str()).collect();

            row.set("msg_count_60s", Some(Value::from(short[i])));
            row.set("msg_count_180s", Some(Value::from(range.len())));
            row.set("msg_count_600s", Some(Value::from(long[i])));
            row.set("unique_categories_180s", Some(Value::from(unique[i])));
            row.set(
                "category_entropy_180s",
                Some(Value::Number(shannon_entropy(&categories[range]))),
            );

            let matched = self.keywords.matches(&messages.join(" "));
            for (idx, (flag, _)) in KEYWORD_FLAGS.iter().enumerate() {
                let hit = if matched.matched(idx) { 1.0 } else { 0.0 };
                row.set(*flag, Some(Value::Number(hit)));
            }

            row.set(
                "recent_messages_concat",
                Some(Value::Category(messages.join(MESSAGE_SEPARATOR))),
            );
        }

        Ok(())
    }
}
