//! Incident start detection from race control messages
//!
//! Each row is classified against an [`IncidentVocabulary`] in a fixed
//! priority order:
//!
//! 1. message matches an end pattern (ENDING, WITHDRAWN, CLEAR, ...) → not a start
//! 2. category or flag code is classified as a start → start
//! 3. message matches a start pattern (SAFETY CAR ... DEPLOYED) → start
//! 4. otherwise → not a start
//!
//! The end check runs before the structured codes even when both apply, so
//! "SAFETY CAR ENDING" with category `SafetyCar` is not a start.
//!
//! Start rows are then clustered: a row joins the current event while the gap
//! to the previous clustered row is within the merge window. One timestamp is
//! emitted per cluster, the first row's.

use crate::types::{EngineError, RaceControlRow, Result, SessionKey, Timestamp};
use chrono::Duration;
use regex::RegexSet;
use std::collections::HashMap;

const SAFETY_CAR_CATEGORIES: [&str; 3] = ["SafetyCar", "Vsc", "VirtualSafetyCar"];
const SAFETY_CAR_FLAGS: [&str; 4] = ["SC", "VSC", "SAFETY CAR", "VIRTUAL SAFETY CAR"];
const SAFETY_CAR_START_PATTERNS: [&str; 1] =
    [r"(?i)\b(SAFETY CAR|VIRTUAL SAFETY CAR|VSC)\b.*\b(DEPLOYED|OUT|PERIOD)\b"];
const SAFETY_CAR_END_PATTERNS: [&str; 1] =
    [r"(?i)\b(ENDING|WITHDRAWN|IN THIS LAP|RESUME|CLEAR)\b"];

/// Classification of a structured category or flag code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    /// The code marks an incident start
    Start,
    /// The code is known but does not mark a start
    Neutral,
}

/// Why a row was or was not classified as an event start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Message matched an end/clear pattern (checked first)
    Excluded,
    /// Category or flag code is a start code
    StructuredStart,
    /// Message matched a start pattern
    TextStart,
    /// Nothing matched
    NotStart,
}

impl Classification {
    pub fn is_start(self) -> bool {
        matches!(
            self,
            Classification::StructuredStart | Classification::TextStart
        )
    }
}

/// Explicit classification table: code lookups plus two compiled pattern sets
#[derive(Debug, Clone)]
pub struct IncidentVocabulary {
    categories: HashMap<String, CodeClass>,
    flags: HashMap<String, CodeClass>,
    start_patterns: RegexSet,
    end_patterns: RegexSet,
}

impl IncidentVocabulary {
    /// Create a vocabulary with no codes and the given message patterns
    pub fn new<S: AsRef<str>>(start_patterns: &[S], end_patterns: &[S]) -> Result<Self> {
        Ok(Self {
            categories: HashMap::new(),
            flags: HashMap::new(),
            start_patterns: RegexSet::new(start_patterns)?,
            end_patterns: RegexSet::new(end_patterns)?,
        })
    }

    /// Safety Car / Virtual Safety Car vocabulary
    pub fn safety_car() -> Result<Self> {
        let mut vocabulary = Self::new(&SAFETY_CAR_START_PATTERNS, &SAFETY_CAR_END_PATTERNS)?;
        for code in SAFETY_CAR_CATEGORIES {
            vocabulary = vocabulary.with_category(code, CodeClass::Start);
        }
        for code in SAFETY_CAR_FLAGS {
            vocabulary = vocabulary.with_flag(code, CodeClass::Start);
        }
        Ok(vocabulary)
    }

    /// Builder method: classify a category code
    pub fn with_category(mut self, code: impl Into<String>, class: CodeClass) -> Self {
        self.categories.insert(code.into(), class);
        self
    }

    /// Builder method: classify a flag code
    pub fn with_flag(mut self, code: impl Into<String>, class: CodeClass) -> Self {
        self.flags.insert(code.into(), class);
        self
    }

    /// Rebuild the vocabulary with additional message patterns
    pub fn with_extra_patterns<S: AsRef<str>>(
        self,
        start_patterns: &[S],
        end_patterns: &[S],
    ) -> Result<Self> {
        let start: Vec<String> = self
            .start_patterns
            .patterns()
            .iter()
            .cloned()
            .chain(start_patterns.iter().map(|p| p.as_ref().to_string()))
            .collect();
        let end: Vec<String> = self
            .end_patterns
            .patterns()
            .iter()
            .cloned()
            .chain(end_patterns.iter().map(|p| p.as_ref().to_string()))
            .collect();

        Ok(Self {
            categories: self.categories,
            flags: self.flags,
            start_patterns: RegexSet::new(start)?,
            end_patterns: RegexSet::new(end)?,
        })
    }

    fn code_is_start(table: &HashMap<String, CodeClass>, code: &str) -> bool {
        table.get(code) == Some(&CodeClass::Start)
    }

    /// Classify one race control row
    pub fn classify(&self, row: &RaceControlRow) -> Classification {
        let message = row.message_str();

        if self.end_patterns.is_match(message) {
            return Classification::Excluded;
        }

        if Self::code_is_start(&self.categories, row.category_str())
            || Self::code_is_start(&self.flags, row.flag_str())
        {
            return Classification::StructuredStart;
        }

        if self.start_patterns.is_match(message) {
            return Classification::TextStart;
        }

        Classification::NotStart
    }
}

/// Collapse sorted candidate timestamps into event start timestamps
pub fn cluster_starts(sorted: &[Timestamp], merge_window: Duration) -> Vec<Timestamp> {
    let mut events = Vec::new();
    let mut previous: Option<Timestamp> = None;

    for &ts in sorted {
        match previous {
            Some(prev) if ts - prev <= merge_window => {}
            _ => events.push(ts),
        }
        previous = Some(ts);
    }

    events
}

/// Detects discrete incident events in one session's race control log
pub struct EventDetector<'a> {
    vocabulary: &'a IncidentVocabulary,
    merge_window: Duration,
}

impl<'a> EventDetector<'a> {
    pub fn new(vocabulary: &'a IncidentVocabulary, merge_window: Duration) -> Self {
        Self {
            vocabulary,
            merge_window,
        }
    }

    /// Detect event start timestamps for one session.
    ///
    /// Rows may arrive in any order. Every row must belong to `session_key`.
    pub fn detect(
        &self,
        session_key: SessionKey,
        rows: &[RaceControlRow],
    ) -> Result<Vec<Timestamp>> {
        if let Some(stray) = rows.iter().find(|r| r.session_key != session_key) {
            return Err(EngineError::CrossEntityLeakage {
                component: "detector",
                expected: session_key,
                found: stray.session_key,
            });
        }

        let mut candidates: Vec<Timestamp> = rows
            .iter()
            .filter(|row| self.vocabulary.classify(row).is_start())
            .map(|row| row.timestamp)
            .collect();

        if candidates.is_empty() {
            log::debug!("Session {}: no incident starts detected", session_key);
            return Ok(Vec::new());
        }

        candidates.sort();
        let events = cluster_starts(&candidates, self.merge_window);

        log::debug!(
            "Session {}: {} candidate rows collapsed into {} event(s)",
            session_key,
            candidates.len(),
            events.len()
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn base() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap()
    }

    fn row(minute: i64, category: &str, flag: &str, message: &str) -> RaceControlRow {
        RaceControlRow {
            session_key: 9158,
            timestamp: base() + Duration::minutes(minute),
            category: Some(category.to_string()).filter(|c| !c.is_empty()),
            flag: Some(flag.to_string()).filter(|f| !f.is_empty()),
            message: Some(message.to_string()),
        }
    }

    fn vocabulary() -> IncidentVocabulary {
        IncidentVocabulary::safety_car().unwrap()
    }

    #[test]
    fn test_structured_category_is_start() {
        let v = vocabulary();
        let r = row(0, "SafetyCar", "", "SAFETY CAR DEPLOYED");
        assert_eq!(v.classify(&r), Classification::StructuredStart);

        let r = row(0, "Vsc", "VSC", "VIRTUAL SAFETY CAR DEPLOYED");
        assert!(v.classify(&r).is_start());
    }

    #[test]
    fn test_end_pattern_wins_over_structured_codes() {
        let v = vocabulary();
        let r = row(0, "SafetyCar", "SC", "SAFETY CAR ENDING");
        assert_eq!(v.classify(&r), Classification::Excluded);

        let r = row(0, "SafetyCar", "SC", "safety car in this lap");
        assert_eq!(v.classify(&r), Classification::Excluded);
    }

    #[test]
    fn test_clear_message_excluded() {
        let v = vocabulary();
        let r = row(0, "", "", "TRACK CLEAR");
        assert!(!v.classify(&r).is_start());
    }

    #[test]
    fn test_text_fallback() {
        let v = vocabulary();
        let r = row(0, "Other", "", "Safety Car deployed");
        assert_eq!(v.classify(&r), Classification::TextStart);
    }

    #[test]
    fn test_unrelated_message_not_start() {
        let v = vocabulary();
        let r = row(0, "TrackLimits", "", "TRACK LIMITS REMINDER");
        assert_eq!(v.classify(&r), Classification::NotStart);
    }

    #[test]
    fn test_missing_fields_are_empty_strings() {
        let v = vocabulary();
        let r = RaceControlRow {
            session_key: 1,
            timestamp: base(),
            category: None,
            flag: None,
            message: None,
        };
        assert_eq!(v.classify(&r), Classification::NotStart);
    }

    #[test]
    fn test_neutral_code_does_not_start() {
        let v = vocabulary().with_category("Flag", CodeClass::Neutral);
        let r = row(0, "Flag", "YELLOW", "YELLOW IN TRACK SECTOR 4");
        assert_eq!(v.classify(&r), Classification::NotStart);
    }

    #[test]
    fn test_extra_patterns_extend_defaults() {
        let v = vocabulary()
            .with_extra_patterns(&[r"(?i)\bRED FLAG\b"], &[] as &[&str])
            .unwrap();
        assert!(v.classify(&row(0, "Flag", "RED", "RED FLAG")).is_start());
        assert!(v.classify(&row(0, "", "", "VSC DEPLOYED")).is_start());
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let result = IncidentVocabulary::new(&["(unclosed"], &["ok"]);
        assert!(matches!(result, Err(EngineError::InvalidPattern(_))));
    }

    #[test]
    fn test_three_rows_one_event() {
        let v = vocabulary();
        let detector = EventDetector::new(&v, Duration::seconds(300));
        let rows = vec![
            row(0, "SafetyCar", "SC", "SAFETY CAR DEPLOYED"),
            row(1, "SafetyCar", "SC", "SAFETY CAR PERIOD"),
            row(2, "SafetyCar", "SC", "SAFETY CAR PERIOD"),
        ];
        let events = detector.detect(9158, &rows).unwrap();
        assert_eq!(events, vec![base()]);
    }

    #[test]
    fn test_two_separate_events_and_unsorted_input() {
        let v = vocabulary();
        let detector = EventDetector::new(&v, Duration::seconds(300));
        let rows = vec![
            row(40, "Vsc", "VSC", "VIRTUAL SAFETY CAR DEPLOYED"),
            row(25, "TrackLimits", "", "TRACK LIMITS REMINDER"),
            row(10, "SafetyCar", "SC", "SAFETY CAR DEPLOYED"),
            row(41, "Vsc", "VSC", "VIRTUAL SAFETY CAR ENDING"),
            row(11, "SafetyCar", "SC", "SAFETY CAR PERIOD"),
        ];
        let events = detector.detect(9158, &rows).unwrap();
        assert_eq!(
            events,
            vec![base() + Duration::minutes(10), base() + Duration::minutes(40)]
        );
    }

    #[test]
    fn test_clustering_chains_on_successive_gaps() {
        let sorted: Vec<Timestamp> = [0, 4, 8, 12]
            .iter()
            .map(|m| base() + Duration::minutes(*m))
            .collect();
        assert_eq!(cluster_starts(&sorted, Duration::seconds(300)), vec![base()]);
    }

    #[test]
    fn test_gap_exactly_merge_window_joins() {
        let sorted = vec![base(), base() + Duration::seconds(300), base() + Duration::seconds(601)];
        let events = cluster_starts(&sorted, Duration::seconds(300));
        assert_eq!(events, vec![base(), base() + Duration::seconds(601)]);
    }

    #[test]
    fn test_foreign_session_row_is_leakage() {
        let v = vocabulary();
        let detector = EventDetector::new(&v, Duration::seconds(300));
        let mut stray = row(0, "SafetyCar", "SC", "SAFETY CAR DEPLOYED");
        stray.session_key = 1;
        let err = detector.detect(9158, &[stray]).unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_empty_log_no_events() {
        let v = vocabulary();
        let detector = EventDetector::new(&v, Duration::seconds(300));
        assert!(detector.detect(9158, &[]).unwrap().is_empty());
    }
}
