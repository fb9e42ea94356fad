//! UTC timestamp helpers
//!
//! All timestamps in the engine are UTC. Naive inputs are assumed to already
//! be UTC.

use crate::types::{EngineError, Result, SessionKey, Timestamp};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Parse an ISO 8601 timestamp string into a UTC timestamp.
///
/// Accepts RFC 3339 strings with any offset (`2024-03-02T15:00:00.000+00:00`)
/// as well as naive strings (`2024-03-02T15:00:00`, `2024-03-02 15:00:00.5`),
/// which are taken as UTC. Returns `None` for empty or unparseable input.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a timestamp that must be present, reporting the offending value
pub fn require_timestamp(component: &'static str, raw: &str) -> Result<Timestamp> {
    parse_timestamp(raw).ok_or_else(|| EngineError::InvalidTimestamp {
        component,
        value: raw.to_string(),
    })
}

/// Floor a timestamp to the start of its grid interval
pub fn floor_to_grid(ts: Timestamp, interval: Duration) -> Timestamp {
    let step = interval.num_milliseconds();
    if step <= 0 {
        return ts;
    }
    let millis = ts.timestamp_millis();
    let floored = millis - millis.rem_euclid(step);
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Length of a duration in (fractional) seconds
pub fn seconds_f64(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Check that a sequence of timestamps never goes backwards
pub(crate) fn ensure_sorted<I>(
    component: &'static str,
    session_key: Option<SessionKey>,
    timestamps: I,
) -> Result<()>
where
    I: IntoIterator<Item = Timestamp>,
{
    let mut previous: Option<Timestamp> = None;
    for (index, ts) in timestamps.into_iter().enumerate() {
        if let Some(prev) = previous {
            if ts < prev {
                return Err(EngineError::Unsorted {
                    component,
                    session_key,
                    index,
                    value: ts,
                });
            }
        }
        previous = Some(ts);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ts = parse_timestamp("2024-03-02T17:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_fractional_and_naive() {
        let ts = parse_timestamp("2024-03-02T15:00:00.250000+00:00").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);

        let naive = parse_timestamp("2024-03-02T15:00:00").unwrap();
        assert_eq!(naive, Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap());

        let spaced = parse_timestamp("2024-03-02 15:00:00.5").unwrap();
        assert_eq!(spaced.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("   "), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert!(require_timestamp("input", "nope").is_err());
    }

    #[test]
    fn test_floor_to_grid() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 47).unwrap();
        let floored = floor_to_grid(ts, Duration::seconds(30));
        assert_eq!(floored, Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 30).unwrap());
    }

    #[test]
    fn test_ensure_sorted_reports_index() {
        let base = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap();
        let ts = vec![base, base + Duration::seconds(5), base];
        let err = ensure_sorted("test", Some(7), ts).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Unsorted { index: 2, session_key: Some(7), .. }
        ));

        let ties = vec![base, base, base + Duration::seconds(1)];
        assert!(ensure_sorted("test", None, ties).is_ok());
    }
}
