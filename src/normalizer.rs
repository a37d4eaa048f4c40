//! Event log normalization
//!
//! Validates raw tabular records and converts them to canonical [`Event`]s. Field
//! names come from the configured [`ColumnMapping`]; repeated (user, event, timestamp)
//! tuples are handled according to the [`DuplicatePolicy`].

use crate::config::{ColumnMapping, DuplicatePolicy, PipelineConfig};
use crate::error::PathError;
use crate::types::{Event, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Naive timestamp layouts accepted besides RFC 3339. Interpreted as UTC.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// A record that could not be normalized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// Output of lenient normalization
#[derive(Debug, Clone)]
pub struct NormalizationReport {
    pub events: Vec<Event>,
    pub rejected: Vec<RejectedRecord>,
    /// Duplicates dropped under keep-first
    pub duplicates_dropped: usize,
}

/// Normalizer for raw event records
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    columns: ColumnMapping,
    duplicate_policy: DuplicatePolicy,
}

impl EventNormalizer {
    pub fn new(columns: ColumnMapping, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            columns,
            duplicate_policy,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.columns.clone(), config.duplicate_policy)
    }

    /// Parse a JSON array of records
    pub fn parse_array(json: &str) -> Result<Vec<RawRecord>, PathError> {
        let records: Vec<RawRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (one record per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawRecord>, PathError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record = serde_json::from_str::<RawRecord>(trimmed).map_err(|e| {
                PathError::Schema {
                    index: records.len(),
                    message: format!("Failed to parse line {}: {}", line_num + 1, e),
                }
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Convert one record; `index` becomes the event's arrival index
    pub fn normalize_record(&self, index: usize, record: &RawRecord) -> Result<Event, PathError> {
        let schema_error = |message: String| PathError::Schema { index, message };

        let user_id = extract_user_id(record.get(&self.columns.user_id))
            .map_err(|reason| schema_error(format!("{} ({})", reason, self.columns.user_id)))?;
        let event_name = extract_event_name(record.get(&self.columns.event_name))
            .map_err(|reason| schema_error(format!("{} ({})", reason, self.columns.event_name)))?;
        let timestamp = parse_timestamp(record.get(&self.columns.timestamp))
            .map_err(|reason| schema_error(format!("{} ({})", reason, self.columns.timestamp)))?;

        Ok(Event::new(user_id, event_name, timestamp, index as u64))
    }

    /// Normalize all records, aborting on the first bad one
    pub fn normalize(&self, records: &[RawRecord]) -> Result<Vec<Event>, PathError> {
        let mut events = Vec::with_capacity(records.len());
        let mut seen = HashSet::new();
        let mut duplicates_dropped = 0;

        for (index, record) in records.iter().enumerate() {
            let event = self.normalize_record(index, record)?;
            match self.admit(&mut seen, &event, index)? {
                true => events.push(event),
                false => duplicates_dropped += 1,
            }
        }

        if duplicates_dropped > 0 {
            warn!(duplicates_dropped, "dropped duplicate events");
        }
        debug!(records = records.len(), events = events.len(), "normalized event log");
        Ok(events)
    }

    /// Normalize all records, collecting bad ones instead of failing.
    ///
    /// Records rejected here never disturb the events normalized before them.
    pub fn normalize_lenient(&self, records: &[RawRecord]) -> NormalizationReport {
        let mut events = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();
        let mut duplicates_dropped = 0;

        for (index, record) in records.iter().enumerate() {
            let admitted = self
                .normalize_record(index, record)
                .and_then(|event| self.admit(&mut seen, &event, index).map(|keep| (event, keep)));
            match admitted {
                Ok((event, true)) => events.push(event),
                Ok((_, false)) => duplicates_dropped += 1,
                Err(e) => rejected.push(RejectedRecord {
                    index,
                    reason: e.to_string(),
                }),
            }
        }

        if !rejected.is_empty() {
            warn!(rejected = rejected.len(), "rejected malformed records");
        }
        if duplicates_dropped > 0 {
            warn!(duplicates_dropped, "dropped duplicate events");
        }

        NormalizationReport {
            events,
            rejected,
            duplicates_dropped,
        }
    }

    /// Report every invalid record without keeping any events
    pub fn validate_records(&self, records: &[RawRecord]) -> Vec<RejectedRecord> {
        self.normalize_lenient(records).rejected
    }

    /// Apply the duplicate policy; `Ok(false)` drops the event
    fn admit(
        &self,
        seen: &mut HashSet<(String, String, DateTime<Utc>)>,
        event: &Event,
        index: usize,
    ) -> Result<bool, PathError> {
        if self.duplicate_policy == DuplicatePolicy::KeepAll {
            return Ok(true);
        }
        let key = (
            event.user_id.clone(),
            event.event_name.clone(),
            event.timestamp,
        );
        if seen.insert(key) {
            return Ok(true);
        }
        match self.duplicate_policy {
            DuplicatePolicy::Error => Err(PathError::Schema {
                index,
                message: format!(
                    "duplicate event {} for user {} at {}",
                    event.event_name,
                    event.user_id,
                    event.timestamp.to_rfc3339()
                ),
            }),
            _ => Ok(false),
        }
    }
}

fn extract_user_id(value: Option<&Value>) -> Result<String, String> {
    match value {
        None | Some(Value::Null) => Err("missing user id".to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Err("empty user id".to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(format!("user id must be a string or number, got {}", other)),
    }
}

fn extract_event_name(value: Option<&Value>) -> Result<String, String> {
    match value {
        None | Some(Value::Null) => Err("missing event name".to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Err("empty event name".to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("event name must be a string, got {}", other)),
    }
}

/// Parse a timestamp from RFC 3339, naive date/time strings, or epoch seconds
pub fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, String> {
    match value {
        None | Some(Value::Null) => Err("missing timestamp".to_string()),
        Some(Value::String(s)) => parse_timestamp_str(s.trim()),
        Some(Value::Number(n)) => {
            let parsed = if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .and_then(|f| DateTime::from_timestamp_millis((f * 1000.0).round() as i64))
            };
            parsed.ok_or_else(|| format!("epoch timestamp out of range: {}", n))
        }
        Some(other) => Err(format!("unparsable timestamp {}", other)),
    }
}

fn parse_timestamp_str(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("unparsable timestamp \"{}\"", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    fn normalizer(policy: DuplicatePolicy) -> EventNormalizer {
        EventNormalizer::new(ColumnMapping::default(), policy)
    }

    #[test]
    fn test_normalize_basic_records() {
        let records = vec![
            record(json!({"user_id": 1, "event": "main", "timestamp": "2022-01-01 00:01:00"})),
            record(json!({"user_id": "2", "event": "catalog", "timestamp": "2022-01-01T00:02:00Z"})),
        ];

        let events = normalizer(DuplicatePolicy::KeepFirst)
            .normalize(&records)
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, "1");
        assert_eq!(events[0].event_name, "main");
        assert_eq!(
            events[0].timestamp,
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 1, 0).unwrap()
        );
        assert_eq!(events[1].event_index, 1);
    }

    #[test]
    fn test_custom_column_mapping() {
        let columns = ColumnMapping {
            user_id: "client".to_string(),
            event_name: "action".to_string(),
            timestamp: "ts".to_string(),
        };
        let normalizer = EventNormalizer::new(columns, DuplicatePolicy::KeepAll);
        let records = vec![record(json!({"client": "c1", "action": "open", "ts": 1700000000}))];

        let events = normalizer.normalize(&records).unwrap();
        assert_eq!(events[0].user_id, "c1");
        assert_eq!(events[0].timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_timestamp_is_schema_error() {
        let records = vec![
            record(json!({"user_id": "u1", "event": "A", "timestamp": "2022-01-01 00:00:00"})),
            record(json!({"user_id": "u1", "event": "B"})),
        ];

        let result = normalizer(DuplicatePolicy::KeepFirst).normalize(&records);
        match result {
            Err(PathError::Schema { index, message }) => {
                assert_eq!(index, 1);
                assert!(message.contains("missing timestamp"));
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_lenient_keeps_previous_records_intact() {
        let records = vec![
            record(json!({"user_id": "u1", "event": "A", "timestamp": "2022-01-01 00:00:00"})),
            record(json!({"user_id": "u1", "event": "B"})),
            record(json!({"user_id": "u1", "event": "C", "timestamp": "2022-01-01 00:02:00"})),
        ];

        let report = normalizer(DuplicatePolicy::KeepFirst).normalize_lenient(&records);

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].index, 1);
        let names: Vec<&str> = report.events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(report.events[1].event_index, 2);
    }

    #[test]
    fn test_unparsable_timestamp() {
        let records = vec![record(json!({"user_id": "u1", "event": "A", "timestamp": "yesterday"}))];
        let result = normalizer(DuplicatePolicy::KeepFirst).normalize(&records);
        assert!(matches!(result, Err(PathError::Schema { index: 0, .. })));
    }

    #[test]
    fn test_invalid_field_types() {
        let n = normalizer(DuplicatePolicy::KeepAll);
        let bad_event = record(json!({"user_id": "u1", "event": 5, "timestamp": 0}));
        let bad_user = record(json!({"user_id": ["u1"], "event": "A", "timestamp": 0}));
        let empty_user = record(json!({"user_id": "", "event": "A", "timestamp": 0}));

        assert!(n.normalize_record(0, &bad_event).is_err());
        assert!(n.normalize_record(0, &bad_user).is_err());
        assert!(n.normalize_record(0, &empty_user).is_err());
    }

    #[test]
    fn test_duplicate_policies() {
        let records = vec![
            record(json!({"user_id": "u1", "event": "A", "timestamp": "2022-01-01 00:03:00"})),
            record(json!({"user_id": "u1", "event": "A", "timestamp": "2022-01-01 00:03:00"})),
            record(json!({"user_id": "u1", "event": "B", "timestamp": "2022-01-01 00:04:00"})),
        ];

        let kept_first = normalizer(DuplicatePolicy::KeepFirst)
            .normalize(&records)
            .unwrap();
        assert_eq!(kept_first.len(), 2);
        assert_eq!(kept_first[1].event_index, 2);

        let kept_all = normalizer(DuplicatePolicy::KeepAll)
            .normalize(&records)
            .unwrap();
        assert_eq!(kept_all.len(), 3);

        let error = normalizer(DuplicatePolicy::Error).normalize(&records);
        assert!(matches!(error, Err(PathError::Schema { index: 1, .. })));
    }

    #[test]
    fn test_lenient_counts_dropped_duplicates() {
        let records = vec![
            record(json!({"user_id": "u1", "event": "A", "timestamp": 60})),
            record(json!({"user_id": "u1", "event": "A", "timestamp": 60})),
        ];
        let report = normalizer(DuplicatePolicy::KeepFirst).normalize_lenient(&records);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.duplicates_dropped, 1);
        assert!(report.rejected.is_empty());
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2022, 1, 2, 3, 4, 5).unwrap();
        let cases = [
            json!("2022-01-02T03:04:05Z"),
            json!("2022-01-02T05:04:05+02:00"),
            json!("2022-01-02 03:04:05"),
            json!("2022-01-02T03:04:05"),
            json!(expected.timestamp()),
            json!(expected.timestamp() as f64),
        ];
        for case in cases {
            assert_eq!(parse_timestamp(Some(&case)).unwrap(), expected, "case {}", case);
        }

        let fractional = parse_timestamp(Some(&json!("2022-01-02 03:04:05.250"))).unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 250);

        let date_only = parse_timestamp(Some(&json!("2022-01-02"))).unwrap();
        assert_eq!(date_only, Utc.with_ymd_and_hms(2022, 1, 2, 0, 0, 0).unwrap());

        assert!(parse_timestamp(Some(&Value::Null)).is_err());
        assert!(parse_timestamp(Some(&json!(true))).is_err());
    }

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"user_id": "u1", "event": "A", "timestamp": 0}

{"user_id": "u1", "event": "B", "timestamp": 10}"#;
        let records = EventNormalizer::parse_ndjson(ndjson).unwrap();
        assert_eq!(records.len(), 2);

        let broken = EventNormalizer::parse_ndjson("{\"user_id\": \"u1\"}\nnot json");
        match broken {
            Err(PathError::Schema { message, .. }) => assert!(message.contains("line 2")),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"user_id": "u1", "event": "A", "timestamp": 0}]"#;
        let records = EventNormalizer::parse_array(json).unwrap();
        assert_eq!(records.len(), 1);
        assert!(EventNormalizer::parse_array("{}").is_err());
    }

    #[test]
    fn test_validate_records() {
        let records = vec![
            record(json!({"user_id": "u1", "event": "A", "timestamp": 0})),
            record(json!({"event": "A", "timestamp": 0})),
            record(json!({"user_id": "u2", "timestamp": 0})),
        ];
        let rejected = normalizer(DuplicatePolicy::KeepFirst).validate_records(&records);
        let indices: Vec<usize> = rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }
}
