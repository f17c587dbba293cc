use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

mod codes;
mod diff;
mod reconcile;
mod timeline;

pub use codes::{EventCodeTable, UNKNOWN_EVENT_DESCRIPTION};
pub use diff::{AnnotationSummary, ChangeAnnotation, compute_annotations, snapshot_digest};
pub use reconcile::{
    RawCase, ReconcileBatch, ReconcileError, ReconcileFailure, reconcile, reconcile_batch,
};
pub use timeline::{TimelineEntry, case_timeline};

pub type CaseId = String;

/// Normalized cases keyed by id. Ordered so that serialization and rendering are stable.
pub type CaseMap = BTreeMap<CaseId, CaseRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
}

impl EventRecord {
    pub fn key(&self) -> EventKey<'_> {
        EventKey {
            code: &self.code,
            timestamp: &self.timestamp,
        }
    }
}

/// Identity of an event across observations. Events carry no external id, so two events are
/// the same event iff both the code and the timestamp match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey<'a> {
    pub code: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    /// Empty when a stored record omitted it; the store fills it from the map key.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: CaseId,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub form_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub closed: bool,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_at_timestamp: Option<String>,
    #[serde(default)]
    pub current_action_code: Option<String>,
    #[serde(default)]
    pub current_action_desc: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub documents: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fetched_at: String,
}

impl CaseRecord {
    pub fn current_event(&self) -> Option<&EventRecord> {
        self.events.first()
    }

    /// Age of the observation relative to `now`, when `fetched_at` is a valid RFC 3339 time.
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let fetched = parse_rfc3339(&self.fetched_at)?;
        Some(now.signed_duration_since(fetched))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub cases: CaseMap,
    pub saved_at: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn format_rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

const NAIVE_DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses an upstream event timestamp. Besides RFC 3339 this accepts date-times without an
/// offset and bare dates, both read as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Some(instant) = parse_rfc3339(value) {
        return Some(instant);
    }

    NAIVE_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn case_record_serializes_with_camel_case_fields() {
        let record = CaseRecord {
            id: "IOE0900000001".to_owned(),
            form_type: Some("I-485".to_owned()),
            form_name: None,
            closed: false,
            updated_at: Some("2024-03-01".to_owned()),
            updated_at_timestamp: Some("2024-03-01T10:00:00Z".to_owned()),
            current_action_code: None,
            current_action_desc: None,
            events: Vec::new(),
            documents: Value::Null,
            fetched_at: "2024-03-02T00:00:00.000Z".to_owned(),
        };

        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json["formType"], "I-485");
        assert_eq!(json["updatedAtTimestamp"], "2024-03-01T10:00:00Z");
        assert!(json.get("fetchedAt").is_some());
    }

    #[test]
    fn staleness_is_measured_from_fetched_at() {
        let record: CaseRecord = serde_json::from_value(serde_json::json!({
            "id": "A",
            "fetchedAt": "2024-03-02T00:00:00.000Z"
        }))
        .expect("deserialize minimal record");

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap();
        assert_eq!(record.staleness(now), Some(chrono::Duration::hours(6)));
    }

    #[test]
    fn timestamps_without_offsets_read_as_utc() {
        let midnight = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).single().expect("valid");
        assert_eq!(parse_timestamp("2024-05-01T00:00:00Z"), Some(midnight));
        assert_eq!(parse_timestamp("2024-05-01T00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("2024-05-01 00:00:00.000"), Some(midnight));
        assert_eq!(parse_timestamp(" 2024-05-01 "), Some(midnight));
        assert_eq!(parse_timestamp("May 1st"), None);
    }

    #[test]
    fn stored_records_tolerate_nulls_and_missing_fields() {
        let record: CaseRecord = serde_json::from_value(serde_json::json!({
            "closed": null,
            "events": [{ "code": "IAF", "timestamp": "2024-01-01T00:00:00Z", "description": null }],
            "fetchedAt": null
        }))
        .expect("deserialize loose record");

        assert!(record.id.is_empty());
        assert!(!record.closed);
        assert_eq!(record.events[0].description, "");
        assert_eq!(record.fetched_at, "");

        let no_events: CaseRecord =
            serde_json::from_value(serde_json::json!({ "id": "A", "events": null }))
                .expect("null events");
        assert!(no_events.events.is_empty());
    }

    #[test]
    fn staleness_is_none_for_unparsable_fetched_at() {
        let record: CaseRecord =
            serde_json::from_value(serde_json::json!({ "id": "A", "fetchedAt": "yesterday" }))
                .expect("deserialize minimal record");
        assert_eq!(record.staleness(Utc::now()), None);
    }
}
