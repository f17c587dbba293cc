use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{CaseMap, CaseRecord, EventCodeTable, EventRecord, parse_timestamp};

/// One raw fetch result as handed over by a case source. `status` and `documents` are the
/// untyped payloads returned upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCase {
    pub id: String,
    pub status: Value,
    #[serde(default)]
    pub documents: Value,
    pub fetched_at: String,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("case id must not be empty")]
    MissingId,
    #[error("status payload for {0} is not a JSON object")]
    NotAnObject(String),
    #[error("status payload for {case_id} is malformed: {source}")]
    Malformed {
        case_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("event #{index} of {case_id} has no code")]
    EventMissingCode { case_id: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFailure {
    pub case_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconcileBatch {
    pub cases: CaseMap,
    pub failures: Vec<ReconcileFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default, alias = "form_type")]
    form_type: Option<String>,
    #[serde(default, alias = "form_name")]
    form_name: Option<String>,
    #[serde(default, alias = "isClosed")]
    closed: Option<bool>,
    #[serde(default, alias = "updated_at")]
    updated_at: Option<String>,
    #[serde(default, alias = "updated_at_timestamp")]
    updated_at_timestamp: Option<String>,
    #[serde(default)]
    events: Option<Vec<RawEvent>>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default, alias = "eventCode", alias = "event_code")]
    code: Option<String>,
    #[serde(default, alias = "eventTimestamp", alias = "event_timestamp", alias = "createdAt")]
    timestamp: Option<String>,
}

pub fn reconcile(raw: &RawCase, codes: &EventCodeTable) -> Result<CaseRecord, ReconcileError> {
    let case_id = raw.id.trim();
    if case_id.is_empty() {
        return Err(ReconcileError::MissingId);
    }

    let body = match &raw.status {
        Value::Object(map) => match map.get("data") {
            Some(data @ Value::Object(_)) => data,
            _ => &raw.status,
        },
        _ => return Err(ReconcileError::NotAnObject(case_id.to_owned())),
    };

    let status = RawStatus::deserialize(body).map_err(|source| ReconcileError::Malformed {
        case_id: case_id.to_owned(),
        source,
    })?;

    let events = normalize_events(case_id, status.events.unwrap_or_default(), codes)?;
    let current = events.first();

    Ok(CaseRecord {
        id: case_id.to_owned(),
        form_type: status.form_type,
        form_name: status.form_name,
        closed: status.closed.unwrap_or(false),
        updated_at: status.updated_at,
        updated_at_timestamp: status.updated_at_timestamp,
        current_action_code: current.map(|event| event.code.clone()),
        current_action_desc: current.map(|event| event.description.clone()),
        documents: raw.documents.clone(),
        fetched_at: raw.fetched_at.clone(),
        events,
    })
}

pub fn reconcile_batch<'a>(
    raws: impl IntoIterator<Item = &'a RawCase>,
    codes: &EventCodeTable,
) -> ReconcileBatch {
    let mut batch = ReconcileBatch::default();

    for raw in raws {
        match reconcile(raw, codes) {
            Ok(record) => {
                if batch.cases.contains_key(&record.id) {
                    tracing::warn!(case_id = %record.id, "duplicate case in batch, keeping latest");
                }
                batch.cases.insert(record.id.clone(), record);
            }
            Err(err) => {
                tracing::warn!(case_id = %raw.id, error = %err, "failed to reconcile case");
                batch.failures.push(ReconcileFailure {
                    case_id: raw.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    batch
}

fn normalize_events(
    case_id: &str,
    raw_events: Vec<RawEvent>,
    codes: &EventCodeTable,
) -> Result<Vec<EventRecord>, ReconcileError> {
    let mut seen = HashSet::new();
    let mut events = Vec::with_capacity(raw_events.len());

    for (index, raw) in raw_events.into_iter().enumerate() {
        let code = raw
            .code
            .map(|code| code.trim().to_owned())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ReconcileError::EventMissingCode {
                case_id: case_id.to_owned(),
                index,
            })?;
        let timestamp = raw.timestamp.unwrap_or_default();

        if !seen.insert((code.clone(), timestamp.clone())) {
            continue;
        }

        events.push(EventRecord {
            description: codes.describe(&code).to_owned(),
            code,
            timestamp,
        });
    }

    // Stable: events with equal keys keep their input order.
    events.sort_by_cached_key(|event| Reverse(event_sort_key(&event.timestamp)));
    Ok(events)
}

/// Parsed timestamps sort by their canonical UTC rendering, which orders lexicographically by
/// instant. Anything else sorts by its literal text against that same rendering.
fn event_sort_key(timestamp: &str) -> String {
    match parse_timestamp(timestamp) {
        Some(instant) => instant.to_rfc3339_opts(SecondsFormat::Nanos, true),
        None => timestamp.trim().to_owned(),
    }
}
