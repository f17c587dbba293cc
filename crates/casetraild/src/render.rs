use std::collections::BTreeMap;
use std::io::Write;

use casetrail_core::{
    CaseId, CaseMap, CaseRecord, ChangeAnnotation, ReconcileFailure, Snapshot, TimelineEntry,
    snapshot_digest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaseLine<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_new: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    field_changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_event_positions: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age_secs: Option<i64>,
    record: &'a CaseRecord,
}

#[derive(Serialize)]
struct FailureLine<'a> {
    id: &'a str,
    error: &'a str,
}

/// Writes cases in id order. With `annotations`, each case carries its change state and new
/// events are marked with `*`.
pub fn write_cases(
    cases: &CaseMap,
    annotations: Option<&BTreeMap<CaseId, ChangeAnnotation>>,
    failures: &[ReconcileFailure],
    format: OutputFormat,
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Table => write_cases_table(cases, annotations, failures, now, out),
        OutputFormat::Json => write_cases_json(cases, annotations, failures, now, out),
    }
}

fn write_cases_table(
    cases: &CaseMap,
    annotations: Option<&BTreeMap<CaseId, ChangeAnnotation>>,
    failures: &[ReconcileFailure],
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(out, "case_id\tstate\tform\tcurrent_action\tupdated\tage")?;

    for (id, record) in cases {
        let annotation = annotations.and_then(|annotations| annotations.get(id));
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            normalize_field(id),
            annotation.map(change_state).unwrap_or("-"),
            normalize_field(record.form_type.as_deref().unwrap_or("-")),
            normalize_field(current_action(record)),
            normalize_field(updated_marker(record)),
            record
                .staleness(now)
                .map(format_age)
                .unwrap_or_else(|| "?".to_owned())
        )?;

        for (position, event) in record.events.iter().enumerate() {
            let marker = if annotation.is_some_and(|annotation| annotation.is_new_event(position)) {
                '*'
            } else {
                ' '
            };
            writeln!(
                out,
                "  {marker} {}\t{}\t{}",
                normalize_field(&event.timestamp),
                normalize_field(&event.code),
                normalize_field(&event.description)
            )?;
        }
    }

    for failure in failures {
        writeln!(
            out,
            "FAILED\t{}\t{}",
            normalize_field(&failure.case_id),
            normalize_field(&failure.reason)
        )?;
    }

    Ok(())
}

fn write_cases_json(
    cases: &CaseMap,
    annotations: Option<&BTreeMap<CaseId, ChangeAnnotation>>,
    failures: &[ReconcileFailure],
    now: DateTime<Utc>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    for (id, record) in cases {
        let annotation = annotations.and_then(|annotations| annotations.get(id));
        let line = CaseLine {
            id,
            is_new: annotation.map(|annotation| annotation.is_new),
            field_changed: annotation.map(|annotation| annotation.field_changed),
            new_event_positions: annotation
                .map(|annotation| annotation.new_event_positions.iter().copied().collect()),
            age_secs: record.staleness(now).map(|age| age.num_seconds().max(0)),
            record,
        };
        write_json_line(&line, out)?;
    }

    for failure in failures {
        write_json_line(
            &FailureLine {
                id: &failure.case_id,
                error: &failure.reason,
            },
            out,
        )?;
    }

    Ok(())
}

pub fn write_history(history: &[Snapshot], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "index\tsaved_at\tcases\tdigest")?;

    for (index, snapshot) in history.iter().enumerate() {
        let digest = snapshot_digest(&snapshot.cases).map_err(std::io::Error::other)?;
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            index,
            normalize_field(&snapshot.saved_at),
            snapshot.cases.len(),
            digest
        )?;
    }

    Ok(())
}

pub fn write_timeline(
    entries: &[TimelineEntry],
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    if format == OutputFormat::Json {
        for entry in entries {
            write_json_line(entry, out)?;
        }
        return Ok(());
    }

    writeln!(
        out,
        "index\tsaved_at\tstate\tcurrent_action\tupdated\tnew_events"
    )?;
    for entry in entries {
        let new_events = entry
            .annotation
            .new_event_positions
            .iter()
            .filter_map(|position| entry.record.events.get(*position))
            .map(|event| event.code.as_str())
            .collect::<Vec<_>>();

        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            entry.snapshot_index,
            normalize_field(&entry.saved_at),
            change_state(&entry.annotation),
            normalize_field(current_action(&entry.record)),
            normalize_field(updated_marker(&entry.record)),
            if new_events.is_empty() {
                "-".to_owned()
            } else {
                new_events.join(",")
            }
        )?;
    }

    Ok(())
}

pub fn change_state(annotation: &ChangeAnnotation) -> &'static str {
    if annotation.is_new {
        "NEW"
    } else if annotation.field_changed {
        "CHANGED"
    } else if !annotation.new_event_positions.is_empty() {
        "NEW_EVENTS"
    } else {
        "UNCHANGED"
    }
}

pub fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}

/// Records migrated from older storage may carry events without a stored current action.
fn current_action(record: &CaseRecord) -> &str {
    record
        .current_action_desc
        .as_deref()
        .or_else(|| record.current_event().map(|event| event.description.as_str()))
        .filter(|desc| !desc.is_empty())
        .unwrap_or("-")
}

fn updated_marker(record: &CaseRecord) -> &str {
    record
        .updated_at_timestamp
        .as_deref()
        .or(record.updated_at.as_deref())
        .unwrap_or("-")
}

fn write_json_line<T: Serialize>(value: &T, out: &mut dyn Write) -> std::io::Result<()> {
    let line = serde_json::to_string(value).map_err(std::io::Error::other)?;
    writeln!(out, "{line}")
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
