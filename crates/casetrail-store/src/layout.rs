use casetrail_core::{CaseMap, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key of the single-snapshot entry. Older trackers only wrote this one; it is still kept
/// current as the "latest" pointer.
pub const LATEST_KEY: &str = "caseTrackerData";
/// Key of the append-only list of snapshots.
pub const HISTORY_KEY: &str = "caseTrackerHistory";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestRecord {
    #[serde(default)]
    pub cases: CaseMap,
    #[serde(default)]
    pub last_fetch: Option<String>,
}

/// The stored history list, decoded entry by entry. `entries` keeps every stored entry verbatim,
/// including those that do not decode, so that writing the list back never loses one.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoredHistory {
    pub(crate) entries: Vec<Value>,
    pub(crate) snapshots: Vec<Snapshot>,
    /// The stored value exists but is not a JSON list at all.
    pub(crate) unreadable: bool,
}

pub(crate) fn decode_history(raw: Option<&str>) -> StoredHistory {
    let Some(raw) = raw else {
        return StoredHistory::default();
    };

    let entries = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                key = HISTORY_KEY,
                error = %err,
                "stored history is unreadable, treating it as empty"
            );
            return StoredHistory {
                unreadable: true,
                ..StoredHistory::default()
            };
        }
    };

    let snapshots = entries
        .iter()
        .enumerate()
        .filter_map(
            |(index, entry)| match serde_json::from_value::<Snapshot>(entry.clone()) {
                Ok(mut snapshot) => {
                    adopt_map_keys(&mut snapshot.cases);
                    Some(snapshot)
                }
                Err(err) => {
                    tracing::warn!(
                        key = HISTORY_KEY,
                        index,
                        error = %err,
                        "skipping unreadable history entry"
                    );
                    None
                }
            },
        )
        .collect();

    StoredHistory {
        entries,
        snapshots,
        unreadable: false,
    }
}

pub(crate) fn decode_latest(raw: Option<&str>) -> Option<LatestRecord> {
    let raw = raw?;

    match serde_json::from_str::<LatestRecord>(raw) {
        Ok(mut record) => {
            adopt_map_keys(&mut record.cases);
            Some(record)
        }
        Err(err) => {
            tracing::warn!(
                key = LATEST_KEY,
                error = %err,
                "stored latest snapshot is unreadable, ignoring it"
            );
            None
        }
    }
}

/// Records written without an `id` take the key they are stored under.
fn adopt_map_keys(cases: &mut CaseMap) {
    for (key, record) in cases.iter_mut() {
        if record.id.trim().is_empty() {
            record.id = key.clone();
        }
    }
}

/// Resolves the cases to compare against: the newest history entry, or the legacy single
/// snapshot when no history was written yet.
pub(crate) fn resolve_latest(history: &[Snapshot], legacy: Option<LatestRecord>) -> CaseMap {
    if let Some(last) = history.last() {
        return last.cases.clone();
    }

    match legacy {
        Some(record) => {
            tracing::debug!(
                cases = record.cases.len(),
                "history is empty, reading legacy snapshot"
            );
            record.cases
        }
        None => CaseMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_history_decodes_as_empty() {
        let garbage = decode_history(Some("{not json"));
        assert!(garbage.snapshots.is_empty());
        assert!(garbage.unreadable);

        assert!(decode_history(Some("{\"cases\":{}}")).unreadable);
        assert!(!decode_history(None).unreadable);
    }

    #[test]
    fn one_bad_entry_does_not_hide_the_others() {
        let stored = decode_history(Some(
            r#"[
                {"cases":{"A":{"id":"A"}},"savedAt":"2024-01-01T00:00:00.000Z"},
                {"cases":12,"savedAt":"2024-01-02T00:00:00.000Z"},
                {"cases":{"B":{"id":"B"}},"savedAt":"2024-01-03T00:00:00.000Z"}
            ]"#,
        ));

        assert!(!stored.unreadable);
        assert_eq!(stored.entries.len(), 3);
        assert_eq!(stored.snapshots.len(), 2);
        assert!(stored.snapshots[1].cases.contains_key("B"));
    }

    #[test]
    fn legacy_record_without_last_fetch_decodes() {
        let record = decode_latest(Some(r#"{"cases":{"A":{"id":"A"}}}"#)).expect("legacy record");
        assert_eq!(record.cases.len(), 1);
        assert_eq!(record.last_fetch, None);
    }

    #[test]
    fn loosely_shaped_legacy_records_still_decode() {
        let record = decode_latest(Some(
            r#"{"cases":{"A":{
                "closed":null,
                "events":[{"code":"IAF","timestamp":"2024-01-01T00:00:00Z"}]
            }}}"#,
        ))
        .expect("legacy record");

        let case = &record.cases["A"];
        assert_eq!(case.id, "A");
        assert!(!case.closed);
        assert_eq!(case.events[0].description, "");
    }

    #[test]
    fn history_wins_over_legacy() {
        let history: Vec<Snapshot> = serde_json::from_str(
            r#"[{"cases":{"H":{"id":"H"}},"savedAt":"2024-01-01T00:00:00.000Z"}]"#,
        )
        .expect("history fixture");
        let legacy = decode_latest(Some(r#"{"cases":{"L":{"id":"L"}}}"#));

        let latest = resolve_latest(&history, legacy.clone());
        assert!(latest.contains_key("H"));

        let migrated = resolve_latest(&[], legacy);
        assert!(migrated.contains_key("L"));
    }
}
