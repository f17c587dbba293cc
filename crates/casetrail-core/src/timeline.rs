use serde::{Deserialize, Serialize};

use crate::{CaseMap, CaseRecord, ChangeAnnotation, Snapshot, compute_annotations};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub snapshot_index: usize,
    pub saved_at: String,
    pub record: CaseRecord,
    pub annotation: ChangeAnnotation,
}

/// Replays `history` for one case. Each snapshot that contains the case is annotated against
/// the snapshot directly before it, so a case that vanished and came back is reported as new.
pub fn case_timeline(history: &[Snapshot], case_id: &str) -> Vec<TimelineEntry> {
    let empty = CaseMap::new();
    let mut entries = Vec::new();

    for (index, snapshot) in history.iter().enumerate() {
        let Some(record) = snapshot.cases.get(case_id) else {
            continue;
        };

        let previous = index
            .checked_sub(1)
            .and_then(|prev| history.get(prev))
            .map(|prev| &prev.cases)
            .unwrap_or(&empty);

        let current = CaseMap::from([(record.id.clone(), record.clone())]);
        let annotation = compute_annotations(previous, &current)
            .remove(case_id)
            .unwrap_or_default();

        entries.push(TimelineEntry {
            snapshot_index: index,
            saved_at: snapshot.saved_at.clone(),
            record: record.clone(),
            annotation,
        });
    }

    entries
}
