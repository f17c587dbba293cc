use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::{CaseId, CaseMap, CaseRecord};

/// What changed for one case between the prior and the new observation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAnnotation {
    pub is_new: bool,
    pub field_changed: bool,
    pub new_event_positions: BTreeSet<usize>,
}

impl ChangeAnnotation {
    pub fn is_unchanged(&self) -> bool {
        !self.is_new && !self.field_changed && self.new_event_positions.is_empty()
    }

    pub fn is_new_event(&self, position: usize) -> bool {
        self.new_event_positions.contains(&position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSummary {
    pub total: usize,
    pub new_cases: usize,
    pub changed_cases: usize,
    pub cases_with_new_events: usize,
    pub new_events: usize,
}

impl AnnotationSummary {
    pub fn from_annotations(annotations: &BTreeMap<CaseId, ChangeAnnotation>) -> Self {
        annotations
            .values()
            .fold(Self::default(), |mut summary, annotation| {
                summary.total += 1;
                if annotation.is_new {
                    summary.new_cases += 1;
                } else if annotation.field_changed {
                    summary.changed_cases += 1;
                }
                if !annotation.new_event_positions.is_empty() {
                    summary.cases_with_new_events += 1;
                    summary.new_events += annotation.new_event_positions.len();
                }
                summary
            })
    }

    pub fn has_changes(&self) -> bool {
        self.new_cases > 0 || self.changed_cases > 0 || self.new_events > 0
    }
}

/// Annotates every case of `current` against `previous`. Cases that only exist in `previous`
/// are not reported.
pub fn compute_annotations(
    previous: &CaseMap,
    current: &CaseMap,
) -> BTreeMap<CaseId, ChangeAnnotation> {
    current
        .iter()
        .map(|(id, record)| {
            let annotation = match previous.get(id) {
                Some(prior) => annotate_existing(prior, record),
                None => annotate_first_seen(record),
            };
            (id.clone(), annotation)
        })
        .collect()
}

fn annotate_first_seen(record: &CaseRecord) -> ChangeAnnotation {
    ChangeAnnotation {
        is_new: true,
        field_changed: true,
        new_event_positions: (0..record.events.len()).collect(),
    }
}

fn annotate_existing(prior: &CaseRecord, record: &CaseRecord) -> ChangeAnnotation {
    // Literal comparison: two spellings of the same instant count as a change.
    let field_changed = prior.updated_at != record.updated_at
        || prior.updated_at_timestamp != record.updated_at_timestamp;

    let known: HashSet<_> = prior.events.iter().map(|event| event.key()).collect();
    let new_event_positions = record
        .events
        .iter()
        .enumerate()
        .filter(|(_, event)| !known.contains(&event.key()))
        .map(|(position, _)| position)
        .collect();

    ChangeAnnotation {
        is_new: false,
        field_changed,
        new_event_positions,
    }
}

/// blake3 hex digest of the canonical JSON form of `cases`.
pub fn snapshot_digest(cases: &CaseMap) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(cases)?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}
