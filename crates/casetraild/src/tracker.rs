use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use casetrail_config::CasetrailConfig;
use casetrail_core::{
    AnnotationSummary, CaseId, CaseMap, ChangeAnnotation, EventCodeTable, RawCase,
    ReconcileFailure, Snapshot, compute_annotations, reconcile_batch,
};
use casetrail_fetch::{CaseSource, FetchError, load_case_source};
use casetrail_store::{HistoryStore, StoreError};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::render::{OutputFormat, write_cases};

/// One reconciled observation together with what changed since the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub prior: CaseMap,
    pub cases: CaseMap,
    pub annotations: BTreeMap<CaseId, ChangeAnnotation>,
    pub failures: Vec<ReconcileFailure>,
    pub summary: AnnotationSummary,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

pub struct Tracker {
    source: Arc<dyn CaseSource>,
    source_name: String,
    codes: EventCodeTable,
    fetch_timeout: Duration,
    concurrency: usize,
    runtime: Runtime,
}

impl Tracker {
    pub fn from_config(workspace_root: &Path, config: &CasetrailConfig) -> Result<Self> {
        let loaded =
            load_case_source(workspace_root, &config.fetch).context("failed to load case source")?;
        let codes = EventCodeTable::builtin().with_overrides(
            config
                .event_codes
                .iter()
                .map(|(code, description)| (code.clone(), description.clone())),
        );

        Self::new(
            Arc::from(loaded.source),
            loaded.source_name,
            codes,
            Duration::from_secs(config.fetch.timeout_secs),
            config.fetch.concurrency,
        )
    }

    pub fn new(
        source: Arc<dyn CaseSource>,
        source_name: impl Into<String>,
        codes: EventCodeTable,
        fetch_timeout: Duration,
        concurrency: usize,
    ) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(concurrency)
            .enable_all()
            .build()
            .context("failed to build fetch runtime")?;

        Ok(Self {
            source,
            source_name: source_name.into(),
            codes,
            fetch_timeout,
            concurrency,
            runtime,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Fetches, reconciles and diffs `case_ids` against the store's latest snapshot.
    /// Nothing is written; see [`Tracker::commit`].
    pub fn observe(&self, store: &dyn HistoryStore, case_ids: &[String]) -> Result<Observation> {
        let prior = match store.latest_cases() {
            Ok(prior) => prior,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read prior snapshot, comparing against nothing");
                CaseMap::new()
            }
        };

        let (raws, mut failures) = self.runtime.block_on(fetch_cases(
            self.source.clone(),
            case_ids.to_vec(),
            self.fetch_timeout,
            self.concurrency,
        ))?;

        let batch = reconcile_batch(&raws, &self.codes);
        failures.extend(batch.failures);
        failures.sort_by(|a, b| a.case_id.cmp(&b.case_id));

        let annotations = compute_annotations(&prior, &batch.cases);
        let summary = AnnotationSummary::from_annotations(&annotations);

        tracing::info!(
            source = %self.source_name,
            observed = batch.cases.len(),
            failed = failures.len(),
            new_cases = summary.new_cases,
            changed_cases = summary.changed_cases,
            new_events = summary.new_events,
            "observation complete"
        );

        Ok(Observation {
            prior,
            cases: batch.cases,
            annotations,
            failures,
            summary,
        })
    }

    /// Appends the observed cases as a new snapshot. An observation in which every case
    /// failed is not recorded.
    pub fn commit(
        store: &mut dyn HistoryStore,
        observation: &Observation,
    ) -> Result<Option<Snapshot>, StoreError> {
        if observation.is_empty() {
            tracing::warn!("no case could be observed, skipping snapshot");
            return Ok(None);
        }

        store.append(&observation.cases).map(Some)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub observation: Observation,
    pub recorded: Option<Snapshot>,
}

/// One tracking pass: observe, render, then record unless `dry_run`. The observation is
/// written to `out` before the append, so a storage failure still leaves the report behind.
pub fn run_check(
    tracker: &Tracker,
    store: &mut dyn HistoryStore,
    case_ids: &[String],
    dry_run: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<CheckOutcome> {
    tracing::debug!(
        cases = case_ids.len(),
        output = format.as_str(),
        dry_run,
        "starting check pass"
    );
    let observation = tracker.observe(store, case_ids)?;

    write_cases(
        &observation.cases,
        Some(&observation.annotations),
        &observation.failures,
        format,
        chrono::Utc::now(),
        out,
    )
    .context("failed to write check results")?;

    let recorded = if dry_run {
        tracing::info!("dry run, snapshot not recorded");
        None
    } else {
        Tracker::commit(store, &observation).context("failed to record snapshot")?
    };

    if let Some(snapshot) = &recorded {
        tracing::info!(
            saved_at = %snapshot.saved_at,
            cases = snapshot.cases.len(),
            "snapshot recorded"
        );
    }

    Ok(CheckOutcome {
        observation,
        recorded,
    })
}

async fn fetch_cases(
    source: Arc<dyn CaseSource>,
    case_ids: Vec<String>,
    fetch_timeout: Duration,
    concurrency: usize,
) -> Result<(Vec<RawCase>, Vec<ReconcileFailure>)> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for case_id in case_ids {
        let source = source.clone();
        let semaphore = semaphore.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return (
                        case_id.clone(),
                        Err(FetchError::Unavailable("fetch semaphore closed".to_owned())),
                    );
                }
            };

            let fetched = match timeout(fetch_timeout, source.fetch_case(&case_id)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    case_id: case_id.clone(),
                    secs: fetch_timeout.as_secs(),
                }),
            };
            (case_id, fetched)
        });
    }

    let mut raws = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        let (case_id, fetched) = joined.map_err(|err| anyhow!("fetch task join error: {err}"))?;
        match fetched {
            Ok(raw) => raws.push(raw),
            Err(err) => {
                tracing::warn!(case_id = %case_id, error = %err, "fetch failed");
                failures.push(ReconcileFailure {
                    case_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    raws.sort_by(|a, b| a.id.cmp(&b.id));
    Ok((raws, failures))
}
