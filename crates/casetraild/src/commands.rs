use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use casetrail_config::{
    CasetrailConfig, add_tracked_case, load_workspace_config, normalize_case_id,
    remove_tracked_case,
};
use casetrail_core::case_timeline;
use casetrail_store::{HistoryStore, SqliteHistoryStore};

use crate::cli::{
    CheckArgs, ClearArgs, ImportArgs, OutputArgs, TimelineArgs, TrackAction, WatchArgs,
};
use crate::render::{write_cases, write_history, write_timeline};
use crate::tracker::{CheckOutcome, Tracker, run_check};

fn open_store(workspace: &Path) -> Result<SqliteHistoryStore> {
    SqliteHistoryStore::open(workspace).context("failed to open case history store")
}

fn resolve_case_ids(requested: &[String], config: &CasetrailConfig) -> Result<Vec<String>> {
    let ids = if requested.is_empty() {
        config.tracking.cases.clone()
    } else {
        let mut seen = HashSet::new();
        requested
            .iter()
            .filter_map(|id| normalize_case_id(id))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    };

    if ids.is_empty() {
        bail!("no cases to check; track one with `casetraild track add <ID>` or pass --cases");
    }
    Ok(ids)
}

pub fn run_check_command(
    workspace: &Path,
    config: &CasetrailConfig,
    args: &CheckArgs,
    out: &mut dyn Write,
) -> Result<CheckOutcome> {
    let case_ids = resolve_case_ids(&args.cases, config)?;
    let tracker = Tracker::from_config(workspace, config)?;
    let mut store = open_store(workspace)?;

    run_check(
        &tracker,
        &mut store,
        &case_ids,
        args.dry_run,
        args.output.output,
        out,
    )
}

/// Repeats checks every `interval_secs`. The tracked list is re-read before each pass so
/// `track add`/`track remove` apply without a restart; a failed pass is logged and retried.
pub fn run_watch_command(
    workspace: &Path,
    config: &CasetrailConfig,
    args: &WatchArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let tracker = Tracker::from_config(workspace, config)?;
    let mut store = open_store(workspace)?;
    let interval = Duration::from_secs(args.interval_secs.max(1));
    let mut config = config.clone();
    let mut runs = 0_u64;

    tracing::info!(
        source = tracker.source_name(),
        interval_secs = interval.as_secs(),
        "watching tracked cases"
    );

    loop {
        match load_workspace_config(workspace) {
            Ok(reloaded) => config = reloaded,
            Err(err) => {
                tracing::warn!(error = %err, "failed to reload config, keeping previous tracked list")
            }
        }

        let pass = match resolve_case_ids(&[], &config) {
            Ok(case_ids) => run_check(
                &tracker,
                &mut store,
                &case_ids,
                false,
                args.output.output,
                &mut *out,
            ),
            Err(err) => Err(err),
        };
        if let Err(err) = pass {
            tracing::error!(error = %format!("{err:#}"), "check pass failed");
        }
        out.flush().context("failed to flush output")?;

        runs += 1;
        if args.max_runs.is_some_and(|max| runs >= max) {
            return Ok(());
        }
        std::thread::sleep(interval);
    }
}

pub fn run_latest_command(workspace: &Path, args: &OutputArgs, out: &mut dyn Write) -> Result<()> {
    let store = open_store(workspace)?;
    let cases = store
        .latest_cases()
        .context("failed to read latest snapshot")?;

    match store.last_fetch() {
        Ok(Some(last_fetch)) => tracing::info!(last_fetch = %last_fetch, "latest snapshot"),
        Ok(None) => tracing::info!("no snapshot recorded yet"),
        Err(err) => tracing::warn!(error = %err, "failed to read last fetch time"),
    }

    write_cases(&cases, None, &[], args.output, chrono::Utc::now(), out)
        .context("failed to write latest cases")
}

pub fn run_history_command(workspace: &Path, out: &mut dyn Write) -> Result<()> {
    let store = open_store(workspace)?;
    let history = store.history().context("failed to read history")?;
    write_history(&history, out).context("failed to write history")
}

pub fn run_timeline_command(
    workspace: &Path,
    args: &TimelineArgs,
    out: &mut dyn Write,
) -> Result<()> {
    let Some(case_id) = normalize_case_id(&args.case_id) else {
        bail!("case id must not be empty");
    };

    let store = open_store(workspace)?;
    let history = store.history().context("failed to read history")?;
    let entries = case_timeline(&history, &case_id);
    if entries.is_empty() {
        tracing::warn!(case_id = %case_id, "case does not appear in any recorded snapshot");
    }

    write_timeline(&entries, args.output.output, out).context("failed to write timeline")
}

pub fn run_clear_command(workspace: &Path, args: &ClearArgs, out: &mut dyn Write) -> Result<()> {
    if !args.yes {
        bail!("refusing to clear case history without --yes");
    }

    let mut store = open_store(workspace)?;
    let removed = store
        .history_len()
        .context("failed to read case history before clearing")?;
    store.clear().context("failed to clear case history")?;
    writeln!(out, "cleared {removed} snapshot(s)")?;
    Ok(())
}

pub fn run_track_command(
    workspace: &Path,
    config: &CasetrailConfig,
    action: &TrackAction,
    out: &mut dyn Write,
) -> Result<()> {
    match action {
        TrackAction::Add { case_id } => {
            let added = add_tracked_case(workspace, case_id)
                .with_context(|| format!("failed to track {case_id}"))?;
            let state = if added { "tracking" } else { "already tracking" };
            writeln!(out, "{state} {}", case_id.trim().to_ascii_uppercase())?;
        }
        TrackAction::Remove { case_id } => {
            let removed = remove_tracked_case(workspace, case_id)
                .with_context(|| format!("failed to untrack {case_id}"))?;
            let state = if removed { "stopped tracking" } else { "was not tracking" };
            writeln!(out, "{state} {}", case_id.trim().to_ascii_uppercase())?;
        }
        TrackAction::List => {
            for case_id in &config.tracking.cases {
                writeln!(out, "{case_id}")?;
            }
        }
    }
    Ok(())
}

pub fn run_import_command(workspace: &Path, args: &ImportArgs, out: &mut dyn Write) -> Result<()> {
    let raw = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let export: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", args.path.display()))?;

    let mut store = open_store(workspace)?;
    let imported = store
        .import_storage_export(&export)
        .context("failed to import storage export")?;
    let noun = if imported == 1 { "entry" } else { "entries" };
    writeln!(out, "imported {imported} storage {noun}")?;
    Ok(())
}
