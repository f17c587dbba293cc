use std::error::Error;
use std::fs;
use std::path::Path;

use casetrail_config::{
    CasetrailConfig, FetchSourceKind, add_tracked_case, ensure_workspace_config,
    load_workspace_config,
};
use casetrail_store::{HistoryStore, SqliteHistoryStore};
use casetraild::cli::{CheckArgs, OutputArgs, TimelineArgs};
use casetraild::commands::{run_check_command, run_history_command, run_timeline_command};
use casetraild::render::OutputFormat;
use serde_json::{Value, json};
use tempfile::tempdir;

fn write_fixture(workspace: &Path, case_id: &str, status: Value) -> Result<(), Box<dyn Error>> {
    let dir = workspace.join("fixtures");
    fs::create_dir_all(&dir)?;
    let body = json!({ "status": status, "documents": { "notices": [] } });
    fs::write(dir.join(format!("{case_id}.json")), serde_json::to_vec(&body)?)?;
    Ok(())
}

fn fixture_workspace(workspace: &Path) -> Result<CasetrailConfig, Box<dyn Error>> {
    ensure_workspace_config(workspace)?;
    let config_path = workspace.join(".casetrail/config.toml");
    let raw = fs::read_to_string(&config_path)?;
    fs::write(
        &config_path,
        raw.replace("source = \"http\"", "source = \"fixture\""),
    )?;
    add_tracked_case(workspace, "ioe1")?;
    add_tracked_case(workspace, "ioe2")?;
    Ok(load_workspace_config(workspace)?)
}

fn check_args(output: OutputFormat) -> CheckArgs {
    CheckArgs {
        dry_run: false,
        cases: Vec::new(),
        output: OutputArgs { output },
    }
}

#[test]
fn second_check_highlights_only_new_activity() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = fixture_workspace(workspace)?;
    assert_eq!(config.fetch.source, FetchSourceKind::Fixture);
    assert_eq!(config.tracking.cases, vec!["IOE1", "IOE2"]);

    write_fixture(
        workspace,
        "IOE1",
        json!({
            "formType": "I-485",
            "updatedAtTimestamp": "2024-01-01T00:00:00Z",
            "events": [{ "eventCode": "IAF", "eventTimestamp": "2024-01-01T00:00:00Z" }]
        }),
    )?;
    write_fixture(
        workspace,
        "IOE2",
        json!({
            "formType": "I-765",
            "updatedAtTimestamp": "2024-01-05T00:00:00Z",
            "events": [{ "eventCode": "FTA0", "eventTimestamp": "2024-01-05T00:00:00Z" }]
        }),
    )?;

    let first = run_check_command(
        workspace,
        &config,
        &check_args(OutputFormat::Table),
        &mut Vec::new(),
    )?;
    assert_eq!(first.observation.summary.new_cases, 2);
    assert!(first.recorded.is_some());

    write_fixture(
        workspace,
        "IOE1",
        json!({
            "formType": "I-485",
            "updatedAtTimestamp": "2024-02-01T00:00:00Z",
            "events": [
                { "eventCode": "IAF", "eventTimestamp": "2024-01-01T00:00:00Z" },
                { "eventCode": "H008", "eventTimestamp": "2024-02-01T00:00:00Z" }
            ]
        }),
    )?;

    let mut out = Vec::new();
    let second = run_check_command(
        workspace,
        &config,
        &check_args(OutputFormat::Json),
        &mut out,
    )?;

    let lines = String::from_utf8(out)?
        .lines()
        .map(serde_json::from_str::<Value>)
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["id"], "IOE1");
    assert_eq!(lines[0]["isNew"], false);
    assert_eq!(lines[0]["fieldChanged"], true);
    assert_eq!(lines[0]["newEventPositions"], json!([0]));
    assert_eq!(lines[0]["record"]["currentActionCode"], "H008");

    assert_eq!(lines[1]["id"], "IOE2");
    assert_eq!(lines[1]["fieldChanged"], false);
    assert_eq!(lines[1]["newEventPositions"], json!([]));

    assert_eq!(second.observation.summary.changed_cases, 1);
    assert_eq!(second.observation.summary.new_events, 1);

    let store = SqliteHistoryStore::open(workspace)?;
    assert_eq!(store.history_len()?, 2);
    assert_eq!(store.latest_cases()?, second.observation.cases);

    let mut history = Vec::new();
    run_history_command(workspace, &mut history)?;
    assert_eq!(String::from_utf8(history)?.lines().count(), 3);

    let mut timeline = Vec::new();
    run_timeline_command(
        workspace,
        &TimelineArgs {
            case_id: "ioe1".to_owned(),
            output: OutputArgs {
                output: OutputFormat::Table,
            },
        },
        &mut timeline,
    )?;
    let timeline = String::from_utf8(timeline)?;
    let rows: Vec<&str> = timeline.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].contains("\tNEW\t"));
    assert!(rows[1].contains("\tCHANGED\t"));
    assert!(rows[1].ends_with("\tH008"));

    Ok(())
}

#[test]
fn missing_fixture_is_reported_without_blocking_others() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = fixture_workspace(workspace)?;

    write_fixture(workspace, "IOE1", json!({ "events": [] }))?;

    let mut out = Vec::new();
    let outcome = run_check_command(
        workspace,
        &config,
        &check_args(OutputFormat::Table),
        &mut out,
    )?;

    assert_eq!(outcome.observation.cases.len(), 1);
    assert_eq!(outcome.observation.failures.len(), 1);
    assert_eq!(outcome.observation.failures[0].case_id, "IOE2");

    let rendered = String::from_utf8(out)?;
    assert!(rendered.lines().any(|line| line.starts_with("FAILED\tIOE2\t")));

    let store = SqliteHistoryStore::open(workspace)?;
    let latest = store.latest_cases()?;
    assert!(latest.contains_key("IOE1"));
    assert!(!latest.contains_key("IOE2"));
    Ok(())
}

#[test]
fn legacy_snapshot_is_the_baseline_for_the_first_check() -> Result<(), Box<dyn Error>> {
    let temp = tempdir()?;
    let workspace = temp.path();
    let config = fixture_workspace(workspace)?;

    let mut store = SqliteHistoryStore::open(workspace)?;
    store.import_storage_export(&json!({
        "caseTrackerData": {
            "cases": {
                "IOE1": {
                    "id": "IOE1",
                    "updatedAtTimestamp": "2024-01-01T00:00:00Z",
                    "events": [
                        { "code": "IAF", "description": "Case Was Received", "timestamp": "2024-01-01T00:00:00Z" }
                    ],
                    "fetchedAt": "2024-01-01T00:00:00.000Z"
                }
            },
            "lastFetch": "2024-01-01T00:00:00.000Z"
        }
    }))?;
    drop(store);

    write_fixture(
        workspace,
        "IOE1",
        json!({
            "updatedAtTimestamp": "2024-01-01T00:00:00Z",
            "events": [{ "eventCode": "IAF", "eventTimestamp": "2024-01-01T00:00:00Z" }]
        }),
    )?;

    let args = CheckArgs {
        dry_run: true,
        cases: vec!["IOE1".to_owned()],
        output: OutputArgs {
            output: OutputFormat::Table,
        },
    };
    let outcome = run_check_command(workspace, &config, &args, &mut Vec::new())?;

    let annotation = &outcome.observation.annotations["IOE1"];
    assert!(annotation.is_unchanged());
    assert!(outcome.recorded.is_none());

    let store = SqliteHistoryStore::open(workspace)?;
    assert_eq!(store.history_len()?, 0);
    Ok(())
}
