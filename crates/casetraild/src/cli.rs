use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::render::OutputFormat;

pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct OutputArgs {
    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct CheckArgs {
    #[arg(long, help = "Fetch and diff without recording a snapshot")]
    pub dry_run: bool,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "CASE_ID",
        help = "Check these case ids instead of the tracked list"
    )]
    pub cases: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct WatchArgs {
    #[arg(
        long,
        default_value_t = DEFAULT_WATCH_INTERVAL_SECS,
        help = "Seconds between checks (minimum 1)"
    )]
    pub interval_secs: u64,

    #[arg(long, help = "Stop after this many checks")]
    pub max_runs: Option<u64>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TimelineArgs {
    #[arg(help = "Case id to follow through history")]
    pub case_id: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ClearArgs {
    #[arg(long, help = "Confirm deletion of all recorded snapshots")]
    pub yes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ImportArgs {
    #[arg(help = "JSON file holding exported caseTrackerData/caseTrackerHistory entries")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum TrackAction {
    /// Start tracking a case id
    Add { case_id: String },
    /// Stop tracking a case id
    Remove { case_id: String },
    /// List tracked case ids
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TrackArgs {
    #[command(subcommand)]
    pub action: TrackAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// Fetch tracked cases, highlight changes and record a snapshot
    Check(CheckArgs),
    /// Run checks repeatedly
    Watch(WatchArgs),
    /// Show the most recent recorded snapshot
    Latest(OutputArgs),
    /// List recorded snapshots
    History,
    /// Show how one case evolved across snapshots
    Timeline(TimelineArgs),
    /// Delete all recorded snapshots
    Clear(ClearArgs),
    /// Manage the tracked case list
    Track(TrackArgs),
    /// Import snapshots exported from browser storage
    Import(ImportArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Case status tracker")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .casetrail/"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn check_parses_dry_run_cases_and_output() {
        let cli = Cli::try_parse_from([
            "casetraild",
            "--workspace",
            "/tmp/ws",
            "check",
            "--dry-run",
            "--cases",
            "IOE1,IOE2",
            "--output",
            "json",
        ])
        .expect("check should parse");

        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        match cli.command {
            Commands::Check(args) => {
                assert!(args.dry_run);
                assert_eq!(args.cases, vec!["IOE1", "IOE2"]);
                assert_eq!(args.output.output, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["casetraild", "history", "--log-format", "json"])
            .expect("history should parse");

        assert_eq!(cli.command, Commands::History);
        assert_eq!(cli.log_format.as_str(), "json");
        assert_eq!(cli.workspace, PathBuf::from("."));
    }

    #[test]
    fn watch_defaults_interval() {
        let cli = Cli::try_parse_from(["casetraild", "watch"]).expect("watch should parse");

        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.interval_secs, DEFAULT_WATCH_INTERVAL_SECS);
                assert_eq!(args.max_runs, None);
                assert_eq!(args.output.output, OutputFormat::Table);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn track_subcommands_parse() {
        let cli = Cli::try_parse_from(["casetraild", "track", "add", "ioe9"])
            .expect("track add should parse");
        assert_eq!(
            cli.command,
            Commands::Track(TrackArgs {
                action: TrackAction::Add {
                    case_id: "ioe9".to_owned()
                }
            })
        );

        let cli =
            Cli::try_parse_from(["casetraild", "track", "list"]).expect("track list should parse");
        assert_eq!(
            cli.command,
            Commands::Track(TrackArgs {
                action: TrackAction::List
            })
        );
    }

    #[test]
    fn invalid_output_and_log_format_are_rejected() {
        assert!(Cli::try_parse_from(["casetraild", "latest", "--output", "xml"]).is_err());
        assert!(Cli::try_parse_from(["casetraild", "--log-format", "yaml", "history"]).is_err());
    }

    #[test]
    fn timeline_requires_a_case_id() {
        assert!(Cli::try_parse_from(["casetraild", "timeline"]).is_err());

        let cli = Cli::try_parse_from(["casetraild", "timeline", "IOE1"])
            .expect("timeline should parse");
        match cli.command {
            Commands::Timeline(args) => assert_eq!(args.case_id, "IOE1"),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
