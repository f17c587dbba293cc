use std::io::Write;

use anyhow::{Context, Result};
use casetrail_config::{config_path, ensure_workspace_config, validate_config};
use casetraild::cli::{Cli, Commands, parse_cli};
use casetraild::commands::{
    run_check_command, run_clear_command, run_history_command, run_import_command,
    run_latest_command, run_timeline_command, run_track_command, run_watch_command,
};
use casetraild::logging::init_tracing;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Check(args) => {
            let outcome = run_check_command(&workspace, &config, &args, &mut out)?;
            if !outcome.observation.failures.is_empty() {
                tracing::warn!(
                    failed = outcome.observation.failures.len(),
                    "some cases could not be checked"
                );
            }
        }
        Commands::Watch(args) => run_watch_command(&workspace, &config, &args, &mut out)?,
        Commands::Latest(args) => run_latest_command(&workspace, &args, &mut out)?,
        Commands::History => run_history_command(&workspace, &mut out)?,
        Commands::Timeline(args) => run_timeline_command(&workspace, &args, &mut out)?,
        Commands::Clear(args) => run_clear_command(&workspace, &args, &mut out)?,
        Commands::Track(args) => run_track_command(&workspace, &config, &args.action, &mut out)?,
        Commands::Import(args) => run_import_command(&workspace, &args, &mut out)?,
    }

    out.flush().context("failed to flush stdout")?;
    Ok(())
}
