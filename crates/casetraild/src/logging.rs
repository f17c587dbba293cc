use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

pub const LOG_ENV: &str = "CASETRAIL_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the process-wide subscriber. Logs go to stderr so stdout stays parseable.
/// A second call is a no-op.
pub fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    match installed {
        Ok(()) => tracing::debug!(format = format.as_str(), "tracing initialized"),
        Err(_) => tracing::debug!("tracing subscriber already installed"),
    }
}
