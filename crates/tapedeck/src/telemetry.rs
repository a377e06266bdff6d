//! Process-wide log subscriber. Only the binary calls this; the library
//! itself just emits `log` and `tracing` records.

use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Environment variable holding an `EnvFilter` directive such as
/// `tapedeck=debug,info`.
pub const LOG_ENV_VAR: &str = "TAPEDECK_LOG";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("A global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to forward log records to tracing: {0}")]
    LogBridge(#[from] log::SetLoggerError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy()
}

/// Installs the global subscriber and routes `log` records into it.
/// Fails if called twice in one process.
pub fn init_logging(format: LogFormat) -> Result<(), LoggingError> {
    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(text)
        .with(json);

    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}
