//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` takes precedence over the configured level. When a log
//! directory is configured, output is also written to a daily rolling file
//! through a non-blocking writer.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Builds the filter: `RUST_LOG` if set and valid, else the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initializes logging.
///
/// # Returns
///
/// * `Option<WorkerGuard>` - Guard of the file writer; keep it alive for the
///   lifetime of the process or buffered lines are lost
///
/// # Examples
///
/// ```no_run
/// use sensor_telemetry::config::LoggingConfig;
///
/// let _guard = sensor_telemetry::logging::init(&LoggingConfig::default());
/// tracing::info!("ready");
/// ```
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let registry = tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt::layer());

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}
