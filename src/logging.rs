//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, optionally, to a
//! JSON log file per process.

use std::fs;
use std::path::Path;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// A global subscriber installed elsewhere (test harnesses) is left in place.
/// The first call returns the file writer's guard when file output is on;
/// hold it until exit, since dropping it flushes buffered log lines. Later
/// calls return `None`.
#[must_use = "dropping the guard stops file logging"]
pub fn init_structured_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let mut file_guard = None;
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(build_filter(&log_level));

        let file_target = if config.file_output {
            prepare_log_file(Path::new(&config.log_dir), &environment)
        } else {
            None
        };

        let (file_layer, guard, log_file) = match file_target {
            Some((file_name, log_path)) => {
                let appender = tracing_appender::rolling::never(&config.log_dir, &file_name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_filter(build_filter(&log_level));
                (Some(layer), Some(guard), Some(log_path))
            }
            None => (None, None, None),
        };

        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_file = log_file.as_deref().unwrap_or("none"),
            "Structured logging initialized"
        );

        file_guard = guard;
    });
    file_guard
}

/// `<log_dir>/<env>.<pid>.<timestamp>.log`, or `None` when the directory
/// cannot be created
fn prepare_log_file(log_dir: &Path, environment: &str) -> Option<(String, String)> {
    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "Cannot create log directory {}: {e}; logging to console only",
            log_dir.display()
        );
        return None;
    }
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let file_name = format!("{environment}.{}.{timestamp}.log", process::id());
    let log_path = log_dir.join(&file_name).display().to_string();
    Some((file_name, log_path))
}

/// `RUST_LOG` wins over the environment-derived level
fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Current environment from `PBJ_ENV`, then `APP_ENV`
fn get_environment() -> String {
    std::env::var("PBJ_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a pipeline lifecycle step
pub fn log_pipeline_operation(
    operation: &str,
    participant: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        participant = %participant,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "PIPELINE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
