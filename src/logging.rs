//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, when a log
//! directory is available, to a JSON file per process.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once and when another subscriber is already
/// installed. `RUST_LOG` overrides the environment's default level.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let pid = process::id();

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter(&log_level));

        let log_dir = PathBuf::from("log");
        let file_layer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                let file_name = format!("{environment}.{pid}.{timestamp}.log");
                let file_appender = tracing_appender::rolling::never(&log_dir, &file_name);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // The writer must outlive every log call in the process
                std::mem::forget(guard);
                Some((
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(env_filter(&log_level)),
                    log_dir.join(file_name),
                ))
            }
            Err(_) => None,
        };

        let (file_layer, log_path) = match file_layer {
            Some((layer, path)) => (Some(layer), Some(path)),
            None => (None, None),
        };

        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = log_path.as_ref().map(|p| p.display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    resolve_environment(
        std::env::var("FIREBASE_INPUT_ENV").ok(),
        std::env::var("APP_ENV").ok(),
    )
}

/// `FIREBASE_INPUT_ENV` wins over `APP_ENV`; `development` when neither is set
pub(crate) fn resolve_environment(input_env: Option<String>, app_env: Option<String>) -> String {
    input_env
        .or(app_env)
        .unwrap_or_else(|| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for a single retrieval
pub fn log_retrieval_operation(
    operation: &str,
    query_name: &str,
    path: &str,
    status: &str,
    runtime_seconds: Option<f64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        query_name = %query_name,
        path = %path,
        status = %status,
        runtime_seconds = runtime_seconds,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📥 RETRIEVAL_OPERATION"
    );
}

/// Log structured data for stream subscriptions
pub fn log_stream_operation(
    operation: &str,
    query_name: &str,
    subscription_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        query_name = %query_name,
        subscription_id = subscription_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📡 STREAM_OPERATION"
    );
}

/// Log structured data for input lifecycle transitions
pub fn log_lifecycle_operation(
    operation: &str,
    mode: Option<&str>,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        mode = mode,
        state = %state,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔄 LIFECYCLE_OPERATION"
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
        "❌ ERROR"
    );
}
