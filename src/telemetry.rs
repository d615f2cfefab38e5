use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging on stderr
///
/// `RUST_LOG` wins over the configured level. JSON output carries the
/// current span and span list, so every line of a workflow operation has its
/// correlation id.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let json = config.json_logs.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });
    let plain = (!config.json_logs).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()?;

    tracing::info!(json = config.json_logs, "SecureRails telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span for one workflow operation on a batch
pub fn create_workflow_span(
    operation: &str,
    batch_id: &str,
    transporter_id: &str,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "transport_workflow",
        operation = operation,
        batch.id = batch_id,
        transporter.id = transporter_id,
        correlation.id = correlation_id,
    )
}

/// Span for one HTTP request
pub fn create_request_span(method: &str, path: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "http_request",
        http.method = method,
        http.path = path,
        correlation.id = correlation_id,
    )
}
