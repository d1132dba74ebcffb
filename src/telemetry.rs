use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging.
///
/// `RUST_LOG` wins over the configured level when set. JSON output carries the
/// current span and span list so tick and job fields land on every event.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.log_level, e))?;

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    }
    .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!(json = config.json_logs, "Provisioner telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the events of one tick
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one scheduler tick
pub fn create_tick_span(correlation_id: &str, pending: usize) -> tracing::Span {
    tracing::info_span!(
        "scheduler_tick",
        correlation.id = correlation_id,
        jobs.pending = pending,
    )
}

/// Span covering one job's processing within a tick
pub fn create_job_span(owner_id: &str, job_id: &str, state: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow_job",
        owner.id = owner_id,
        job.id = job_id,
        job.state = state,
    )
}

pub fn shutdown_telemetry() {
    tracing::info!("Provisioner telemetry shutdown complete");
}
