use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging for the exporter.
///
/// `RUST_LOG` wins when set; otherwise the level from configuration is used.
pub fn init_telemetry(default_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();

    tracing::info!("tracker-etl telemetry initialized");
    Ok(())
}

/// Correlation ID linking all log lines of one extraction cycle.
pub fn generate_cycle_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping a single extraction cycle.
pub fn create_cycle_span(job_name: &str, cycle_id: &str) -> tracing::Span {
    tracing::info_span!("etl_cycle", job = job_name, cycle.id = cycle_id)
}
