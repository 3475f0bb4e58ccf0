use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Instrument};

use tracker_etl::config::ExporterConfig;
use tracker_etl::etl::EtlPipeline;
use tracker_etl::shutdown::{listen_for_signals, Shutdown};
use tracker_etl::sink::ClickhouseHttpClient;
use tracker_etl::telemetry::{create_cycle_span, generate_cycle_id, init_telemetry};
use tracker_etl::tracker::HttpTrackerClient;
use tracker_etl::state;

#[derive(Parser, Debug)]
#[command(name = "tracker-etl", about = "Export tracker issues and cycle-time metrics to ClickHouse")]
struct Cli {
    /// Run a single extraction cycle and exit.
    #[arg(long)]
    run_once: bool,

    /// Load environment variables from this file instead of `.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ExporterConfig::load_env_file(cli.env_file.as_deref())?;
    let config = ExporterConfig::load()?;
    init_telemetry(&config.loglevel)?;

    let (handle, shutdown) = Shutdown::new();
    tokio::spawn(listen_for_signals(handle));

    let source = Arc::new(HttpTrackerClient::from_config(&config, shutdown.clone())?);
    let sink = Arc::new(ClickhouseHttpClient::from_config(&config.clickhouse)?);
    let store = state::from_config(&config);

    let interval = Duration::from_secs(config.etl_interval_minutes * 60);
    let job = config.state.key.clone();
    let ignore_exceptions = config.ignore_exceptions;
    let pipeline = EtlPipeline::new(config, source, sink, store, shutdown.clone())?;

    let mut waiter = shutdown.clone();
    loop {
        let cycle_id = generate_cycle_id();
        let span = create_cycle_span(&job, &cycle_id);
        let outcome = pipeline.run_cycle().instrument(span).await;

        match outcome {
            Ok(report) => info!(
                issues = report.issues,
                metrics = report.metrics,
                changelog_events = report.changelog_events,
                failed = report.failed_issues,
                skipped = report.skipped,
                "cycle finished"
            ),
            Err(e) if ignore_exceptions => error!(error = %e, "cycle failed, will retry next interval"),
            Err(e) => return Err(e.into()),
        }

        if cli.run_once || shutdown.is_triggered() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = waiter.triggered() => break,
        }
    }

    info!("exporter stopped");
    Ok(())
}
