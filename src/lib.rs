//! Issue-tracker to ClickHouse exporter.
//!
//! Extracts issues and their changelogs from the tracker API, derives
//! per-status time-in-state metrics (calendar and business-hours), and loads
//! flat rows into ClickHouse. Incremental runs are driven by a persisted
//! per-job watermark over issue update times.

pub mod config;
pub mod error;
pub mod etl;
pub mod metrics;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod state;
pub mod telemetry;
pub mod timeutil;
pub mod tracker;
pub mod transform;

pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use etl::{CycleReport, EtlPipeline};
pub use metrics::{MetricsEngine, StatusMetric};
pub use transform::IssueTransformer;
