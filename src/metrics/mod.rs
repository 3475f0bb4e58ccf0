pub mod engine;
pub mod types;

pub use engine::{ChangelogOutcome, MetricsEngine};
pub use types::{ChangelogEventRecord, StatusMetric};
