pub mod clickhouse;

pub use clickhouse::{ClickhouseHttpClient, MetricsSink, Row};
