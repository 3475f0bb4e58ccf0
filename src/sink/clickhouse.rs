use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, info};

use crate::config::ClickhouseConfig;
use crate::error::{ExporterError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};

/// Flat record destined for one sink table.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Analytical storage destination accepting batches of flat records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn insert_batch(&self, database: &str, table: &str, rows: &[Row]) -> Result<()>;

    /// Idempotent compaction trigger; safe to call repeatedly or skip.
    async fn deduplicate(&self, database: &str, table: &str) -> Result<()>;
}

/// ClickHouse over its HTTP interface: `JSONEachRow` inserts and
/// `OPTIMIZE TABLE ... FINAL` for deduplication.
pub struct ClickhouseHttpClient {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
}

impl ClickhouseHttpClient {
    pub fn from_config(config: &ClickhouseConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-ClickHouse-User",
            HeaderValue::from_str(&config.username)
                .map_err(|_| ExporterError::Configuration("invalid clickhouse user".to_string()))?,
        );
        if let Some(password) = &config.password {
            headers.insert(
                "X-ClickHouse-Key",
                HeaderValue::from_str(password).map_err(|_| {
                    ExporterError::Configuration("invalid clickhouse password".to_string())
                })?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ExporterError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            url: format!("{}://{}:{}", config.proto, config.host, config.port),
            retry: RetryConfig::from(config),
        })
    }

    /// For tests: point the client at an arbitrary endpoint.
    pub fn with_url(mut self, url: String) -> Self {
        self.url = url;
        self
    }

    async fn execute(&self, query: String) -> Result<()> {
        let response = retry_with_backoff(&self.retry, "clickhouse_execute", || {
            let query = &query;
            async move {
                self.http
                    .post(&self.url)
                    .body(query.clone())
                    .send()
                    .await
                    .map_err(|source| ExporterError::Network {
                        operation: "clickhouse_execute".to_string(),
                        source,
                    })
                    .and_then(|response| {
                        // Surface 5xx as transient so the backoff layer retries.
                        if response.status().is_server_error() {
                            return match response.error_for_status() {
                                Err(source) => Err(ExporterError::Network {
                                    operation: "clickhouse_execute".to_string(),
                                    source,
                                }),
                                Ok(response) => Ok(response),
                            };
                        }
                        Ok(response)
                    })
            }
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExporterError::Load(format!(
                "clickhouse returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSink for ClickhouseHttpClient {
    async fn insert_batch(&self, database: &str, table: &str, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut data = String::new();
        for row in rows {
            data.push_str(&serde_json::to_string(row)?);
            data.push(' ');
        }
        debug!(database, table, batch = rows.len(), "inserting batch");

        self.execute(format!(
            "INSERT INTO {database}.{table} FORMAT JSONEachRow {data}"
        ))
        .await?;
        info!(database, table, inserted = rows.len(), "batch inserted");
        Ok(())
    }

    async fn deduplicate(&self, database: &str, table: &str) -> Result<()> {
        self.execute(format!("OPTIMIZE TABLE {database}.{table} FINAL"))
            .await
    }
}
