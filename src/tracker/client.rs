use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::shutdown::Shutdown;
use crate::tracker::types::{ChangelogEvent, Issue};

const SEARCH_HARD_LIMIT: usize = 10_000;

/// Data source yielding ordered issue + changelog records.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// All issues matching `query`, in the order the tracker returns them.
    /// Pagination is hidden behind the implementation.
    async fn search_issues(&self, query: &str, limit: u32) -> Result<Vec<Issue>>;

    async fn get_issue(&self, key: &str) -> Result<Issue>;
}

/// Thin facade over the tracker v2 HTTP API.
pub struct HttpTrackerClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    shutdown: Shutdown,
}

impl HttpTrackerClient {
    pub fn from_config(config: &ExporterConfig, shutdown: Shutdown) -> Result<Self> {
        let token = config
            .tracker
            .token
            .clone()
            .ok_or_else(|| ExporterError::Configuration("tracker token missing".to_string()))?;

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("OAuth {token}"))
            .map_err(|_| ExporterError::Configuration("invalid tracker token".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        if let Some(org_id) = &config.tracker.org_id {
            headers.insert(
                "X-Org-ID",
                HeaderValue::from_str(org_id).map_err(|_| {
                    ExporterError::Configuration("invalid tracker org id".to_string())
                })?,
            );
        } else if let Some(cloud_org_id) = &config.tracker.cloud_org_id {
            headers.insert(
                "X-Cloud-Org-ID",
                HeaderValue::from_str(cloud_org_id).map_err(|_| {
                    ExporterError::Configuration("invalid tracker cloud org id".to_string())
                })?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.tracker.timeout_seconds))
            .build()
            .map_err(|e| ExporterError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.tracker.base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            shutdown,
        })
    }

    fn checkpoint(&self) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(ExporterError::Extraction(
                "shutdown requested, aborting fetch".to_string(),
            ));
        }
        Ok(())
    }

    /// One page of a search; returns the rows and the total page count.
    async fn search_page(&self, query: &str, limit: u32, page: u32) -> Result<(Vec<Issue>, u32)> {
        let url = format!("{}/v2/issues/_search", self.base_url);
        let body = serde_json::json!({ "query": query });

        let response = retry_with_backoff(&self.retry, "tracker_search", || {
            let url = &url;
            let body = &body;
            async move {
                self.http
                    .post(url)
                    .query(&[("perPage", limit.to_string()), ("page", page.to_string())])
                    .json(body)
                    .send()
                    .await
                    .map_err(|source| ExporterError::Network {
                        operation: "tracker_search".to_string(),
                        source,
                    })
            }
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExporterError::Extraction(format!(
                "tracker search returned {status}: {text}"
            )));
        }

        let total_pages = response
            .headers()
            .get("X-Total-Pages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let issues: Vec<Issue> = response.json().await.map_err(|source| {
            ExporterError::Network {
                operation: "tracker_search_decode".to_string(),
                source,
            }
        })?;
        Ok((issues, total_pages))
    }

    async fn fetch_changelog(&self, key: &str) -> Result<Vec<ChangelogEvent>> {
        let url = format!("{}/v2/issues/{key}/changelog", self.base_url);
        let mut events = Vec::new();
        let mut page: u32 = 1;

        loop {
            let response = retry_with_backoff(&self.retry, "tracker_changelog", || {
                let url = &url;
                async move {
                    self.http
                        .get(url)
                        .query(&[("perPage", "50".to_string()), ("page", page.to_string())])
                        .send()
                        .await
                        .map_err(|source| ExporterError::Network {
                            operation: "tracker_changelog".to_string(),
                            source,
                        })
                }
            })
            .await?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ExporterError::Extraction(format!(
                    "changelog fetch for {key} returned {status}: {text}"
                )));
            }

            let total_pages: u32 = response
                .headers()
                .get("X-Total-Pages")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(1);
            let mut batch: Vec<ChangelogEvent> =
                response.json().await.map_err(|source| ExporterError::Network {
                    operation: "tracker_changelog_decode".to_string(),
                    source,
                })?;
            events.append(&mut batch);

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(events)
    }
}

#[async_trait]
impl IssueSource for HttpTrackerClient {
    async fn search_issues(&self, query: &str, limit: u32) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        let mut page: u32 = 1;

        loop {
            self.checkpoint()?;
            let (batch, total_pages) = self.search_page(query, limit, page).await?;
            debug!(page, total_pages, fetched = batch.len(), "search page fetched");
            issues.extend(batch);

            if issues.len() >= SEARCH_HARD_LIMIT {
                warn!(
                    found = issues.len(),
                    hard_limit = SEARCH_HARD_LIMIT,
                    "search result exceeds the tracker API hard limit; truncating"
                );
                break;
            }
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        info!(found = issues.len(), query, "issues found");

        for issue in issues.iter_mut() {
            self.checkpoint()?;
            issue.changelog = self.fetch_changelog(&issue.key).await?;
        }

        Ok(issues)
    }

    async fn get_issue(&self, key: &str) -> Result<Issue> {
        let url = format!("{}/v2/issues/{key}", self.base_url);
        let response = retry_with_backoff(&self.retry, "tracker_get_issue", || {
            let url = &url;
            async move {
                self.http
                    .get(url)
                    .send()
                    .await
                    .map_err(|source| ExporterError::Network {
                        operation: "tracker_get_issue".to_string(),
                        source,
                    })
            }
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExporterError::Extraction(format!(
                "issue fetch for {key} returned {status}: {text}"
            )));
        }

        let mut issue: Issue = response.json().await.map_err(|source| ExporterError::Network {
            operation: "tracker_get_issue_decode".to_string(),
            source,
        })?;
        issue.changelog = self.fetch_changelog(&issue.key).await?;
        Ok(issue)
    }
}
