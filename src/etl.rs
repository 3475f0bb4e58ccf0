use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::shutdown::Shutdown;
use crate::sink::{MetricsSink, Row};
use crate::state::WatermarkStore;
use crate::timeutil::{from_human_time, parse_tracker_datetime, DATETIME_QUERY_FORMAT};
use crate::tracker::client::IssueSource;
use crate::transform::IssueTransformer;

/// What one extraction cycle did.
#[derive(Debug, Default, PartialEq)]
pub struct CycleReport {
    pub issues: usize,
    pub metrics: usize,
    pub changelog_events: usize,
    pub failed_issues: usize,
    pub zero_metric_issues: usize,
    /// The cycle found nothing new and skipped the sink entirely.
    pub skipped: bool,
    pub committed_watermark: Option<String>,
}

/// Extract-transform-load cycle over the tracker search API.
///
/// A cycle fetches everything matching the search window, transforms each
/// issue independently, loads the three sink tables and only then commits
/// the watermark, so a failed load replays the same window next time.
pub struct EtlPipeline {
    config: ExporterConfig,
    source: Arc<dyn IssueSource>,
    sink: Arc<dyn MetricsSink>,
    state: Arc<dyn WatermarkStore>,
    transformer: IssueTransformer,
    shutdown: Shutdown,
}

impl EtlPipeline {
    pub fn new(
        config: ExporterConfig,
        source: Arc<dyn IssueSource>,
        sink: Arc<dyn MetricsSink>,
        state: Arc<dyn WatermarkStore>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let transformer = IssueTransformer::from_config(&config)?;
        Ok(Self {
            config,
            source,
            sink,
            state,
            transformer,
            shutdown,
        })
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let job = &self.config.state.key;
        let mut lock = if self.config.lock_dir.trim().is_empty() {
            None
        } else {
            Some(RwLock::new(self.open_lock_file(job)?))
        };
        let _guard = match lock.as_mut() {
            Some(lock) => Some(lock.try_write().map_err(|_| {
                ExporterError::Extraction(format!("another cycle for job {job} holds the lock"))
            })?),
            None => None,
        };

        let stored_watermark = if self.config.stateful {
            self.state.get(job).await?
        } else {
            None
        };
        let query = build_search_query(&self.config, stored_watermark.as_deref(), Utc::now())?;
        info!(job, query, "starting extraction");

        let issues = self
            .source
            .search_issues(&query, self.config.tracker.search.per_page_limit)
            .await?;
        if issues.is_empty() {
            info!(job, "nothing to export");
            return Ok(CycleReport::default());
        }

        let mut issue_rows: Vec<Row> = Vec::with_capacity(issues.len());
        let mut metric_rows: Vec<Row> = Vec::new();
        let mut changelog_rows: Vec<Row> = Vec::new();
        let mut failed_issues = 0usize;
        let mut zero_metric_issues = 0usize;

        for issue in &issues {
            match self.transformer.transform(issue) {
                Ok(transformed) => {
                    if transformed.metrics_count() == 0 {
                        zero_metric_issues += 1;
                    }
                    issue_rows.push(transformed.issue_row);
                    metric_rows.extend(transformed.metric_rows);
                    changelog_rows.extend(transformed.changelog_rows);
                }
                Err(e) => {
                    // One broken issue never poisons the batch.
                    warn!(issue = %issue.key, error = %e, "issue transform failed, excluded from batch");
                    failed_issues += 1;
                }
            }
        }
        if zero_metric_issues > 0 {
            debug!(
                zero_metric_issues,
                "issues with no exited statuses in this batch"
            );
        }

        let candidate = watermark_candidate(&issues);
        if self.config.stateful
            && candidate.is_some()
            && candidate == stored_watermark
            && issues.len() <= 1
            && metric_rows.len() <= 1
        {
            // The search window is inclusive, so the issue at the watermark
            // boundary keeps coming back. Nothing new: spare the sink.
            info!(job, "already at the watermark, skipping upload");
            return Ok(CycleReport {
                issues: issues.len(),
                metrics: metric_rows.len(),
                changelog_events: changelog_rows.len(),
                failed_issues,
                zero_metric_issues,
                skipped: true,
                committed_watermark: None,
            });
        }

        if self.config.clickhouse.enable_upload {
            self.load(&self.config.clickhouse.issues_table, &issue_rows)
                .await?;
            self.load(&self.config.clickhouse.issue_metrics_table, &metric_rows)
                .await?;
            if self.config.changelog_export_enabled {
                self.load(
                    &self.config.clickhouse.issues_changelog_table,
                    &changelog_rows,
                )
                .await?;
            }
        } else {
            info!("sink upload disabled, transformed batch discarded");
        }

        // Nothing was durably stored on a dry run, so the window must be
        // replayed once uploads are enabled again.
        let committed_watermark = if self.config.stateful && self.config.clickhouse.enable_upload {
            match &candidate {
                Some(value) => {
                    self.state.set(job, value).await?;
                    info!(job, watermark = value, "watermark committed");
                    Some(value.clone())
                }
                None => {
                    warn!(job, "no parsable update time in batch, watermark unchanged");
                    None
                }
            }
        } else {
            None
        };

        Ok(CycleReport {
            issues: issues.len(),
            metrics: metric_rows.len(),
            changelog_events: changelog_rows.len(),
            failed_issues,
            zero_metric_issues,
            skipped: false,
            committed_watermark,
        })
    }

    async fn load(&self, table: &str, rows: &[Row]) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(ExporterError::Load(format!(
                "shutdown requested before loading {table}, watermark not advanced"
            )));
        }
        let database = &self.config.clickhouse.database;
        self.sink.insert_batch(database, table, rows).await?;
        if self.config.clickhouse.auto_deduplicate && !rows.is_empty() {
            self.sink.deduplicate(database, table).await?;
        }
        Ok(())
    }

    fn open_lock_file(&self, job: &str) -> Result<std::fs::File> {
        let dir = PathBuf::from(&self.config.lock_dir);
        std::fs::create_dir_all(&dir)?;
        let sanitized: String = job
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(format!("{sanitized}.lock")))?;
        Ok(file)
    }
}

/// Assemble the tracker query-language expression for one cycle.
///
/// An explicit configured query wins; otherwise the filter is built from the
/// queue list plus an update-time window (watermark when stateful, a fixed
/// lookback otherwise). The result is always sorted by update time ascending
/// unless the explicit query sorts on its own.
pub fn build_search_query(
    config: &ExporterConfig,
    watermark: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String> {
    const SORT_SUFFIX: &str = "\"Sort by\": Updated ASC";

    if let Some(explicit) = &config.tracker.search.query {
        let mut query = explicit.trim().to_string();
        if !query.to_lowercase().contains("sort by") {
            query.push(' ');
            query.push_str(SORT_SUFFIX);
        }
        return Ok(query);
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(queues) = config.queues_filter() {
        parts.push(format!("Queue: {queues}"));
    }

    if config.stateful {
        let since = match watermark {
            Some(value) => value.to_string(),
            None => {
                // First stateful run: bounded lookback instead of full history.
                let lookback = from_human_time(&config.stateful_initial_range)?;
                (now - chrono::Duration::seconds(lookback as i64))
                    .format(DATETIME_QUERY_FORMAT)
                    .to_string()
            }
        };
        parts.push(format!("Updated: >= \"{since}\""));
    } else if let Some(range) = &config.tracker.search.range {
        let lookback = from_human_time(range)?;
        let since = (now - chrono::Duration::seconds(lookback as i64)).format(DATETIME_QUERY_FORMAT);
        parts.push(format!("Updated: >= \"{since}\""));
    }

    if parts.is_empty() {
        return Err(ExporterError::Configuration(
            "no search input: configure a query, queues, a range or stateful mode".to_string(),
        ));
    }

    Ok(format!("{} {SORT_SUFFIX}", parts.join(" and ")))
}

/// Watermark value for a batch: the update time of the last issue, rendered
/// in the query-language format. Results arrive sorted by update time, so
/// the last one is the newest.
pub fn watermark_candidate(issues: &[crate::tracker::types::Issue]) -> Option<String> {
    issues
        .iter()
        .rev()
        .filter_map(|issue| issue.updated_at.as_deref())
        .filter_map(parse_tracker_datetime)
        .map(|parsed| parsed.to_utc().format(DATETIME_QUERY_FORMAT).to_string())
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::types::Issue;
    use chrono::TimeZone;

    fn config() -> ExporterConfig {
        let mut cfg = ExporterConfig::default();
        cfg.tracker.token = Some("secret".to_string());
        cfg.tracker.org_id = Some("123".to_string());
        cfg
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn explicit_query_gets_a_sort_suffix() {
        let mut cfg = config();
        cfg.tracker.search.query = Some("Queue: TEST AND Status: Open".to_string());
        let query = build_search_query(&cfg, None, now()).unwrap();
        assert_eq!(
            query,
            "Queue: TEST AND Status: Open \"Sort by\": Updated ASC"
        );
    }

    #[test]
    fn explicit_query_with_sort_is_untouched() {
        let mut cfg = config();
        cfg.tracker.search.query = Some("Queue: TEST \"Sort by\": Key DESC".to_string());
        let query = build_search_query(&cfg, None, now()).unwrap();
        assert_eq!(query, "Queue: TEST \"Sort by\": Key DESC");
    }

    #[test]
    fn stateful_query_uses_the_watermark() {
        let mut cfg = config();
        cfg.stateful = true;
        cfg.tracker.search.queues = Some("test".to_string());
        let query = build_search_query(&cfg, Some("2023-10-15 09:30:00"), now()).unwrap();
        assert_eq!(
            query,
            "Queue: TEST and Updated: >= \"2023-10-15 09:30:00\" \"Sort by\": Updated ASC"
        );
    }

    #[test]
    fn stateful_first_run_uses_the_initial_lookback() {
        let mut cfg = config();
        cfg.stateful = true;
        cfg.stateful_initial_range = "1d".to_string();
        let query = build_search_query(&cfg, None, now()).unwrap();
        assert_eq!(
            query,
            "Updated: >= \"2023-10-15 12:00:00\" \"Sort by\": Updated ASC"
        );
    }

    #[test]
    fn ranged_query_subtracts_the_lookback() {
        let mut cfg = config();
        cfg.tracker.search.range = Some("2h".to_string());
        let query = build_search_query(&cfg, None, now()).unwrap();
        assert_eq!(
            query,
            "Updated: >= \"2023-10-16 10:00:00\" \"Sort by\": Updated ASC"
        );
    }

    #[test]
    fn no_search_input_is_a_configuration_error() {
        assert!(matches!(
            build_search_query(&config(), None, now()),
            Err(ExporterError::Configuration(_))
        ));
    }

    #[test]
    fn watermark_comes_from_the_newest_parsable_issue() {
        let mut first = Issue::default();
        first.updated_at = Some("2023-10-16T09:00:00.000+0000".to_string());
        let mut second = Issue::default();
        second.updated_at = Some("2023-10-16T10:30:00.000+0000".to_string());
        let mut third = Issue::default();
        third.updated_at = Some("not a date".to_string());

        assert_eq!(
            watermark_candidate(&[first, second, third]).as_deref(),
            Some("2023-10-16 10:30:00")
        );
        assert_eq!(watermark_candidate(&[]), None);
    }
}
