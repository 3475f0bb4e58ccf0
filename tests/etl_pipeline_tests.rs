//! End-to-end cycle behavior with in-process fakes for the source, the sink
//! and the watermark store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tracker_etl::config::ExporterConfig;
use tracker_etl::error::{ExporterError, Result};
use tracker_etl::etl::EtlPipeline;
use tracker_etl::shutdown::Shutdown;
use tracker_etl::sink::{MetricsSink, Row};
use tracker_etl::state::{MemoryWatermarkStore, WatermarkStore};
use tracker_etl::tracker::types::{ChangelogEvent, ChangelogValue, EntityRef, FieldChange, Issue};
use tracker_etl::tracker::IssueSource;

struct FakeSource {
    issues: Vec<Issue>,
}

#[async_trait]
impl IssueSource for FakeSource {
    async fn search_issues(&self, _query: &str, _limit: u32) -> Result<Vec<Issue>> {
        Ok(self.issues.clone())
    }

    async fn get_issue(&self, key: &str) -> Result<Issue> {
        self.issues
            .iter()
            .find(|i| i.key == key)
            .cloned()
            .ok_or_else(|| ExporterError::Extraction(format!("no such issue: {key}")))
    }
}

#[derive(Default)]
struct FakeSink {
    inserts: Mutex<Vec<(String, usize)>>,
    optimized: Mutex<Vec<String>>,
    fail_on_table: Option<String>,
}

#[async_trait]
impl MetricsSink for FakeSink {
    async fn insert_batch(&self, _database: &str, table: &str, rows: &[Row]) -> Result<()> {
        if self.fail_on_table.as_deref() == Some(table) {
            return Err(ExporterError::Load(format!("simulated failure on {table}")));
        }
        self.inserts
            .lock()
            .await
            .push((table.to_string(), rows.len()));
        Ok(())
    }

    async fn deduplicate(&self, _database: &str, table: &str) -> Result<()> {
        self.optimized.lock().await.push(table.to_string());
        Ok(())
    }
}

fn config() -> ExporterConfig {
    let mut cfg = ExporterConfig::default();
    cfg.stateful = true;
    cfg.lock_dir = String::new(); // no cross-process locking inside tests
    cfg.clickhouse.auto_deduplicate = false;
    cfg
}

fn issue(key: &str, updated_at: &str) -> Issue {
    let mut issue = Issue::default();
    issue.key = key.to_string();
    issue.status = EntityRef::named("Open");
    issue.created_at = Some("2023-10-01T09:00:00.000+0000".to_string());
    issue.updated_at = Some(updated_at.to_string());
    issue
}

fn issue_with_transition(key: &str, updated_at: &str) -> Issue {
    let mut issue = issue(key, updated_at);
    issue.status = EntityRef::named("In Progress");
    issue.changelog = vec![ChangelogEvent {
        updated_at: Some(updated_at.to_string()),
        event_type: "IssueWorkflow".to_string(),
        transport: "front".to_string(),
        updated_by: EntityRef::default(),
        fields: vec![
            FieldChange {
                field: Some(EntityRef {
                    id: Some("status".to_string()),
                    ..Default::default()
                }),
                from: ChangelogValue::Entity(EntityRef::named("Open")),
                to: ChangelogValue::Entity(EntityRef::named("In Progress")),
            },
            FieldChange {
                field: Some(EntityRef {
                    id: Some("statusStartTime".to_string()),
                    ..Default::default()
                }),
                from: ChangelogValue::Scalar("2023-10-16T09:00:00.000+0000".to_string()),
                to: ChangelogValue::Scalar(updated_at.to_string()),
            },
        ],
    }];
    issue
}

fn pipeline(
    config: ExporterConfig,
    source: FakeSource,
    sink: Arc<FakeSink>,
    store: Arc<MemoryWatermarkStore>,
) -> EtlPipeline {
    EtlPipeline::new(
        config,
        Arc::new(source),
        sink,
        store,
        Shutdown::never(),
    )
    .unwrap()
}

#[tokio::test]
async fn successful_cycle_loads_and_commits_watermark() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let pipeline = pipeline(
        config(),
        FakeSource {
            issues: vec![
                issue_with_transition("TEST-1", "2023-10-16T10:00:00.000+0000"),
                issue("TEST-2", "2023-10-16T11:00:00.000+0000"),
            ],
        },
        sink.clone(),
        store.clone(),
    );

    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.issues, 2);
    assert_eq!(report.metrics, 1);
    assert_eq!(report.failed_issues, 0);
    assert!(!report.skipped);
    assert_eq!(
        report.committed_watermark.as_deref(),
        Some("2023-10-16 11:00:00")
    );

    // The store agrees with the report.
    assert_eq!(
        store.get("tracker_etl_default").await.unwrap().as_deref(),
        Some("2023-10-16 11:00:00")
    );

    let inserts = sink.inserts.lock().await;
    assert_eq!(
        *inserts,
        vec![
            ("issues".to_string(), 2),
            ("issue_metrics".to_string(), 1),
        ]
    );
}

#[tokio::test]
async fn failed_load_leaves_watermark_untouched() {
    let sink = Arc::new(FakeSink {
        fail_on_table: Some("issue_metrics".to_string()),
        ..Default::default()
    });
    let store = Arc::new(MemoryWatermarkStore::new());
    store.set("tracker_etl_default", "2023-10-15 00:00:00").await.unwrap();

    let pipeline = pipeline(
        config(),
        FakeSource {
            issues: vec![issue_with_transition("TEST-1", "2023-10-16T10:00:00.000+0000")],
        },
        sink.clone(),
        store.clone(),
    );

    assert!(matches!(
        pipeline.run_cycle().await,
        Err(ExporterError::Load(_))
    ));
    assert_eq!(
        store.get("tracker_etl_default").await.unwrap().as_deref(),
        Some("2023-10-15 00:00:00")
    );
}

#[tokio::test]
async fn at_watermark_batch_is_skipped() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    store.set("tracker_etl_default", "2023-10-16 10:00:00").await.unwrap();

    let pipeline = pipeline(
        config(),
        FakeSource {
            // The inclusive window returns the boundary issue again.
            issues: vec![issue("TEST-1", "2023-10-16T10:00:00.000+0000")],
        },
        sink.clone(),
        store.clone(),
    );

    let report = pipeline.run_cycle().await.unwrap();
    assert!(report.skipped);
    assert!(report.committed_watermark.is_none());
    assert!(sink.inserts.lock().await.is_empty());
}

#[tokio::test]
async fn empty_search_is_a_quiet_no_op() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let pipeline = pipeline(
        config(),
        FakeSource { issues: vec![] },
        sink.clone(),
        store.clone(),
    );

    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.issues, 0);
    assert!(report.committed_watermark.is_none());
    assert!(sink.inserts.lock().await.is_empty());
    assert_eq!(store.get("tracker_etl_default").await.unwrap(), None);
}

#[tokio::test]
async fn upload_disabled_leaves_watermark_untouched() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let mut cfg = config();
    cfg.clickhouse.enable_upload = false;

    let pipeline = pipeline(
        cfg,
        FakeSource {
            issues: vec![issue("TEST-1", "2023-10-16T11:00:00.000+0000")],
        },
        sink.clone(),
        store.clone(),
    );

    let report = pipeline.run_cycle().await.unwrap();
    assert!(sink.inserts.lock().await.is_empty());
    // A dry run stores nothing, so the window stays open for replay.
    assert!(report.committed_watermark.is_none());
    assert_eq!(store.get("tracker_etl_default").await.unwrap(), None);
}

#[tokio::test]
async fn changelog_table_loads_only_when_enabled() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let mut cfg = config();
    cfg.changelog_export_enabled = true;

    let pipeline = pipeline(
        cfg,
        FakeSource {
            issues: vec![issue_with_transition("TEST-1", "2023-10-16T10:00:00.000+0000")],
        },
        sink.clone(),
        store.clone(),
    );

    pipeline.run_cycle().await.unwrap();
    let inserts = sink.inserts.lock().await;
    assert_eq!(inserts.len(), 3);
    assert_eq!(inserts[2].0, "issues_changelog");
    // Two field-changes in the single workflow event.
    assert_eq!(inserts[2].1, 2);
}

#[tokio::test]
async fn shutdown_before_load_aborts_without_commit() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let (handle, shutdown) = Shutdown::new();

    let pipeline = EtlPipeline::new(
        config(),
        Arc::new(FakeSource {
            issues: vec![issue("TEST-1", "2023-10-16T10:00:00.000+0000")],
        }),
        sink.clone(),
        store.clone(),
        shutdown,
    )
    .unwrap();

    handle.trigger();
    assert!(matches!(
        pipeline.run_cycle().await,
        Err(ExporterError::Load(_))
    ));
    assert!(sink.inserts.lock().await.is_empty());
    assert_eq!(store.get("tracker_etl_default").await.unwrap(), None);
}

#[tokio::test]
async fn dedup_runs_per_loaded_table_when_enabled() {
    let sink = Arc::new(FakeSink::default());
    let store = Arc::new(MemoryWatermarkStore::new());
    let mut cfg = config();
    cfg.clickhouse.auto_deduplicate = true;

    let pipeline = pipeline(
        cfg,
        FakeSource {
            issues: vec![issue_with_transition("TEST-1", "2023-10-16T10:00:00.000+0000")],
        },
        sink.clone(),
        store.clone(),
    );

    pipeline.run_cycle().await.unwrap();
    assert_eq!(
        *sink.optimized.lock().await,
        vec!["issues".to_string(), "issue_metrics".to_string()]
    );
}
