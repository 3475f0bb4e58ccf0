use std::collections::HashSet;

use chrono::FixedOffset;
use serde::Serialize;

use crate::config::ExporterConfig;
use crate::error::{ExporterError, Result};
use crate::metrics::MetricsEngine;
use crate::sink::Row;
use crate::timeutil::{convert_datetime, string_normalize, to_snake_case, DATETIME_SINK_FORMAT};
use crate::tracker::types::{EntityRef, Issue};

/// Flat, sink-ready projection of one issue snapshot.
///
/// Statuses and enum-like names are snake_cased so dashboards can group on
/// them without locale-dependent casing surprises; people are reduced to a
/// single identity string.
#[derive(Debug, Serialize)]
pub struct NormalizedIssueRecord {
    pub queue: String,
    pub issue_key: String,
    pub title: String,
    pub issue_type: String,
    pub priority: String,
    pub assignee: String,
    pub author: String,
    pub qa_engineer: String,
    pub status: String,
    pub resolution: String,
    pub tags: Vec<String>,
    pub components: Vec<String>,
    pub sprints: Vec<String>,
    pub aliases: Vec<String>,
    pub parent_issue_key: Option<String>,
    pub epic_issue_key: Option<String>,
    pub project: Option<String>,
    pub story_points: f64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
    pub deadline: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_resolved: bool,
    pub is_closed: bool,
    pub is_subtask: bool,
    pub was_moved: bool,
    pub moved_at: Option<String>,
    pub moved_by: Option<String>,
}

/// Everything one issue contributes to an export batch.
#[derive(Debug)]
pub struct TransformedIssue {
    pub issue_row: Row,
    pub metric_rows: Vec<Row>,
    pub changelog_rows: Vec<Row>,
}

impl TransformedIssue {
    pub fn metrics_count(&self) -> usize {
        self.metric_rows.len()
    }
}

/// Turns raw tracker issues into sink rows, delegating the changelog walk
/// to [`MetricsEngine`].
pub struct IssueTransformer {
    engine: MetricsEngine,
    closed_statuses: HashSet<String>,
    not_nullable: HashSet<String>,
    target: FixedOffset,
}

impl IssueTransformer {
    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let target = config.tracker_offset()?;
        let closed_statuses = config.closed_status_set();
        let engine = MetricsEngine::new(
            closed_statuses.clone(),
            config.changelog_export_enabled,
            target,
            config.business_calendar()?,
        );
        Ok(Self {
            engine,
            closed_statuses,
            not_nullable: config.not_nullable_set(),
            target,
        })
    }

    pub fn transform(&self, issue: &Issue) -> Result<TransformedIssue> {
        let outcome = self.engine.walk(issue);

        let status = snake(&issue.status);
        let is_resolved = issue.resolution.is_some();
        let is_closed = is_resolved || self.closed_statuses.contains(&status);
        let record = NormalizedIssueRecord {
            queue: issue.queue.key.clone().unwrap_or_default(),
            issue_key: issue.key.clone(),
            title: string_normalize(&issue.summary),
            issue_type: snake(&issue.issue_type),
            // Priority is presentation text, not an enum key.
            priority: issue.priority.name_lower().unwrap_or_default(),
            assignee: identity(issue.assignee.as_ref()),
            author: identity(issue.created_by.as_ref()),
            qa_engineer: identity(issue.qa_engineer.as_ref()),
            status,
            resolution: issue.resolution.as_ref().map(snake).unwrap_or_default(),
            tags: issue.tags.clone(),
            components: names_of(&issue.components),
            sprints: names_of(&issue.sprint),
            aliases: issue.aliases.clone(),
            parent_issue_key: issue.parent.as_ref().and_then(|p| p.key.clone()),
            epic_issue_key: issue.epic.as_ref().and_then(|e| e.key.clone()),
            project: issue
                .project
                .as_ref()
                .and_then(|p| p.display.clone().or_else(|| p.name.clone())),
            story_points: issue.story_points.unwrap_or(0.0),
            created_at: self.convert(issue.created_at.as_deref()),
            updated_at: self.convert(issue.updated_at.as_deref()),
            resolved_at: self.convert(issue.resolved_at.as_deref()),
            // A resolution closes the issue even when no workflow transition
            // confirmed it.
            closed_at: outcome.closed_at.clone().or_else(|| {
                if is_resolved {
                    self.convert(issue.resolved_at.as_deref())
                } else {
                    None
                }
            }),
            deadline: self.convert(issue.deadline.as_deref()),
            start_date: self.convert(issue.start.as_deref()),
            end_date: self.convert(issue.end.as_deref()),
            is_resolved,
            is_closed,
            is_subtask: issue.parent.is_some(),
            was_moved: outcome.was_moved,
            moved_at: outcome.moved_at.clone(),
            moved_by: outcome.moved_by.clone(),
        };

        let issue_row = match serde_json::to_value(&record)? {
            serde_json::Value::Object(map) => self.apply_null_policy(map),
            _ => {
                return Err(ExporterError::Extraction(format!(
                    "issue {} did not serialize to an object",
                    issue.key
                )))
            }
        };

        Ok(TransformedIssue {
            issue_row,
            metric_rows: outcome.status_metrics.iter().map(|m| m.to_row()).collect(),
            changelog_rows: outcome
                .changelog_records
                .iter()
                .map(|r| r.to_row())
                .collect(),
        })
    }

    /// Nullable date columns stay absent so the sink keeps its own defaults;
    /// every other null becomes an empty string.
    fn apply_null_policy(&self, mut row: Row) -> Row {
        let absent: Vec<String> = row
            .iter()
            .filter(|(key, value)| value.is_null() && self.not_nullable.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in absent {
            row.remove(&key);
        }
        for value in row.values_mut() {
            if value.is_null() {
                *value = serde_json::Value::String(String::new());
            }
        }
        row
    }

    fn convert(&self, raw: Option<&str>) -> Option<String> {
        convert_datetime(raw?, self.target, DATETIME_SINK_FORMAT)
    }
}

fn snake(entity: &EntityRef) -> String {
    to_snake_case(&entity.name_lower().unwrap_or_default())
}

// People columns hold emails only; display-name fallbacks are reserved for
// the changelog actor.
fn identity(entity: Option<&EntityRef>) -> String {
    entity.and_then(EntityRef::email_lower).unwrap_or_default()
}

fn names_of(entities: &[EntityRef]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|e| e.display.clone().or_else(|| e.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> IssueTransformer {
        IssueTransformer::from_config(&ExporterConfig::default()).unwrap()
    }

    fn issue() -> Issue {
        serde_json::from_str(
            r#"{
                "key": "TEST-1",
                "summary": "Fix login",
                "queue": {"key": "TEST"},
                "type": {"name": "Bug"},
                "priority": {"name": "Critical"},
                "status": {"name": "In Progress"},
                "assignee": {"email": "Dev@Example.com", "display": "Dev"},
                "createdAt": "2023-10-01T09:00:00.000+0000",
                "updatedAt": "2023-10-16T10:00:00.000+0000",
                "tags": ["auth"],
                "storyPoints": 3
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn normalizes_names_and_people() {
        let row = transformer().transform(&issue()).unwrap().issue_row;
        assert_eq!(row["issue_key"], "TEST-1");
        assert_eq!(row["issue_type"], "bug");
        assert_eq!(row["priority"], "critical");
        assert_eq!(row["status"], "in_progress");
        assert_eq!(row["assignee"], "dev@example.com");
        assert_eq!(row["created_at"], "2023-10-01T09:00:00.000");
        assert_eq!(row["story_points"], 3.0);
        assert_eq!(row["is_closed"], false);
        assert_eq!(row["was_moved"], false);
    }

    #[test]
    fn priority_keeps_its_spaces() {
        let mut source = issue();
        source.priority = EntityRef::named("Very High");
        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["priority"], "very high");
    }

    #[test]
    fn null_dates_are_absent_other_nulls_become_empty() {
        let row = transformer().transform(&issue()).unwrap().issue_row;
        // No resolution on this issue: the date column is simply absent.
        assert!(!row.contains_key("resolved_at"));
        assert!(!row.contains_key("closed_at"));
        assert!(!row.contains_key("deadline"));
        // Non-date nullables are rendered as empty strings.
        assert_eq!(row["parent_issue_key"], "");
        assert_eq!(row["epic_issue_key"], "");
        assert_eq!(row["qa_engineer"], "");
    }

    #[test]
    fn resolution_marks_issue_resolved_and_closed() {
        let mut source = issue();
        source.resolution = Some(EntityRef::named("Fixed"));
        source.resolved_at = Some("2023-10-16T12:00:00.000+0000".to_string());

        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["resolution"], "fixed");
        assert_eq!(row["is_resolved"], true);
        assert_eq!(row["is_closed"], true);
        assert_eq!(row["resolved_at"], "2023-10-16T12:00:00.000");
        // No workflow transition needed: the resolution alone closes it.
        assert_eq!(row["closed_at"], "2023-10-16T12:00:00.000");
    }

    #[test]
    fn resolution_without_timestamp_still_resolves() {
        let mut source = issue();
        source.resolution = Some(EntityRef::named("Won't Fix"));

        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["is_resolved"], true);
        assert_eq!(row["is_closed"], true);
        // No timestamp: the date columns simply stay absent.
        assert!(!row.contains_key("resolved_at"));
        assert!(!row.contains_key("closed_at"));
    }

    #[test]
    fn closed_status_without_resolution_is_closed() {
        let mut source = issue();
        source.status = EntityRef::named("Closed");
        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["is_resolved"], false);
        assert_eq!(row["is_closed"], true);
    }

    #[test]
    fn people_without_email_resolve_to_empty() {
        let mut source = issue();
        source.assignee = Some(EntityRef {
            display: Some("Dev Without Email".to_string()),
            ..Default::default()
        });
        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["assignee"], "");
    }

    #[test]
    fn parent_makes_a_subtask() {
        let mut source = issue();
        source.parent = Some(EntityRef {
            key: Some("TEST-0".to_string()),
            ..Default::default()
        });
        let row = transformer().transform(&source).unwrap().issue_row;
        assert_eq!(row["is_subtask"], true);
        assert_eq!(row["parent_issue_key"], "TEST-0");
    }

    #[test]
    fn no_changelog_means_no_metric_rows() {
        let transformed = transformer().transform(&issue()).unwrap();
        assert_eq!(transformed.metrics_count(), 0);
        assert!(transformed.changelog_rows.is_empty());
    }
}
