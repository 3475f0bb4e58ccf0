use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::timeutil::{convert_datetime, DATETIME_SINK_FORMAT};

/// Changelog event type tags as reported by the tracker.
pub mod event_types {
    pub const ISSUE_WORKFLOW: &str = "IssueWorkflow";
    pub const ISSUE_MOVED: &str = "IssueMoved";
}

/// Field identifiers distinguishing workflow change kinds.
pub mod workflow_fields {
    pub const STATUS: &str = "status";
}

/// Reference to another tracker entity (user, queue, status, sprint...).
///
/// Every field may be absent; "field may be absent" semantics are resolved
/// here at the deserialization boundary instead of probing at call sites.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EntityRef {
    pub id: Option<String>,
    pub key: Option<String>,
    pub name: Option<String>,
    pub display: Option<String>,
    pub email: Option<String>,
}

impl EntityRef {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn email_lower(&self) -> Option<String> {
        self.email.as_deref().map(str::to_lowercase)
    }

    pub fn name_lower(&self) -> Option<String> {
        self.name.as_deref().map(str::to_lowercase)
    }

    /// Identity used for actor fields: email, then display name, then name.
    pub fn actor_identity(&self) -> String {
        self.email_lower()
            .or_else(|| self.display.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.key.is_none()
            && self.name.is_none()
            && self.display.is_none()
            && self.email.is_none()
    }
}

/// Closed union over the value shapes the tracker emits in changelog
/// field-changes. Each variant has exactly one scalarization rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ChangelogValue {
    Null,
    Scalar(String),
    Number(f64),
    Many(Vec<ChangelogValue>),
    Entity(EntityRef),
}

impl Default for ChangelogValue {
    fn default() -> Self {
        ChangelogValue::Null
    }
}

impl ChangelogValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ChangelogValue::Null)
    }

    /// Raw string payload, for values that are expected to be timestamps.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChangelogValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Flatten to the scalar string a sink column can hold.
    ///
    /// Entity references with nothing usable resolve to `None` (deleted
    /// entities); the caller skips those field-changes.
    pub fn scalarize(&self, target: FixedOffset) -> Option<String> {
        match self {
            ChangelogValue::Null => Some(String::new()),
            ChangelogValue::Number(n) => {
                if n.fract() == 0.0 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
            ChangelogValue::Scalar(s) => {
                if let Some(converted) = convert_datetime(s, target, DATETIME_SINK_FORMAT) {
                    Some(converted)
                } else if s.chars().count() > 100 {
                    Some("text too long, see history in UI".to_string())
                } else {
                    Some(s.clone())
                }
            }
            ChangelogValue::Many(items) => {
                let parts: Vec<String> =
                    items.iter().filter_map(|i| i.scalarize(target)).collect();
                Some(parts.join(", "))
            }
            ChangelogValue::Entity(entity) => {
                if entity.is_empty() {
                    return None;
                }
                entity
                    .key
                    .clone()
                    .or_else(|| entity.email_lower())
                    .or_else(|| entity.display.clone())
                    .or_else(|| entity.name.clone())
                    .or_else(|| entity.id.clone())
            }
        }
    }
}

/// One field mutation inside a changelog event.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldChange {
    pub field: Option<EntityRef>,
    pub from: ChangelogValue,
    pub to: ChangelogValue,
}

impl FieldChange {
    /// Identifier of the changed field, e.g. `status` or `resolution`.
    pub fn field_id(&self) -> Option<&str> {
        self.field.as_ref()?.id.as_deref()
    }
}

/// One recorded mutation of an issue, with an ordered field-change list.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangelogEvent {
    pub updated_at: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub transport: String,
    pub updated_by: EntityRef,
    pub fields: Vec<FieldChange>,
}

/// Issue snapshot as fetched from the tracker, changelog attached.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub queue: EntityRef,
    #[serde(rename = "type")]
    pub issue_type: EntityRef,
    pub priority: EntityRef,
    pub assignee: Option<EntityRef>,
    pub created_by: Option<EntityRef>,
    pub qa_engineer: Option<EntityRef>,
    pub status: EntityRef,
    pub resolution: Option<EntityRef>,
    pub tags: Vec<String>,
    pub components: Vec<EntityRef>,
    pub sprint: Vec<EntityRef>,
    pub project: Option<EntityRef>,
    pub parent: Option<EntityRef>,
    pub epic: Option<EntityRef>,
    pub story_points: Option<f64>,
    pub aliases: Vec<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub resolved_at: Option<String>,
    pub deadline: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,

    /// Fetched separately; the search endpoint does not embed history.
    #[serde(skip)]
    pub changelog: Vec<ChangelogEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn changelog_value_deserializes_all_shapes() {
        let value: ChangelogValue = serde_json::from_str("null").unwrap();
        assert!(value.is_null());

        let value: ChangelogValue = serde_json::from_str("\"Open\"").unwrap();
        assert_eq!(value.as_str(), Some("Open"));

        let value: ChangelogValue = serde_json::from_str("3.5").unwrap();
        assert_eq!(value, ChangelogValue::Number(3.5));

        let value: ChangelogValue =
            serde_json::from_str(r#"[{"name": "backend"}, {"name": "api"}]"#).unwrap();
        assert_eq!(value.scalarize(utc()).unwrap(), "backend, api");

        let value: ChangelogValue =
            serde_json::from_str(r#"{"id": "42", "display": "John Doe"}"#).unwrap();
        assert_eq!(value.scalarize(utc()).unwrap(), "John Doe");
    }

    #[test]
    fn scalarize_prefers_key_then_email() {
        let entity = ChangelogValue::Entity(EntityRef {
            key: Some("PROJ-1".to_string()),
            email: Some("User@Example.com".to_string()),
            ..Default::default()
        });
        assert_eq!(entity.scalarize(utc()).unwrap(), "PROJ-1");

        let entity = ChangelogValue::Entity(EntityRef {
            email: Some("User@Example.com".to_string()),
            ..Default::default()
        });
        assert_eq!(entity.scalarize(utc()).unwrap(), "user@example.com");
    }

    #[test]
    fn scalarize_empty_entity_is_none() {
        assert!(ChangelogValue::Entity(EntityRef::default())
            .scalarize(utc())
            .is_none());
    }

    #[test]
    fn scalarize_converts_timestamps() {
        let value = ChangelogValue::Scalar("2023-10-16T10:00:00.000+0300".to_string());
        assert_eq!(value.scalarize(utc()).unwrap(), "2023-10-16T07:00:00.000");
    }

    #[test]
    fn scalarize_truncates_long_text() {
        let value = ChangelogValue::Scalar("x".repeat(200));
        assert_eq!(
            value.scalarize(utc()).unwrap(),
            "text too long, see history in UI"
        );
    }

    #[test]
    fn scalarize_formats_numbers() {
        assert_eq!(ChangelogValue::Number(5.0).scalarize(utc()).unwrap(), "5");
        assert_eq!(ChangelogValue::Number(2.5).scalarize(utc()).unwrap(), "2.5");
    }

    #[test]
    fn issue_deserializes_from_api_shape() {
        let issue: Issue = serde_json::from_str(
            r#"{
                "key": "TEST-1",
                "summary": "Fix login",
                "queue": {"key": "TEST"},
                "type": {"name": "Bug"},
                "status": {"name": "Open"},
                "createdAt": "2023-10-01T09:00:00.000+0000",
                "updatedAt": "2023-10-16T10:00:00.000+0000",
                "storyPoints": 3
            }"#,
        )
        .unwrap();
        assert_eq!(issue.key, "TEST-1");
        assert_eq!(issue.queue.key.as_deref(), Some("TEST"));
        assert_eq!(issue.story_points, Some(3.0));
        assert!(issue.resolution.is_none());
        assert!(issue.tags.is_empty());
    }
}
