use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::metrics::types::{ChangelogEventRecord, StatusMetric};
use crate::timeutil::{
    calculate_time_spent, parse_tracker_datetime, to_human_time, to_snake_case, BusinessCalendar,
    DATETIME_SINK_FORMAT,
};
use crate::tracker::types::{event_types, workflow_fields, ChangelogEvent, Issue};

/// Everything the changelog walk derives for one issue.
#[derive(Debug, Default)]
pub struct ChangelogOutcome {
    /// One entry per exited status, in first-exit order.
    pub status_metrics: Vec<StatusMetric>,
    /// Flattened changelog projection; empty unless export is enabled.
    pub changelog_records: Vec<ChangelogEventRecord>,
    pub was_moved: bool,
    pub moved_at: Option<String>,
    pub moved_by: Option<String>,
    /// Inferred completion time; `None` when no inference fired.
    pub closed_at: Option<String>,
}

/// Walks one issue's ordered changelog and accumulates per-status
/// time-in-state metrics.
///
/// A status contributes a metric only after the issue has transitioned out
/// of it; the current status stays open-ended and is never emitted.
pub struct MetricsEngine {
    closed_statuses: HashSet<String>,
    changelog_export_enabled: bool,
    target: FixedOffset,
    calendar: BusinessCalendar,
}

struct WalkContext {
    issue_key: String,
    queue: String,
    created_at_raw: Option<String>,
    /// Status snapshot taken before the walk begins; authoritative for the
    /// closed-status membership check on every transition.
    current_status: String,
    resolved_at: Option<String>,
}

impl MetricsEngine {
    pub fn new(
        closed_statuses: HashSet<String>,
        changelog_export_enabled: bool,
        target: FixedOffset,
        calendar: BusinessCalendar,
    ) -> Self {
        Self {
            closed_statuses,
            changelog_export_enabled,
            target,
            calendar,
        }
    }

    pub fn walk(&self, issue: &Issue) -> ChangelogOutcome {
        let context = WalkContext {
            issue_key: issue.key.clone(),
            queue: issue.queue.key.clone().unwrap_or_default(),
            created_at_raw: issue.created_at.clone(),
            current_status: to_snake_case(&issue.status.name_lower().unwrap_or_default()),
            resolved_at: match (&issue.resolution, &issue.resolved_at) {
                (Some(_), Some(raw)) => self.convert(raw),
                _ => None,
            },
        };

        let mut outcome = ChangelogOutcome::default();
        let mut accumulator: IndexMap<String, StatusMetric> = IndexMap::new();

        for event in &issue.changelog {
            if self.changelog_export_enabled {
                self.project_event(&context, event, &mut outcome.changelog_records);
            }
            match event.event_type.as_str() {
                event_types::ISSUE_MOVED => self.on_issue_moved(event, &mut outcome),
                event_types::ISSUE_WORKFLOW => {
                    self.on_issue_workflow(&context, event, &mut accumulator, &mut outcome)
                }
                _ => {} // not an interesting event
            }
        }

        outcome.status_metrics = accumulator.into_values().collect();
        debug!(
            issue = %context.issue_key,
            metrics = outcome.status_metrics.len(),
            "changelog walk finished"
        );
        outcome
    }

    fn on_issue_moved(&self, event: &ChangelogEvent, outcome: &mut ChangelogOutcome) {
        outcome.was_moved = true;
        outcome.moved_by = event.updated_by.email_lower();
        outcome.moved_at = event.updated_at.as_deref().and_then(|raw| self.convert(raw));
    }

    fn on_issue_workflow(
        &self,
        context: &WalkContext,
        event: &ChangelogEvent,
        accumulator: &mut IndexMap<String, StatusMetric>,
        outcome: &mut ChangelogOutcome,
    ) {
        // Pure status changes always carry the status assignment plus at
        // least one more field; anything shorter is tracker noise.
        if event.fields.len() < 2 {
            debug!(issue = %context.issue_key, "skipping short workflow event");
            return;
        }

        let status_change = &event.fields[0];
        if status_change.field_id() != Some(workflow_fields::STATUS) {
            debug!(
                issue = %context.issue_key,
                field = status_change.field_id().unwrap_or("?"),
                "first field-change is not a status transition, skipping"
            );
            return;
        }

        let (old_status, new_status) = match (
            status_change.from.scalarize(self.target),
            status_change.to.scalarize(self.target),
        ) {
            (Some(from), Some(to)) if !from.is_empty() && !to.is_empty() => (
                to_snake_case(&from.to_lowercase()),
                to_snake_case(&to.to_lowercase()),
            ),
            _ => {
                warn!(
                    issue = %context.issue_key,
                    "workflow event without resolvable status names, skipping"
                );
                return;
            }
        };

        let timestamps = &event.fields[1];
        let start_raw = timestamps
            .from
            .as_str()
            .or(context.created_at_raw.as_deref()); // transition out of the initial status
        let end_raw = timestamps.to.as_str();

        let (start, end) = match (
            start_raw.and_then(|raw| self.parse_utc(raw)),
            end_raw.and_then(|raw| self.parse_utc(raw)),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                warn!(
                    issue = %context.issue_key,
                    "corrupted changelog event with bad datetime range, \
                     perhaps the second field is not a status timestamp; skipping"
                );
                return;
            }
        };

        let duration = calculate_time_spent(start, end, false, &self.calendar);
        let busdays_duration = calculate_time_spent(start, end, true, &self.calendar);
        let end_rendered = self.render(end);

        // Completion-date inference for teams that don't use resolutions:
        // an explicit resolution always wins.
        if let Some(resolved_at) = &context.resolved_at {
            outcome.closed_at = Some(resolved_at.clone());
        } else if self.closed_statuses.contains(&new_status)
            && self.closed_statuses.contains(&context.current_status)
        {
            outcome.closed_at = Some(end_rendered.clone());
        }

        match accumulator.get_mut(&old_status) {
            Some(metric) => {
                metric.duration += duration;
                metric.busdays_duration += busdays_duration;
                metric.status_transitions_count += 1;
                metric.last_seen = end_rendered;
                metric.rerender();
            }
            None => {
                accumulator.insert(
                    old_status.clone(),
                    StatusMetric {
                        issue_key: context.issue_key.clone(),
                        status_name: old_status,
                        status_transitions_count: 1,
                        duration,
                        human_readable_duration: to_human_time(duration as i64, 2),
                        busdays_duration,
                        human_readable_busdays_duration: to_human_time(busdays_duration as i64, 2),
                        last_seen: end_rendered,
                    },
                );
            }
        }
    }

    /// Flatten one event into per-field-change records.
    fn project_event(
        &self,
        context: &WalkContext,
        event: &ChangelogEvent,
        records: &mut Vec<ChangelogEventRecord>,
    ) {
        let event_time = event
            .updated_at
            .as_deref()
            .and_then(|raw| self.convert(raw))
            .unwrap_or_default();
        let actor = event.updated_by.actor_identity();

        for change in &event.fields {
            let changed_field = change
                .field
                .as_ref()
                .and_then(|f| {
                    f.display
                        .clone()
                        .or_else(|| f.name.clone())
                        .or_else(|| f.id.clone())
                });
            let changed_from = change.from.scalarize(self.target);
            let changed_to = change.to.scalarize(self.target);

            let (changed_field, changed_from, changed_to) =
                match (changed_field, changed_from, changed_to) {
                    (Some(field), Some(from), Some(to)) => (field, from, to),
                    _ => {
                        // Dangling entity reference, likely deleted upstream.
                        warn!(
                            issue = %context.issue_key,
                            "unresolvable changelog field-change, skipping"
                        );
                        continue;
                    }
                };
            if changed_from.is_empty() && changed_to.is_empty() {
                debug!(issue = %context.issue_key, field = %changed_field, "empty field-change");
                continue;
            }

            records.push(ChangelogEventRecord {
                issue_key: context.issue_key.clone(),
                queue: context.queue.clone(),
                event_time: event_time.clone(),
                event_type: event.event_type.clone(),
                transport: event.transport.clone(),
                actor: actor.clone(),
                changed_field,
                changed_from,
                changed_to,
            });
        }
    }

    fn parse_utc(&self, raw: &str) -> Option<DateTime<Utc>> {
        parse_tracker_datetime(raw).map(|parsed| parsed.to_utc())
    }

    fn render(&self, instant: DateTime<Utc>) -> String {
        crate::timeutil::convert::format_sink(instant, self.target)
    }

    fn convert(&self, raw: &str) -> Option<String> {
        crate::timeutil::convert_datetime(raw, self.target, DATETIME_SINK_FORMAT)
    }
}
