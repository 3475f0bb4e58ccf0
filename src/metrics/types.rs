use serde::{Deserialize, Serialize};

use crate::sink::Row;
use crate::timeutil::to_human_time;

/// Time spent by one issue in one exited workflow status.
///
/// Created on the first transition out of a status, accumulated on every
/// later transition out of the same status. The issue's current status never
/// produces a metric because nothing has closed it out yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMetric {
    pub issue_key: String,
    pub status_name: String,
    pub status_transitions_count: u32,
    /// Calendar seconds.
    pub duration: u64,
    pub human_readable_duration: String,
    /// Work-hours seconds, holiday aware.
    pub busdays_duration: u64,
    pub human_readable_busdays_duration: String,
    /// End of the most recent transition out of this status.
    pub last_seen: String,
}

impl StatusMetric {
    /// Refresh the human renderings after accumulating raw seconds.
    pub fn rerender(&mut self) {
        self.human_readable_duration = to_human_time(self.duration as i64, 2);
        self.human_readable_busdays_duration = to_human_time(self.busdays_duration as i64, 2);
    }

    pub fn to_row(&self) -> Row {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Row::new(),
        }
    }
}

/// Flat projection of one field-change inside one changelog event.
/// Everything is scalarized; the sink never sees nested structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEventRecord {
    pub issue_key: String,
    pub queue: String,
    pub event_time: String,
    pub event_type: String,
    pub transport: String,
    pub actor: String,
    pub changed_field: String,
    pub changed_from: String,
    pub changed_to: String,
}

impl ChangelogEventRecord {
    pub fn to_row(&self) -> Row {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Row::new(),
        }
    }
}
