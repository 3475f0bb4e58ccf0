use std::collections::HashSet;
use std::path::Path;

use chrono::{FixedOffset, NaiveDate, NaiveTime, Weekday};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{ExporterError, Result};
use crate::timeutil::{from_human_time, BusinessCalendar};

/// Main configuration for the exporter.
///
/// Loaded from defaults, an optional `tracker-etl.toml` file and
/// `EXPORTER_`-prefixed environment variables (nested fields separated
/// with `__`, e.g. `EXPORTER_TRACKER__TOKEN`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExporterConfig {
    pub tracker: TrackerConfig,
    pub clickhouse: ClickhouseConfig,
    pub state: StateConfig,

    /// Incremental mode: remember the last processed update time per job.
    pub stateful: bool,
    /// Lookback window used when no watermark is stored yet.
    pub stateful_initial_range: String,
    /// Export the flattened changelog projection alongside metrics.
    pub changelog_export_enabled: bool,
    pub loglevel: String,

    /// Working weekdays, `0` = Monday .. `6` = Sunday.
    pub workdays: String,
    /// Business window, `HH:MM`.
    pub business_hours_start: String,
    pub business_hours_end: String,
    /// Comma-separated ISO dates excluded from business time.
    pub holidays: String,

    pub closed_issue_statuses: String,
    pub not_nullable_fields: String,

    pub etl_interval_minutes: u64,
    /// Fire-and-forget mode: log cycle failures instead of raising them.
    pub ignore_exceptions: bool,
    /// Directory for per-job lock files.
    pub lock_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub token: Option<String>,
    pub org_id: Option<String>,
    pub cloud_org_id: Option<String>,
    pub base_url: String,
    /// Fixed offset for canonical date rendering, e.g. `+00:00` or `+03:00`.
    pub timezone_offset: String,
    pub timeout_seconds: u64,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Explicit tracker query language expression; wins over other filters.
    pub query: Option<String>,
    /// Human-readable lookback for ranged mode, e.g. `2h`.
    pub range: Option<String>,
    /// Comma-separated queue keys.
    pub queues: Option<String>,
    pub per_page_limit: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClickhouseConfig {
    pub enable_upload: bool,
    pub host: String,
    pub port: u16,
    pub proto: String,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
    pub issues_table: String,
    pub issue_metrics_table: String,
    pub issues_changelog_table: String,
    pub auto_deduplicate: bool,
    pub backoff_base_delay_ms: u64,
    pub backoff_max_delay_ms: u64,
    pub backoff_max_attempts: u32,
    pub backoff_jitter: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub file_path: String,
    /// Job name the watermark is stored under.
    pub key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            token: None,
            org_id: None,
            cloud_org_id: None,
            base_url: "https://api.tracker.yandex.net".to_string(),
            timezone_offset: "+00:00".to_string(),
            timeout_seconds: 10,
            search: SearchConfig::default(),
        }
    }
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            enable_upload: true,
            host: "localhost".to_string(),
            port: 8123,
            proto: "http".to_string(),
            username: "default".to_string(),
            password: None,
            database: "agile".to_string(),
            issues_table: "issues".to_string(),
            issue_metrics_table: "issue_metrics".to_string(),
            issues_changelog_table: "issues_changelog".to_string(),
            auto_deduplicate: true,
            backoff_base_delay_ms: 500,
            backoff_max_delay_ms: 30_000,
            backoff_max_attempts: 3,
            backoff_jitter: true,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Local,
            file_path: "state.json".to_string(),
            key: "tracker_etl_default".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: None,
            range: None,
            queues: None,
            per_page_limit: 100,
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            clickhouse: ClickhouseConfig::default(),
            state: StateConfig::default(),
            stateful: false,
            stateful_initial_range: "1w".to_string(),
            changelog_export_enabled: false,
            loglevel: "info".to_string(),
            workdays: "0,1,2,3,4".to_string(),
            business_hours_start: "09:00".to_string(),
            business_hours_end: "22:00".to_string(),
            holidays: String::new(),
            closed_issue_statuses: "closed,rejected,resolved,cancelled,released".to_string(),
            not_nullable_fields: [
                "created_at",
                "resolved_at",
                "closed_at",
                "updated_at",
                "released_at",
                "deadline",
                "start_date",
                "end_date",
                "moved_at",
            ]
            .join(","),
            etl_interval_minutes: 30,
            ignore_exceptions: true,
            lock_dir: ".tracker-etl".to_string(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration with precedence: defaults, then `tracker-etl.toml`,
    /// then environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();

        if Path::new("tracker-etl.toml").exists() {
            builder = builder.add_source(File::with_name("tracker-etl"));
        }

        builder = builder.add_source(
            Environment::with_prefix("EXPORTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ExporterError::Configuration(e.to_string()))?;
        let loaded: ExporterConfig = config
            .try_deserialize()
            .map_err(|e| ExporterError::Configuration(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load a `.env` file if present.
    pub fn load_env_file(path: Option<&str>) -> Result<()> {
        match path {
            Some(p) => {
                dotenvy::from_path(p)
                    .map_err(|e| ExporterError::Configuration(format!("env file {p}: {e}")))?;
            }
            None => {
                if Path::new(".env").exists() {
                    dotenvy::dotenv()
                        .map_err(|e| ExporterError::Configuration(format!(".env: {e}")))?;
                    tracing::info!("Loaded environment variables from .env file");
                }
            }
        }
        Ok(())
    }

    /// Eager cross-field validation; every misconfiguration is reported
    /// before any network access happens.
    pub fn validate(&self) -> Result<()> {
        if self.clickhouse.enable_upload || self.has_any_search_input() {
            if self.tracker.token.as_deref().map_or(true, str::is_empty) {
                return Err(ExporterError::Configuration(
                    "tracker token is required (EXPORTER_TRACKER__TOKEN)".to_string(),
                ));
            }
            if self.tracker.org_id.is_none() && self.tracker.cloud_org_id.is_none() {
                return Err(ExporterError::Configuration(
                    "one of tracker org_id or cloud_org_id is required".to_string(),
                ));
            }
            if self.tracker.org_id.is_some() && self.tracker.cloud_org_id.is_some() {
                return Err(ExporterError::Configuration(
                    "pass only one of tracker org_id or cloud_org_id".to_string(),
                ));
            }
        }

        if !matches!(self.clickhouse.proto.as_str(), "http" | "https") {
            return Err(ExporterError::Configuration(format!(
                "invalid clickhouse proto: {}",
                self.clickhouse.proto
            )));
        }

        if self.stateful && self.state.backend == StateBackend::Local
            && self.state.file_path.trim().is_empty()
        {
            return Err(ExporterError::Configuration(
                "state file path must not be empty for the local backend".to_string(),
            ));
        }

        from_human_time(&self.stateful_initial_range).map_err(|_| {
            ExporterError::Configuration(format!(
                "invalid stateful_initial_range: {}",
                self.stateful_initial_range
            ))
        })?;
        if let Some(range) = &self.tracker.search.range {
            from_human_time(range).map_err(|_| {
                ExporterError::Configuration(format!("invalid search range: {range}"))
            })?;
        }

        self.tracker_offset()?;
        self.business_calendar()?;
        Ok(())
    }

    fn has_any_search_input(&self) -> bool {
        self.stateful
            || self.tracker.search.query.is_some()
            || self.tracker.search.queues.is_some()
            || self.tracker.search.range.is_some()
    }

    pub fn closed_status_set(&self) -> HashSet<String> {
        split_csv(&self.closed_issue_statuses)
    }

    pub fn not_nullable_set(&self) -> HashSet<String> {
        split_csv(&self.not_nullable_fields)
    }

    /// Queue filter normalized to the `A, B` form the query language expects.
    pub fn queues_filter(&self) -> Option<String> {
        let raw = self.tracker.search.queues.as_deref()?;
        let queues: Vec<String> = raw
            .split(',')
            .map(|q| q.trim().to_uppercase())
            .filter(|q| !q.is_empty())
            .collect();
        if queues.is_empty() {
            None
        } else {
            Some(queues.join(", "))
        }
    }

    pub fn tracker_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.tracker.timezone_offset).ok_or_else(|| {
            ExporterError::Configuration(format!(
                "invalid timezone offset: {}",
                self.tracker.timezone_offset
            ))
        })
    }

    pub fn business_calendar(&self) -> Result<BusinessCalendar> {
        let mut workdays = HashSet::new();
        for part in split_csv(&self.workdays) {
            let index: u8 = part.parse().map_err(|_| {
                ExporterError::Configuration(format!("invalid workday index: {part}"))
            })?;
            let weekday = match index {
                0 => Weekday::Mon,
                1 => Weekday::Tue,
                2 => Weekday::Wed,
                3 => Weekday::Thu,
                4 => Weekday::Fri,
                5 => Weekday::Sat,
                6 => Weekday::Sun,
                _ => {
                    return Err(ExporterError::Configuration(format!(
                        "workday index out of range: {index}"
                    )))
                }
            };
            workdays.insert(weekday);
        }

        let hours_start = parse_hhmm(&self.business_hours_start).ok_or_else(|| {
            ExporterError::Configuration(format!(
                "invalid business_hours_start: {}",
                self.business_hours_start
            ))
        })?;
        let hours_end = parse_hhmm(&self.business_hours_end).ok_or_else(|| {
            ExporterError::Configuration(format!(
                "invalid business_hours_end: {}",
                self.business_hours_end
            ))
        })?;
        if hours_end <= hours_start {
            return Err(ExporterError::Configuration(
                "business hours end must be after start".to_string(),
            ));
        }

        let mut holidays = HashSet::new();
        for part in split_csv(&self.holidays) {
            let date = NaiveDate::parse_from_str(&part, "%Y-%m-%d").map_err(|_| {
                ExporterError::Configuration(format!("invalid holiday date: {part}"))
            })?;
            holidays.insert(date);
        }

        Ok(BusinessCalendar {
            workdays,
            hours_start,
            hours_end,
            holidays,
            offset: self.tracker_offset()?,
        })
    }
}

fn split_csv(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .ok()
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.split_at_checked(1)? {
        ("+", rest) => (1i32, rest),
        ("-", rest) => (-1i32, rest),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
