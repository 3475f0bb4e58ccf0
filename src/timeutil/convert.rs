use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

/// Canonical sink format, millisecond precision.
pub const DATETIME_SINK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
/// Format used inside tracker search queries and for watermark values.
pub const DATETIME_QUERY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TRACKER_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
];
const TRACKER_NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Parse a tracker timestamp. Zone-less values are treated as UTC.
pub fn parse_tracker_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    for format in TRACKER_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed);
        }
    }
    for format in TRACKER_NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc().fixed_offset());
        }
    }
    None
}

/// Convert a raw tracker timestamp into the target zone and render it with
/// the given format. Returns `None` for unparseable input.
pub fn convert_datetime(raw: &str, target: FixedOffset, format: &str) -> Option<String> {
    let parsed = parse_tracker_datetime(raw)?;
    Some(parsed.with_timezone(&target).format(format).to_string())
}

/// Render an already-parsed instant in the canonical sink format.
pub fn format_sink(instant: DateTime<Utc>, target: FixedOffset) -> String {
    instant
        .with_timezone(&target)
        .format(DATETIME_SINK_FORMAT)
        .to_string()
}
