use std::collections::HashSet;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

/// Working-time rules used for business-duration calculations.
///
/// Weekday and hour boundaries are interpreted in the calendar's own fixed
/// offset, so a 09:00 workday start means 09:00 local, wherever the team
/// sits. The holiday list is deployment-specific configuration; nothing here
/// hardcodes a national calendar.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    pub workdays: HashSet<Weekday>,
    pub hours_start: NaiveTime,
    pub hours_end: NaiveTime,
    pub holidays: HashSet<NaiveDate>,
    pub offset: FixedOffset,
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self {
            workdays: [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ]
            .into_iter()
            .collect(),
            hours_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            hours_end: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            holidays: HashSet::new(),
            offset: FixedOffset::east_opt(0).unwrap(),
        }
    }
}

impl BusinessCalendar {
    fn is_working_day(&self, date: NaiveDate) -> bool {
        self.workdays.contains(&date.weekday()) && !self.holidays.contains(&date)
    }
}

/// Seconds between two instants, optionally clipped to business time.
///
/// Argument order does not matter and the result is never negative. With
/// `busdays_only` the interval is intersected with the business-hours window
/// of every working, non-holiday day it touches.
pub fn calculate_time_spent(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    busdays_only: bool,
    calendar: &BusinessCalendar,
) -> u64 {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };

    if !busdays_only {
        return (end - start).num_seconds().unsigned_abs();
    }

    // Clip against the business window in the calendar's local time.
    let start = start.with_timezone(&calendar.offset).naive_local();
    let end = end.with_timezone(&calendar.offset).naive_local();

    let mut total: u64 = 0;
    let mut day = start.date();
    let last = end.date();

    while day <= last {
        if calendar.is_working_day(day) {
            let window_start = day.and_time(calendar.hours_start);
            let window_end = day.and_time(calendar.hours_end);
            let clip_start = start.max(window_start);
            let clip_end = end.min(window_end);
            if clip_end > clip_start {
                total += (clip_end - clip_start).num_seconds().unsigned_abs();
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    total
}
