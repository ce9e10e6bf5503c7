use chrono::{DateTime, Datelike, Timelike, Utc};

/// Calendar-aligned decomposition of one event timestamp, interpreted as
/// UTC. Weekday uses ISO numbering, 1 = Monday through 7 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarInstant {
    pub start_time_ms: i64,
    pub hour: i32,
    pub day: i32,
    pub week: i32,
    pub month: i32,
    pub year: i32,
    pub weekday: i32,
}

/// Decomposes a raw millisecond epoch timestamp into its calendar parts.
/// Pure and deterministic; returns None only for timestamps outside the
/// range chrono can represent.
pub fn decompose(ms: i64) -> Option<CalendarInstant> {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(ms)?;
    Some(CalendarInstant {
        start_time_ms: ms,
        hour: dt.hour() as i32,
        day: dt.day() as i32,
        week: dt.iso_week().week() as i32,
        month: dt.month() as i32,
        year: dt.year(),
        weekday: dt.weekday().number_from_monday() as i32,
    })
}
