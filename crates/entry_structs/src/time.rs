//! Minute arithmetic on stated and actual arrival instants.

use chrono::{DateTime, Datelike, FixedOffset, ParseError, TimeDelta, Timelike};

/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// English day names indexed by `day_of_week` (0 = Sunday).
pub const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Rounds to the nearest integer with halves going up (`-1.5` becomes `-1`).
#[must_use]
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Whole minutes between the stated time and the actual arrival.
///
/// Negative when Adel was early.
#[must_use]
pub fn delay_minutes(world_time: &DateTime<FixedOffset>, adel_time: &DateTime<FixedOffset>) -> i64 {
    let millis = adel_time
        .signed_duration_since(*world_time)
        .num_milliseconds();
    round_half_up(millis as f64 / MILLIS_PER_MINUTE as f64)
}

/// Local hour (0-23) in the offset the instant was stated in.
#[must_use]
pub fn hour_of_day(at: &DateTime<FixedOffset>) -> u32 {
    at.hour()
}

/// Day of week with 0 = Sunday through 6 = Saturday.
#[must_use]
pub fn day_of_week(at: &DateTime<FixedOffset>) -> u32 {
    at.weekday().num_days_from_sunday()
}

#[must_use]
pub fn minutes_since_midnight(at: &DateTime<FixedOffset>) -> u32 {
    at.hour() * 60 + at.minute()
}

/// Saturday and Sunday.
#[must_use]
pub const fn is_weekend_day(day_of_week: u32) -> bool {
    matches!(day_of_week, 0 | 6)
}

/// Returns the English name for a `day_of_week` value.
#[must_use]
pub fn day_name(day_of_week: u32) -> &'static str {
    DAY_NAMES
        .get(day_of_week as usize)
        .copied()
        .unwrap_or("Unknown")
}

/// Shifts an instant by whole minutes, `None` if the result is out of range.
#[must_use]
pub fn add_minutes(at: &DateTime<FixedOffset>, minutes: i64) -> Option<DateTime<FixedOffset>> {
    TimeDelta::try_minutes(minutes).and_then(|delta| at.checked_add_signed(delta))
}

/// Parses an RFC 3339 timestamp, keeping its UTC offset.
///
/// # Errors
///
/// Returns an error if the string is not valid RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    DateTime::parse_from_rfc3339(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<FixedOffset> {
        parse_timestamp(value).expect("valid timestamp")
    }

    #[test]
    fn test_delay_minutes_rounds_half_up() {
        let world = at("2024-03-04T09:00:00Z");

        assert_eq!(delay_minutes(&world, &at("2024-03-04T09:17:00Z")), 17);
        assert_eq!(delay_minutes(&world, &at("2024-03-04T09:00:29Z")), 0);
        assert_eq!(delay_minutes(&world, &at("2024-03-04T09:00:30Z")), 1);
        assert_eq!(delay_minutes(&world, &at("2024-03-04T08:58:30Z")), -1);
        assert_eq!(delay_minutes(&world, &at("2024-03-04T08:58:29Z")), -2);
    }

    #[test]
    fn test_delay_ignores_offset_representation() {
        let world = at("2024-03-04T09:00:00-04:00");
        let adel = at("2024-03-04T13:45:00Z");
        assert_eq!(delay_minutes(&world, &adel), 45);
    }

    #[test]
    fn test_calendar_fields_use_local_offset() {
        // 2024-03-03 is a Sunday.
        let stated = at("2024-03-03T23:30:00-04:00");
        assert_eq!(hour_of_day(&stated), 23);
        assert_eq!(day_of_week(&stated), 0);
        assert_eq!(minutes_since_midnight(&stated), 23 * 60 + 30);
        assert!(is_weekend_day(day_of_week(&stated)));
        assert_eq!(day_name(day_of_week(&stated)), "Sunday");
    }

    #[test]
    fn test_add_minutes() {
        let world = at("2024-03-04T09:00:00Z");
        assert_eq!(add_minutes(&world, 30), Some(at("2024-03-04T09:30:00Z")));
        assert_eq!(add_minutes(&world, -5), Some(at("2024-03-04T08:55:00Z")));
        assert_eq!(add_minutes(&world, i64::MAX), None);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("tomorrow at nine").is_err());
        assert!(parse_timestamp("2024-13-01T00:00:00Z").is_err());
    }
}
