// libs/appointment-cell/src/services/civil_time.rs
//
// Conversions between a clinic's wall-clock time and absolute instants.
//

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::models::AppointmentError;

const TIME_PATTERN: &str = r"^([01]\d|2[0-3]):[0-5]\d$";

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TIME_PATTERN).expect("HH:MM pattern is a valid regex"))
}

pub fn parse_timezone(timezone: &str) -> Result<Tz, AppointmentError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| AppointmentError::InvalidTimezone(timezone.to_string()))
}

/// Parse a strict 24-hour `HH:MM` string.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, AppointmentError> {
    if !time_pattern().is_match(value) {
        return Err(AppointmentError::InvalidTimeFormat(value.to_string()));
    }

    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| AppointmentError::InvalidTimeFormat(value.to_string()))
}

fn offset_seconds(tz: Tz, instant: DateTime<Utc>) -> i64 {
    i64::from(tz.offset_from_utc_datetime(&instant.naive_utc()).fix().local_minus_utc())
}

// Saturates at the ends of chrono's range instead of overflowing.
fn shift_back(instant: DateTime<Utc>, offset_seconds: i64) -> DateTime<Utc> {
    instant
        .checked_sub_signed(Duration::seconds(offset_seconds))
        .unwrap_or(instant)
}

/// Convert a local date and time in `tz` to a UTC instant.
///
/// The offset is taken at a first estimate and re-derived at the corrected
/// instant; DST shifts are whole hours, so two passes settle it. Wall-clock
/// times inside a spring-forward gap resolve to the pre-transition offset.
pub fn zoned_date_time_to_utc(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let wall_clock_as_utc = Utc.from_utc_datetime(&date.and_time(time));

    let mut offset = offset_seconds(tz, wall_clock_as_utc);
    let mut instant = shift_back(wall_clock_as_utc, offset);

    for _ in 0..2 {
        let corrected = offset_seconds(tz, instant);
        if corrected == offset {
            break;
        }
        offset = corrected;
        instant = shift_back(wall_clock_as_utc, offset);
    }

    instant
}

/// String-typed variant of [`zoned_date_time_to_utc`].
pub fn zoned_to_utc(date: NaiveDate, time: &str, timezone: &str) -> Result<DateTime<Utc>, AppointmentError> {
    let tz = parse_timezone(timezone)?;
    let time = parse_time_of_day(time)?;
    Ok(zoned_date_time_to_utc(date, time, tz))
}

/// `instant` moved by `minutes`, or `None` when either overflows chrono's range.
pub fn checked_add_minutes(instant: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    Duration::try_minutes(minutes).and_then(|delta| instant.checked_add_signed(delta))
}

pub fn checked_add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|delta| date.checked_add_signed(delta))
}

/// Sunday = 0 .. Saturday = 6 for the local calendar day, anchored at local midday.
pub fn weekday_index(date: NaiveDate, tz: Tz) -> u8 {
    let midday = NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default();
    let anchor = zoned_date_time_to_utc(date, midday, tz);
    anchor.with_timezone(&tz).weekday().num_days_from_sunday() as u8
}

pub fn format_time_in_zone(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%H:%M").to_string()
}

pub fn local_date_in_zone(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}
