// libs/appointment-cell/src/services/slots.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::debug;

use crate::models::{Appointment, AppointmentError, AvailableSlot, BookingRules, OperatingHoursRow};
use crate::services::civil_time::{
    checked_add_days, checked_add_minutes, format_time_in_zone, local_date_in_zone, parse_time_of_day,
    parse_timezone, weekday_index, zoned_date_time_to_utc,
};

/// Generates bookable slots for one clinic day.
///
/// Pure: the result depends only on the arguments, so it is safe to call
/// repeatedly and concurrently.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlotEngine;

impl SlotEngine {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn generate_slots(
        &self,
        date: NaiveDate,
        timezone: &str,
        service_duration_minutes: i64,
        operating_hours: &[OperatingHoursRow],
        booking_rules: &BookingRules,
        now: DateTime<Utc>,
        existing_appointments: &[Appointment],
    ) -> Result<Vec<AvailableSlot>, AppointmentError> {
        let tz = parse_timezone(timezone)?;

        if service_duration_minutes <= 0 || booking_rules.slot_step_minutes <= 0 {
            debug!(
                "Non-positive duration ({}) or step ({}), no slots",
                service_duration_minutes, booking_rules.slot_step_minutes
            );
            return Ok(vec![]);
        }

        // Step 1: operating hours for the local weekday
        let day_of_week = weekday_index(date, tz);
        let row = match operating_hours.iter().find(|row| row.day_of_week == day_of_week) {
            Some(row) if !row.is_closed => row,
            _ => {
                debug!("Clinic closed on {} (weekday {})", date, day_of_week);
                return Ok(vec![]);
            }
        };

        // Step 2: open/close instants
        let open_at = zoned_date_time_to_utc(date, parse_time_of_day(&row.open_time)?, tz);
        let close_at = zoned_date_time_to_utc(date, parse_time_of_day(&row.close_time)?, tz);
        if close_at <= open_at {
            return Ok(vec![]);
        }

        // Step 3: advance window, compared as local calendar days
        match checked_add_days(local_date_in_zone(now, tz), booking_rules.max_advance_days) {
            Some(last_bookable_day) if date > last_bookable_day => {
                debug!("{} is beyond the advance window ending {}", date, last_bookable_day);
                return Ok(vec![]);
            }
            None if booking_rules.max_advance_days < 0 => return Ok(vec![]),
            _ => {}
        }

        // Step 4: walk candidates
        let (Some(duration), Some(step)) = (
            Duration::try_minutes(service_duration_minutes),
            Duration::try_minutes(booking_rules.slot_step_minutes),
        ) else {
            debug!("Duration or step longer than any clinic day, no slots");
            return Ok(vec![]);
        };
        let earliest_start = match checked_add_minutes(now, booking_rules.lead_time_minutes) {
            Some(earliest) => earliest,
            None if booking_rules.lead_time_minutes > 0 => return Ok(vec![]),
            None => DateTime::<Utc>::MIN_UTC,
        };

        let busy: Vec<&Appointment> = existing_appointments
            .iter()
            .filter(|apt| apt.blocks_schedule())
            .collect();

        let mut slots = Vec::new();
        let mut candidate = open_at;

        while let Some(candidate_end) = candidate.checked_add_signed(duration) {
            if candidate_end > close_at {
                break;
            }

            let has_conflict = busy.iter().any(|apt| apt.overlaps(candidate, candidate_end));

            if candidate >= earliest_start && !has_conflict {
                // Step 5: local label
                slots.push(AvailableSlot {
                    start_time: candidate,
                    end_time: candidate_end,
                    label: format_time_in_zone(candidate, tz),
                });
            }

            candidate = match candidate.checked_add_signed(step) {
                Some(next) => next,
                None => break,
            };
        }

        debug!("Generated {} slots for {} in {}", slots.len(), date, timezone);
        Ok(slots)
    }
}
