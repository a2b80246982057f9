// libs/appointment-cell/src/services/conflict.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError};
use crate::services::civil_time::checked_add_minutes;

/// Scheduling rule validation for a proposed appointment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetectionService;

impl ConflictDetectionService {
    pub fn new() -> Self {
        Self
    }

    /// Validate a proposed `[start, start + duration)` booking for `staff_id`.
    ///
    /// Returns the normalized end time. Checks run in a fixed order:
    /// duration, explicit end, past start, overlap.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_scheduling_rules(
        &self,
        start: DateTime<Utc>,
        duration_minutes: i64,
        staff_id: Uuid,
        now: DateTime<Utc>,
        existing_appointments: &[Appointment],
        explicit_end: Option<DateTime<Utc>>,
        allow_double_booking: bool,
    ) -> Result<DateTime<Utc>, AppointmentError> {
        if duration_minutes <= 0 {
            return Err(AppointmentError::InvalidDuration(duration_minutes));
        }

        let end = checked_add_minutes(start, duration_minutes)
            .ok_or(AppointmentError::InvalidDuration(duration_minutes))?;

        if let Some(provided_end) = explicit_end {
            if provided_end != end {
                return Err(AppointmentError::DurationMismatch {
                    expected_end: end,
                    provided_end,
                });
            }
        }

        if start < now {
            return Err(AppointmentError::PastAppointment);
        }

        if allow_double_booking {
            debug!("Double booking explicitly allowed for staff {}", staff_id);
            return Ok(end);
        }

        if let Some(conflict) = self.find_conflicts(staff_id, start, end, existing_appointments).first() {
            warn!(
                "Conflict detected for staff {} - appointment {} overlaps {}..{}",
                staff_id, conflict.id, start, end
            );
            return Err(AppointmentError::OverlappingAppointment { conflicting_id: conflict.id });
        }

        Ok(end)
    }

    /// Active appointments of `staff_id` overlapping `[start, end)`.
    pub fn find_conflicts<'a>(
        &self,
        staff_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        existing_appointments: &'a [Appointment],
    ) -> Vec<&'a Appointment> {
        existing_appointments
            .iter()
            .filter(|apt| apt.staff_id == staff_id)
            .filter(|apt| apt.blocks_schedule())
            .filter(|apt| apt.overlaps(start, end))
            .collect()
    }
}
