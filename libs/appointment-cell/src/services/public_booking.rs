// libs/appointment-cell/src/services/public_booking.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use idempotency_cell::{IdempotencyError, IdempotencyLedger, IdempotencyStatus, ReservationOutcome};

use crate::models::{
    Appointment, AppointmentError, AppointmentSource, BookingConfirmation, Clinic, PublicBookingOutcome,
    PublicBookingRequest, Service,
};
use crate::services::booking::{AppointmentBookingService, AppointmentDraft};
use crate::services::civil_time::{
    checked_add_days, checked_add_minutes, format_time_in_zone, local_date_in_zone, parse_timezone,
};
use crate::services::fingerprint::{booking_fingerprint, derive_idempotency_key};

/// Unauthenticated booking intake.
///
/// Retries with the same idempotency key produce at most one appointment and
/// replay the first confirmation.
pub struct PublicBookingService {
    booking: Arc<AppointmentBookingService>,
    ledger: IdempotencyLedger,
}

impl PublicBookingService {
    pub fn new(booking: Arc<AppointmentBookingService>, ledger: IdempotencyLedger) -> Self {
        Self { booking, ledger }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    #[instrument(skip(self, request), fields(clinic_slug = %request.clinic_slug, service_id = %request.service_id))]
    pub async fn create_public_booking(
        &self,
        request: PublicBookingRequest,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PublicBookingOutcome, AppointmentError> {
        // **Step 1: Resolve clinic and service**
        let clinic = self.booking.clinic_by_slug(&request.clinic_slug).await?;
        let service = self.booking.service_in_clinic(&clinic, request.service_id).await?;

        // **Step 2: A caller key that already completed replays immediately**
        let caller_key = idempotency_key.map(str::trim).filter(|key| !key.is_empty());
        if let Some(key) = caller_key {
            if let Some(record) = self.ledger.peek(key, now).await? {
                if let (IdempotencyStatus::Completed, Some(response)) = (record.status, record.response) {
                    debug!("Replaying completed booking for caller key");
                    return Self::replay(response);
                }
            }
        }

        // **Step 3: Booking rules and duplicate detection**
        let fingerprint = self.validate_request(&clinic, &request, now).await?;

        // **Step 4: Reserve the idempotency key**
        let key = match caller_key {
            Some(key) => key.to_string(),
            None => derive_idempotency_key(&fingerprint),
        };

        match self.ledger.reserve(&key, now).await? {
            ReservationOutcome::Acquired => {}
            ReservationOutcome::InProgress => {
                warn!("Booking attempt rejected, key still in progress");
                return Err(AppointmentError::IdempotencyInProgress);
            }
            ReservationOutcome::Replay(response) if caller_key.is_some() => return Self::replay(response),
            ReservationOutcome::Replay(response) => {
                if let Some(outcome) = self.reclaim_derived_key(&clinic, &key, response, now).await? {
                    return Ok(outcome);
                }
            }
        }

        // **Step 5: Create the appointment**
        let patient_id = self
            .booking
            .directory()
            .resolve_patient(clinic.id, &request.patient)
            .await?;

        let draft = AppointmentDraft {
            clinic_id: clinic.id,
            patient_id,
            staff_id: service.staff_id,
            service_id: service.id,
            start_time: request.start_time,
            duration_minutes: service.duration_minutes,
            explicit_end: None,
            source: AppointmentSource::Public,
            notes: request.notes,
            booking_fingerprint: Some(fingerprint),
            allow_double_booking: false,
        };
        let appointment = match self.booking.schedule(draft, now).await {
            Ok(appointment) => appointment,
            Err(e) if e.is_fault() => return Err(e),
            Err(e) => {
                // Nothing was written; the key must not block other slots.
                self.release_reservation(&key, now).await;
                return Err(e);
            }
        };

        self.booking
            .attendance_tracker()
            .ensure_initialized(clinic.id, patient_id)
            .await?;

        let confirmation = Self::build_confirmation(&clinic, &service, &appointment)?;
        let response = serde_json::to_value(&confirmation)
            .map_err(|e| AppointmentError::StoreError(format!("failed to encode confirmation: {}", e)))?;
        match self.ledger.complete(&key, now, response, now).await {
            Ok(()) => {}
            Err(IdempotencyError::ReservationLost(_)) => {
                warn!("Booking {} outlived its idempotency reservation", appointment.id);
            }
            Err(e) => return Err(e.into()),
        }

        // **Step 6: Notify; failures never undo the booking**
        self.booking.notify_booked(&appointment).await;

        info!("Public booking {} created for clinic {}", appointment.id, clinic.slug);
        Ok(PublicBookingOutcome { confirmation, replayed: false })
    }

    /// A derived key replays only while the booking it recorded still holds
    /// its slot. Once that booking is cancelled or deleted the record is
    /// discarded and the key reserved afresh.
    ///
    /// Returns `Some` when the caller should answer with the outcome, `None`
    /// when the key is now reserved for a new booking.
    async fn reclaim_derived_key(
        &self,
        clinic: &Clinic,
        key: &str,
        response: Value,
        now: DateTime<Utc>,
    ) -> Result<Option<PublicBookingOutcome>, AppointmentError> {
        let outcome = Self::replay(response.clone())?;
        let recorded = self
            .booking
            .appointments()
            .get(clinic.id, outcome.confirmation.appointment_id)
            .await?;
        if recorded.is_some_and(|apt| apt.blocks_schedule()) {
            return Ok(Some(outcome));
        }

        if let Some(record) = self.ledger.peek(key, now).await? {
            if record.response.as_ref() == Some(&response) {
                self.ledger.discard_completed(&record).await?;
            }
        }
        info!(
            "Booking {} no longer holds its slot, reclaiming derived key",
            outcome.confirmation.appointment_id
        );

        match self.ledger.reserve(key, now).await? {
            ReservationOutcome::Acquired => Ok(None),
            ReservationOutcome::InProgress => Err(AppointmentError::IdempotencyInProgress),
            ReservationOutcome::Replay(response) => Self::replay(response).map(Some),
        }
    }

    async fn release_reservation(&self, key: &str, reserved_at: DateTime<Utc>) {
        if let Err(e) = self.ledger.release(key, reserved_at).await {
            warn!("Failed to release idempotency key after rejected booking: {}", e);
        }
    }

    /// Returns the duplicate-detection fingerprint on success.
    async fn validate_request(
        &self,
        clinic: &Clinic,
        request: &PublicBookingRequest,
        now: DateTime<Utc>,
    ) -> Result<String, AppointmentError> {
        let rules = &clinic.booking_rules;
        let tz = parse_timezone(&clinic.timezone)?;

        if request.start_time < now {
            return Err(AppointmentError::BookingInPast);
        }

        let lead_time_met = match checked_add_minutes(now, rules.lead_time_minutes) {
            Some(earliest) => request.start_time >= earliest,
            None => rules.lead_time_minutes < 0,
        };
        if !lead_time_met {
            return Err(AppointmentError::BookingLeadTimeViolation {
                lead_time_minutes: rules.lead_time_minutes,
            });
        }

        let within_advance_window = match checked_add_days(local_date_in_zone(now, tz), rules.max_advance_days) {
            Some(last_bookable_day) => local_date_in_zone(request.start_time, tz) <= last_bookable_day,
            None => rules.max_advance_days > 0,
        };
        if !within_advance_window {
            return Err(AppointmentError::BookingAdvanceLimitViolation {
                max_advance_days: rules.max_advance_days,
            });
        }

        let fingerprint = booking_fingerprint(
            &clinic.slug,
            request.service_id,
            request.start_time,
            &request.patient.email,
            &clinic.timezone,
        )?;

        if let Some(existing) = self
            .booking
            .appointments()
            .find_active_by_fingerprint(clinic.id, &fingerprint)
            .await?
        {
            info!("Duplicate public booking matches appointment {}", existing.id);
            return Err(AppointmentError::DuplicateBooking);
        }

        Ok(fingerprint)
    }

    fn build_confirmation(
        clinic: &Clinic,
        service: &Service,
        appointment: &Appointment,
    ) -> Result<BookingConfirmation, AppointmentError> {
        let tz = parse_timezone(&clinic.timezone)?;

        Ok(BookingConfirmation {
            appointment_id: appointment.id,
            clinic_slug: clinic.slug.clone(),
            clinic_name: clinic.name.clone(),
            service_id: service.id,
            service_name: service.name.clone(),
            staff_id: appointment.staff_id,
            patient_id: appointment.patient_id,
            start_time: appointment.start_time,
            end_time: appointment.end_time,
            local_date: local_date_in_zone(appointment.start_time, tz),
            local_time: format_time_in_zone(appointment.start_time, tz),
            timezone: clinic.timezone.clone(),
            status: appointment.status,
            created_at: appointment.created_at,
        })
    }

    fn replay(response: Value) -> Result<PublicBookingOutcome, AppointmentError> {
        let confirmation: BookingConfirmation = serde_json::from_value(response)
            .map_err(|e| AppointmentError::StoreError(format!("stored confirmation is unreadable: {}", e)))?;

        Ok(PublicBookingOutcome { confirmation, replayed: true })
    }
}
