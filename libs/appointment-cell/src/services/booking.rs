// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_models::StaffContext;

use crate::models::{
    Appointment, AppointmentError, AppointmentSource, AppointmentStatus, AvailableSlot, Clinic,
    CreateAppointmentRequest, PatientAttendanceMetrics, Service, TimeWindow, UpdateAppointmentRequest,
};
use crate::services::attendance::AttendanceTracker;
use crate::services::civil_time::{checked_add_minutes, parse_timezone, zoned_date_time_to_utc};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::{AppointmentLifecycleService, TransitionOutcome};
use crate::services::locks::{StaffLockPair, StaffLocks};
use crate::services::notification::NotificationDispatcher;
use crate::services::slots::SlotEngine;
use crate::services::store::{AppointmentStore, ClinicDirectory};

/// Everything needed to place a new appointment on a staff calendar.
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub explicit_end: Option<DateTime<Utc>>,
    pub source: AppointmentSource,
    pub notes: Option<String>,
    pub booking_fingerprint: Option<String>,
    pub allow_double_booking: bool,
}

pub struct AppointmentBookingService {
    directory: Arc<dyn ClinicDirectory>,
    appointments: Arc<dyn AppointmentStore>,
    attendance: Arc<AttendanceTracker>,
    notifier: Arc<dyn NotificationDispatcher>,
    locks: Arc<StaffLocks>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
    slot_engine: SlotEngine,
}

impl AppointmentBookingService {
    pub fn new(
        directory: Arc<dyn ClinicDirectory>,
        appointments: Arc<dyn AppointmentStore>,
        attendance: Arc<AttendanceTracker>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            directory,
            appointments,
            attendance,
            notifier,
            locks: Arc::new(StaffLocks::new()),
            conflict_service: ConflictDetectionService::new(),
            lifecycle_service: AppointmentLifecycleService::new(),
            slot_engine: SlotEngine::new(),
        }
    }

    pub fn directory(&self) -> &Arc<dyn ClinicDirectory> {
        &self.directory
    }

    pub fn appointments(&self) -> &Arc<dyn AppointmentStore> {
        &self.appointments
    }

    pub fn attendance_tracker(&self) -> &Arc<AttendanceTracker> {
        &self.attendance
    }

    pub fn notifier(&self) -> &Arc<dyn NotificationDispatcher> {
        &self.notifier
    }

    // ==========================================================================
    // STAFF OPERATIONS
    // ==========================================================================

    #[instrument(skip(self, request), fields(clinic_id = %ctx.clinic_id))]
    pub async fn create_appointment(
        &self,
        ctx: &StaffContext,
        request: CreateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        info!("Creating appointment for patient {} with staff {}", request.patient_id, request.staff_id);

        // **Step 1: Resolve clinic and service**
        let clinic = self.clinic_by_id(ctx.clinic_id).await?;
        self.service_in_clinic(&clinic, request.service_id).await?;

        // **Step 2: Validate and insert under the staff lock**
        let draft = AppointmentDraft {
            clinic_id: clinic.id,
            patient_id: request.patient_id,
            staff_id: request.staff_id,
            service_id: request.service_id,
            start_time: request.start_time,
            duration_minutes: request.duration_minutes,
            explicit_end: request.end_time,
            source: AppointmentSource::Staff,
            notes: request.notes,
            booking_fingerprint: None,
            allow_double_booking: request.allow_double_booking || clinic.booking_rules.allow_double_booking,
        };
        let appointment = self.schedule(draft, now).await?;

        // **Step 3: Notify**
        self.notify_booked(&appointment).await;

        info!("Appointment {} created by {:?}", appointment.id, ctx.actor_id);
        Ok(appointment)
    }

    pub async fn get_appointment(
        &self,
        ctx: &StaffContext,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        self.appointments
            .get(ctx.clinic_id, appointment_id)
            .await?
            .filter(|apt| !apt.is_deleted())
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    #[instrument(skip(self, request), fields(clinic_id = %ctx.clinic_id))]
    pub async fn update_appointment(
        &self,
        ctx: &StaffContext,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        // **Step 1: Lock the staff calendar, then read the row under it**
        let (current, guards) = self
            .lock_appointment(ctx, appointment_id, request.staff_id)
            .await?;
        let previous_status = current.status;

        // **Step 2: Status transition**
        let transition = match request.status {
            Some(new_status) => Some((
                new_status,
                self.lifecycle_service.validate_status_transition(
                    current.status,
                    new_status,
                    request.cancellation_reason.as_deref(),
                )?,
            )),
            None => None,
        };

        let mut updated = current.clone();

        // **Step 3: Reschedule against the locked calendar**
        if request.reschedules() {
            if !self.lifecycle_service.can_reschedule(current.status) {
                return Err(AppointmentError::InvalidStatusTransition {
                    from: current.status,
                    to: request.status.unwrap_or(current.status),
                });
            }

            let clinic = self.clinic_by_id(ctx.clinic_id).await?;
            let target_staff = request.staff_id.unwrap_or(current.staff_id);
            let start = request.start_time.unwrap_or(current.start_time);
            let duration = request.duration_minutes.unwrap_or_else(|| current.duration_minutes());

            let existing: Vec<Appointment> = self
                .appointments
                .list_for_staff_and_window(ctx.clinic_id, target_staff, Self::window_for(start, duration)?)
                .await?
                .into_iter()
                .filter(|apt| apt.id != current.id)
                .collect();

            let end = self.conflict_service.validate_scheduling_rules(
                start,
                duration,
                target_staff,
                now,
                &existing,
                None,
                request.allow_double_booking || clinic.booking_rules.allow_double_booking,
            )?;

            updated.staff_id = target_staff;
            updated.start_time = start;
            updated.end_time = end;
        }

        Self::apply_fields(&mut updated, &request, transition, now);
        let saved = self.appointments.update(updated).await?;

        // **Step 4: Attendance and notification side effects**
        if let Some((new_status, TransitionOutcome::Applied)) = transition {
            match new_status {
                AppointmentStatus::NoShow => {
                    self.attendance.record_no_show(&saved, now).await?;
                }
                AppointmentStatus::Cancelled => {
                    self.attendance.record_cancellation(&saved, now).await?;
                }
                _ => {}
            }
            drop(guards);

            if let Err(e) = self.notifier.status_changed(&saved, previous_status).await {
                warn!("Status notification failed for appointment {}: {}", saved.id, e);
            }
        }

        info!("Appointment {} updated", saved.id);
        Ok(saved)
    }

    /// Soft delete. Deleting a live appointment counts as a cancellation for
    /// attendance.
    #[instrument(skip(self), fields(clinic_id = %ctx.clinic_id))]
    pub async fn delete_appointment(
        &self,
        ctx: &StaffContext,
        appointment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let (current, _guard) = self.lock_appointment(ctx, appointment_id, None).await?;

        let deleted = self
            .appointments
            .soft_delete(ctx.clinic_id, appointment_id, now)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        if !current.status.is_terminal() {
            self.attendance.record_cancellation(&deleted, now).await?;
        }

        info!("Appointment {} deleted by {:?}", appointment_id, ctx.actor_id);
        Ok(deleted)
    }

    pub async fn list_appointments(
        &self,
        ctx: &StaffContext,
        staff_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.appointments
            .list_for_staff_and_window(ctx.clinic_id, staff_id, window)
            .await
    }

    pub async fn attendance(
        &self,
        ctx: &StaffContext,
        patient_id: Uuid,
    ) -> Result<PatientAttendanceMetrics, AppointmentError> {
        self.attendance.metrics_for(ctx.clinic_id, patient_id).await
    }

    // ==========================================================================
    // PUBLIC AVAILABILITY
    // ==========================================================================

    pub async fn list_available_slots(
        &self,
        clinic_slug: &str,
        date: NaiveDate,
        service_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailableSlot>, AppointmentError> {
        let clinic = self.clinic_by_slug(clinic_slug).await?;
        let service = self.service_in_clinic(&clinic, service_id).await?;
        let tz = parse_timezone(&clinic.timezone)?;

        let day_start = zoned_date_time_to_utc(date, NaiveTime::default(), tz);
        let existing = self
            .appointments
            .list_for_staff_and_window(
                clinic.id,
                service.staff_id,
                TimeWindow::around(
                    day_start,
                    day_start.checked_add_signed(Duration::days(1)).unwrap_or(day_start),
                ),
            )
            .await?;

        self.slot_engine.generate_slots(
            date,
            &clinic.timezone,
            service.duration_minutes,
            &clinic.operating_hours,
            &clinic.booking_rules,
            now,
            &existing,
        )
    }

    // ==========================================================================
    // SHARED HELPERS
    // ==========================================================================

    /// Validate a draft against the staff calendar and insert it as `Scheduled`.
    pub async fn schedule(&self, draft: AppointmentDraft, now: DateTime<Utc>) -> Result<Appointment, AppointmentError> {
        let _guard = self.locks.acquire(draft.clinic_id, draft.staff_id).await;

        let existing = self
            .appointments
            .list_for_staff_and_window(
                draft.clinic_id,
                draft.staff_id,
                Self::window_for(draft.start_time, draft.duration_minutes)?,
            )
            .await?;

        let end_time = self.conflict_service.validate_scheduling_rules(
            draft.start_time,
            draft.duration_minutes,
            draft.staff_id,
            now,
            &existing,
            draft.explicit_end,
            draft.allow_double_booking,
        )?;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            clinic_id: draft.clinic_id,
            patient_id: draft.patient_id,
            staff_id: draft.staff_id,
            service_id: draft.service_id,
            start_time: draft.start_time,
            end_time,
            status: AppointmentStatus::Scheduled,
            source: draft.source,
            cancellation_reason: None,
            notes: draft.notes,
            booking_fingerprint: draft.booking_fingerprint,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let created = self.appointments.create(appointment).await?;
        debug!("Inserted appointment {} for staff {}", created.id, created.staff_id);
        Ok(created)
    }

    pub async fn clinic_by_slug(&self, slug: &str) -> Result<Clinic, AppointmentError> {
        self.directory
            .lookup_clinic_by_slug(slug)
            .await?
            .ok_or_else(|| AppointmentError::ClinicNotFound(slug.to_string()))
    }

    pub async fn clinic_by_id(&self, clinic_id: Uuid) -> Result<Clinic, AppointmentError> {
        self.directory
            .lookup_clinic(clinic_id)
            .await?
            .ok_or_else(|| AppointmentError::ClinicNotFound(clinic_id.to_string()))
    }

    /// The service, provided it belongs to `clinic`.
    pub async fn service_in_clinic(&self, clinic: &Clinic, service_id: Uuid) -> Result<Service, AppointmentError> {
        self.directory
            .lookup_service(service_id)
            .await?
            .filter(|service| service.clinic_id == clinic.id)
            .ok_or(AppointmentError::ServiceNotFound(service_id))
    }

    pub async fn notify_booked(&self, appointment: &Appointment) {
        if let Err(e) = self.notifier.appointment_booked(appointment).await {
            warn!("Booking notification failed for appointment {}: {}", appointment.id, e);
        }
    }

    /// Read an appointment while holding the lock of the staff it belongs to,
    /// plus `new_staff` when it is being reassigned.
    ///
    /// The row is re-read after locking. If it moved to another practitioner
    /// while we waited, the locks are swapped and the read repeated.
    async fn lock_appointment(
        &self,
        ctx: &StaffContext,
        appointment_id: Uuid,
        new_staff: Option<Uuid>,
    ) -> Result<(Appointment, StaffLockPair), AppointmentError> {
        let mut locked_staff = self.get_appointment(ctx, appointment_id).await?.staff_id;

        loop {
            let guards = self
                .locks
                .acquire_pair(ctx.clinic_id, locked_staff, new_staff.unwrap_or(locked_staff))
                .await;

            let current = self.get_appointment(ctx, appointment_id).await?;
            if current.staff_id == locked_staff {
                return Ok((current, guards));
            }

            debug!(
                "Appointment {} moved from staff {} to {} while waiting for its lock",
                appointment_id, locked_staff, current.staff_id
            );
            locked_staff = current.staff_id;
        }
    }

    fn window_for(start: DateTime<Utc>, duration_minutes: i64) -> Result<TimeWindow, AppointmentError> {
        let end = checked_add_minutes(start, duration_minutes.max(0))
            .ok_or(AppointmentError::InvalidDuration(duration_minutes))?;
        Ok(TimeWindow::around(start, end))
    }

    fn apply_fields(
        appointment: &mut Appointment,
        request: &UpdateAppointmentRequest,
        transition: Option<(AppointmentStatus, TransitionOutcome)>,
        now: DateTime<Utc>,
    ) {
        if let Some((new_status, TransitionOutcome::Applied)) = transition {
            appointment.status = new_status;
            if new_status == AppointmentStatus::Cancelled {
                appointment.cancellation_reason = request.cancellation_reason.as_ref().map(|r| r.trim().to_string());
            }
        }

        if let Some(notes) = &request.notes {
            appointment.notes = Some(notes.clone());
        }

        appointment.updated_at = now;
    }
}
