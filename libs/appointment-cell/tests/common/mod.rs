#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::*;
use idempotency_cell::{
    IdempotencyError, IdempotencyLedger, IdempotencyRecord, IdempotencyStatus, IdempotencyStore,
    InMemoryIdempotencyStore, ReservationOutcome,
};
use shared_models::StaffContext;

pub const CLINIC_SLUG: &str = "sunrise-clinic";
pub const MANILA: &str = "Asia/Manila";

/// Manila wall-clock time expressed in UTC (UTC+8, no DST).
pub fn manila(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap() - Duration::hours(8)
}

pub fn weekday_hours(open: &str, close: &str) -> Vec<OperatingHoursRow> {
    let mut rows = vec![OperatingHoursRow::closed(0)];
    rows.extend((1..=6).map(|day| OperatingHoursRow::open(day, open, close)));
    rows
}

pub fn sample_clinic() -> Clinic {
    Clinic {
        id: Uuid::new_v4(),
        slug: CLINIC_SLUG.to_string(),
        name: "Sunrise Family Clinic".to_string(),
        timezone: MANILA.to_string(),
        operating_hours: weekday_hours("09:00", "12:00"),
        booking_rules: BookingRules {
            lead_time_minutes: 60,
            max_advance_days: 30,
            slot_step_minutes: 30,
            allow_double_booking: false,
        },
    }
}

pub fn sample_service(clinic: &Clinic) -> Service {
    Service {
        id: Uuid::new_v4(),
        clinic_id: clinic.id,
        name: "General Consultation".to_string(),
        duration_minutes: 30,
        staff_id: Uuid::new_v4(),
    }
}

pub fn appointment(staff_id: Uuid, start: DateTime<Utc>, minutes: i64, status: AppointmentStatus) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        clinic_id: Uuid::new_v4(),
        patient_id: Uuid::new_v4(),
        staff_id,
        service_id: Uuid::new_v4(),
        start_time: start,
        end_time: start + Duration::minutes(minutes),
        status,
        source: AppointmentSource::Staff,
        cancellation_reason: None,
        notes: None,
        booking_fingerprint: None,
        created_at: start - Duration::days(1),
        updated_at: start - Duration::days(1),
        deleted_at: None,
    }
}

pub fn patient(email: &str) -> PatientContact {
    PatientContact {
        full_name: "Ana Santos".to_string(),
        email: email.to_string(),
        phone: Some("+63 917 000 0000".to_string()),
    }
}

/// Notifier that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub booked: Mutex<Vec<Uuid>>,
    pub status_changes: Mutex<Vec<(Uuid, AppointmentStatus, AppointmentStatus)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn booked_count(&self) -> usize {
        self.booked.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn appointment_booked(&self, appointment: &Appointment) -> anyhow::Result<()> {
        self.booked.lock().unwrap().push(appointment.id);
        if self.fail {
            anyhow::bail!("smtp relay unavailable");
        }
        Ok(())
    }

    async fn status_changed(&self, appointment: &Appointment, previous: AppointmentStatus) -> anyhow::Result<()> {
        self.status_changes
            .lock()
            .unwrap()
            .push((appointment.id, previous, appointment.status));
        if self.fail {
            anyhow::bail!("smtp relay unavailable");
        }
        Ok(())
    }
}

/// Idempotency store whose completion step always fails.
#[derive(Default)]
pub struct FailingCompletionStore {
    inner: InMemoryIdempotencyStore,
}

#[async_trait]
impl IdempotencyStore for FailingCompletionStore {
    async fn try_reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReservationOutcome, IdempotencyError> {
        self.inner.try_reserve(key, now, ttl).await
    }

    async fn complete(
        &self,
        _key: &str,
        _reserved_at: DateTime<Utc>,
        _response: serde_json::Value,
        _now: DateTime<Utc>,
        _ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        Err(IdempotencyError::StoreError("replica unavailable".to_string()))
    }

    async fn remove_if(
        &self,
        key: &str,
        status: IdempotencyStatus,
        created_at: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        self.inner.remove_if(key, status, created_at).await
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        self.inner.get(key).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        self.inner.purge_expired(now).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBehaviour {
    Direct,
    /// Yield to the scheduler before every call, the way a networked store
    /// would, so concurrent updates interleave.
    Yielding,
    /// Every insert fails.
    FailingCreates,
}

pub struct ScriptedAppointmentStore {
    inner: Arc<InMemoryAppointmentStore>,
    behaviour: StoreBehaviour,
}

#[async_trait]
impl AppointmentStore for ScriptedAppointmentStore {
    async fn list_for_staff_and_window(
        &self,
        clinic_id: Uuid,
        staff_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        tokio::task::yield_now().await;
        self.inner.list_for_staff_and_window(clinic_id, staff_id, window).await
    }

    async fn get(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        tokio::task::yield_now().await;
        self.inner.get(clinic_id, appointment_id).await
    }

    async fn find_active_by_fingerprint(
        &self,
        clinic_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        tokio::task::yield_now().await;
        self.inner.find_active_by_fingerprint(clinic_id, fingerprint).await
    }

    async fn create(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        tokio::task::yield_now().await;
        if self.behaviour == StoreBehaviour::FailingCreates {
            return Err(AppointmentError::StoreError("primary database unreachable".to_string()));
        }
        self.inner.create(appointment).await
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        tokio::task::yield_now().await;
        self.inner.update(appointment).await
    }

    async fn soft_delete(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        tokio::task::yield_now().await;
        self.inner.soft_delete(clinic_id, appointment_id, deleted_at).await
    }
}

pub struct TestHarness {
    pub clinic: Clinic,
    pub service: Service,
    pub directory: Arc<InMemoryClinicDirectory>,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub booking: Arc<AppointmentBookingService>,
    pub public_booking: Arc<PublicBookingService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::assemble(notifier, Arc::new(InMemoryIdempotencyStore::new()), StoreBehaviour::Direct)
    }

    pub fn with_idempotency_store(store: Arc<dyn IdempotencyStore>) -> Self {
        Self::assemble(RecordingNotifier::default(), store, StoreBehaviour::Direct)
    }

    pub fn with_store_behaviour(behaviour: StoreBehaviour) -> Self {
        Self::assemble(RecordingNotifier::default(), Arc::new(InMemoryIdempotencyStore::new()), behaviour)
    }

    fn assemble(
        notifier: RecordingNotifier,
        idempotency_store: Arc<dyn IdempotencyStore>,
        behaviour: StoreBehaviour,
    ) -> Self {
        let clinic = sample_clinic();
        let service = sample_service(&clinic);

        let directory = Arc::new(InMemoryClinicDirectory::with_catalog(
            vec![clinic.clone()],
            vec![service.clone()],
        ));
        let appointments = Arc::new(InMemoryAppointmentStore::new());
        let appointment_store: Arc<dyn AppointmentStore> = match behaviour {
            StoreBehaviour::Direct => appointments.clone(),
            _ => Arc::new(ScriptedAppointmentStore {
                inner: appointments.clone(),
                behaviour,
            }),
        };
        let attendance = Arc::new(AttendanceTracker::new(
            Arc::new(InMemoryAttendanceStore::new()),
            Duration::hours(24),
        ));
        let notifier = Arc::new(notifier);

        let booking = Arc::new(AppointmentBookingService::new(
            directory.clone(),
            appointment_store,
            attendance,
            notifier.clone(),
        ));
        let public_booking = Arc::new(PublicBookingService::new(
            booking.clone(),
            IdempotencyLedger::new(idempotency_store, Duration::minutes(30)),
        ));

        Self {
            clinic,
            service,
            directory,
            appointments,
            notifier,
            booking,
            public_booking,
        }
    }

    pub fn ctx(&self) -> StaffContext {
        StaffContext::with_actor(self.clinic.id, Uuid::new_v4())
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            booking: self.booking.clone(),
            public_booking: self.public_booking.clone(),
        }
    }

    pub fn create_request(&self, start: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            patient_id: Uuid::new_v4(),
            staff_id: self.service.staff_id,
            service_id: self.service.id,
            start_time: start,
            duration_minutes: 30,
            end_time: None,
            notes: None,
            allow_double_booking: false,
        }
    }

    pub fn public_request(&self, start: DateTime<Utc>, email: &str) -> PublicBookingRequest {
        PublicBookingRequest {
            clinic_slug: CLINIC_SLUG.to_string(),
            service_id: self.service.id,
            start_time: start,
            patient: patient(email),
            notes: None,
        }
    }
}
