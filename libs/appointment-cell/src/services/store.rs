// libs/appointment-cell/src/services/store.rs
//
// Collaborator ports. Implementations return owned snapshots; callers never
// hold references into shared state.
//

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AttendanceEventKind, Clinic, PatientAttendanceMetrics, PatientContact,
    Service, TimeWindow,
};

#[async_trait]
pub trait ClinicDirectory: Send + Sync {
    async fn lookup_clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>, AppointmentError>;

    async fn lookup_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, AppointmentError>;

    async fn lookup_service(&self, service_id: Uuid) -> Result<Option<Service>, AppointmentError>;

    /// Find-or-create the patient with this email at the clinic.
    async fn resolve_patient(&self, clinic_id: Uuid, contact: &PatientContact) -> Result<Uuid, AppointmentError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Non-deleted appointments of one staff member overlapping `window`.
    async fn list_for_staff_and_window(
        &self,
        clinic_id: Uuid,
        staff_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    /// Lookup by id within a clinic. Soft-deleted rows are returned as-is.
    async fn get(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// A non-cancelled, non-deleted appointment carrying `fingerprint`.
    async fn find_active_by_fingerprint(
        &self,
        clinic_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn create(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    async fn soft_delete(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn get(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientAttendanceMetrics>, AppointmentError>;

    async fn put(&self, metrics: PatientAttendanceMetrics) -> Result<(), AppointmentError>;

    /// Returns `true` only for the first claim of `(appointment_id, kind)`.
    async fn claim_event(&self, appointment_id: Uuid, kind: AttendanceEventKind) -> Result<bool, AppointmentError>;

    async fn reset(&self) -> Result<(), AppointmentError>;
}
