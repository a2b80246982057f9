// libs/appointment-cell/src/services/memory.rs
//
// In-process adapters for the collaborator ports. Used by the api binary when
// no database is wired in, and by tests.
//

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AttendanceEventKind, Clinic, PatientAttendanceMetrics,
    PatientContact, Service, TimeWindow,
};
use crate::services::store::{AppointmentStore, AttendanceStore, ClinicDirectory};

// ==============================================================================
// CLINIC DIRECTORY
// ==============================================================================

#[derive(Debug, Default)]
pub struct InMemoryClinicDirectory {
    clinics: RwLock<HashMap<Uuid, Clinic>>,
    services: RwLock<HashMap<Uuid, Service>>,
    patients: RwLock<HashMap<(Uuid, String), Uuid>>,
}

impl InMemoryClinicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(clinics: Vec<Clinic>, services: Vec<Service>) -> Self {
        Self {
            clinics: RwLock::new(clinics.into_iter().map(|c| (c.id, c)).collect()),
            services: RwLock::new(services.into_iter().map(|s| (s.id, s)).collect()),
            patients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert_clinic(&self, clinic: Clinic) {
        self.clinics.write().await.insert(clinic.id, clinic);
    }

    pub async fn insert_service(&self, service: Service) {
        self.services.write().await.insert(service.id, service);
    }

    pub async fn patient_count(&self) -> usize {
        self.patients.read().await.len()
    }
}

#[async_trait]
impl ClinicDirectory for InMemoryClinicDirectory {
    async fn lookup_clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>, AppointmentError> {
        let clinics = self.clinics.read().await;
        Ok(clinics.values().find(|c| c.slug == slug).cloned())
    }

    async fn lookup_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, AppointmentError> {
        Ok(self.clinics.read().await.get(&clinic_id).cloned())
    }

    async fn lookup_service(&self, service_id: Uuid) -> Result<Option<Service>, AppointmentError> {
        Ok(self.services.read().await.get(&service_id).cloned())
    }

    async fn resolve_patient(&self, clinic_id: Uuid, contact: &PatientContact) -> Result<Uuid, AppointmentError> {
        let email = contact.email.trim().to_lowercase();
        let mut patients = self.patients.write().await;

        let patient_id = *patients.entry((clinic_id, email)).or_insert_with(|| {
            let id = Uuid::new_v4();
            debug!("Registered new patient {} at clinic {}", id, clinic_id);
            id
        });

        Ok(patient_id)
    }
}

// ==============================================================================
// APPOINTMENT STORE
// ==============================================================================

#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row, deleted ones included, ordered by start time.
    pub async fn snapshot(&self) -> Vec<Appointment> {
        let mut rows: Vec<Appointment> = self.appointments.read().await.values().cloned().collect();
        rows.sort_by_key(|apt| apt.start_time);
        rows
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn list_for_staff_and_window(
        &self,
        clinic_id: Uuid,
        staff_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;

        let mut rows: Vec<Appointment> = appointments
            .values()
            .filter(|apt| apt.clinic_id == clinic_id && apt.staff_id == staff_id)
            .filter(|apt| !apt.is_deleted())
            .filter(|apt| apt.overlaps(window.start, window.end))
            .cloned()
            .collect();

        rows.sort_by_key(|apt| apt.start_time);
        Ok(rows)
    }

    async fn get(&self, clinic_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .get(&appointment_id)
            .filter(|apt| apt.clinic_id == clinic_id)
            .cloned())
    }

    async fn find_active_by_fingerprint(
        &self,
        clinic_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .find(|apt| {
                apt.clinic_id == clinic_id
                    && !apt.is_deleted()
                    && apt.status != AppointmentStatus::Cancelled
                    && apt.booking_fingerprint.as_deref() == Some(fingerprint)
            })
            .cloned())
    }

    async fn create(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        if appointments.contains_key(&appointment.id) {
            return Err(AppointmentError::StoreError(format!(
                "appointment {} already exists",
                appointment.id
            )));
        }
        appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment.id) {
            Some(existing) if existing.clinic_id == appointment.clinic_id => {
                *existing = appointment.clone();
                Ok(appointment)
            }
            _ => Err(AppointmentError::NotFound(appointment.id)),
        }
    }

    async fn soft_delete(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment_id) {
            Some(existing) if existing.clinic_id == clinic_id && !existing.is_deleted() => {
                existing.deleted_at = Some(deleted_at);
                existing.updated_at = deleted_at;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }
}

// ==============================================================================
// ATTENDANCE STORE
// ==============================================================================

#[derive(Debug, Default)]
pub struct InMemoryAttendanceStore {
    metrics: RwLock<HashMap<(Uuid, Uuid), PatientAttendanceMetrics>>,
    claimed: RwLock<HashSet<(Uuid, AttendanceEventKind)>>,
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendanceStore {
    async fn get(&self, clinic_id: Uuid, patient_id: Uuid) -> Result<Option<PatientAttendanceMetrics>, AppointmentError> {
        Ok(self.metrics.read().await.get(&(clinic_id, patient_id)).cloned())
    }

    async fn put(&self, metrics: PatientAttendanceMetrics) -> Result<(), AppointmentError> {
        self.metrics
            .write()
            .await
            .insert((metrics.clinic_id, metrics.patient_id), metrics);
        Ok(())
    }

    async fn claim_event(&self, appointment_id: Uuid, kind: AttendanceEventKind) -> Result<bool, AppointmentError> {
        Ok(self.claimed.write().await.insert((appointment_id, kind)))
    }

    async fn reset(&self) -> Result<(), AppointmentError> {
        self.metrics.write().await.clear();
        self.claimed.write().await.clear();
        Ok(())
    }
}
