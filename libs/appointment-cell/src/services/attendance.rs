// libs/appointment-cell/src/services/attendance.rs
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AttendanceEventKind, PatientAttendanceMetrics};
use crate::services::store::AttendanceStore;

/// Per-patient no-show and late-cancel counters.
///
/// Each appointment contributes at most one event of each kind; the claim is
/// recorded in the store so repeated transitions or a cancel followed by a
/// delete never double count.
pub struct AttendanceTracker {
    store: Arc<dyn AttendanceStore>,
    late_cancel_window: Duration,
    // Serializes read-modify-write of metrics rows.
    write_guard: Mutex<()>,
}

impl AttendanceTracker {
    pub fn new(store: Arc<dyn AttendanceStore>, late_cancel_window: Duration) -> Self {
        Self {
            store,
            late_cancel_window,
            write_guard: Mutex::new(()),
        }
    }

    pub fn late_cancel_window(&self) -> Duration {
        self.late_cancel_window
    }

    /// A cancellation counts as late when the appointment has not started and
    /// starts within the window.
    pub fn is_late_cancellation(&self, start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now < start_time && start_time - now < self.late_cancel_window
    }

    /// Metrics for the patient, created zeroed on first access.
    pub async fn ensure_initialized(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<PatientAttendanceMetrics, AppointmentError> {
        let _guard = self.write_guard.lock().await;
        self.load_or_create(clinic_id, patient_id).await
    }

    pub async fn metrics_for(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<PatientAttendanceMetrics, AppointmentError> {
        self.ensure_initialized(clinic_id, patient_id).await
    }

    /// Count a no-show. Returns whether the counter moved.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn record_no_show(&self, appointment: &Appointment, now: DateTime<Utc>) -> Result<bool, AppointmentError> {
        let _guard = self.write_guard.lock().await;

        if !self.store.claim_event(appointment.id, AttendanceEventKind::NoShow).await? {
            debug!("No-show already counted");
            return Ok(false);
        }

        let mut metrics = self.load_or_create(appointment.clinic_id, appointment.patient_id).await?;
        metrics.no_show_count += 1;
        metrics.last_no_show_at = Some(now);
        self.store.put(metrics).await?;

        info!("Recorded no-show for patient {}", appointment.patient_id);
        Ok(true)
    }

    /// Count a cancellation (explicit or by deletion) if it falls inside the
    /// late-cancel window. Returns whether the counter moved.
    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.id))]
    pub async fn record_cancellation(
        &self,
        appointment: &Appointment,
        now: DateTime<Utc>,
    ) -> Result<bool, AppointmentError> {
        if !self.is_late_cancellation(appointment.start_time, now) {
            debug!("Cancellation outside the late-cancel window");
            return Ok(false);
        }

        let _guard = self.write_guard.lock().await;

        if !self.store.claim_event(appointment.id, AttendanceEventKind::LateCancel).await? {
            debug!("Late cancellation already counted");
            return Ok(false);
        }

        let mut metrics = self.load_or_create(appointment.clinic_id, appointment.patient_id).await?;
        metrics.late_cancel_count += 1;
        metrics.last_late_cancel_at = Some(now);
        self.store.put(metrics).await?;

        info!("Recorded late cancellation for patient {}", appointment.patient_id);
        Ok(true)
    }

    /// Clear every metric and per-appointment marker.
    pub async fn reset(&self) -> Result<(), AppointmentError> {
        let _guard = self.write_guard.lock().await;
        self.store.reset().await
    }

    async fn load_or_create(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
    ) -> Result<PatientAttendanceMetrics, AppointmentError> {
        if let Some(existing) = self.store.get(clinic_id, patient_id).await? {
            return Ok(existing);
        }

        let metrics = PatientAttendanceMetrics::empty(clinic_id, patient_id);
        self.store.put(metrics.clone()).await?;
        Ok(metrics)
    }
}
