// libs/appointment-cell/src/services/notification.rs
use async_trait::async_trait;
use tracing::info;

use crate::models::{Appointment, AppointmentStatus};

/// Outbound notification hand-off. Delivery failures never roll back a booking.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn appointment_booked(&self, appointment: &Appointment) -> anyhow::Result<()>;

    async fn status_changed(&self, appointment: &Appointment, previous: AppointmentStatus) -> anyhow::Result<()>;
}

/// Dispatcher that only records the event in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationDispatcher for LoggingNotifier {
    async fn appointment_booked(&self, appointment: &Appointment) -> anyhow::Result<()> {
        info!(
            appointment_id = %appointment.id,
            clinic_id = %appointment.clinic_id,
            patient_id = %appointment.patient_id,
            start_time = %appointment.start_time,
            "appointment booked"
        );
        Ok(())
    }

    async fn status_changed(&self, appointment: &Appointment, previous: AppointmentStatus) -> anyhow::Result<()> {
        info!(
            appointment_id = %appointment.id,
            from = %previous,
            to = %appointment.status,
            "appointment status changed"
        );
        Ok(())
    }
}
