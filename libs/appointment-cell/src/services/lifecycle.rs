// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, info, warn};

use crate::models::{AppointmentError, AppointmentStatus};

/// Result of validating a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status changes.
    Applied,
    /// The requested status equals the current one; nothing to do.
    NoOp,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed.
    ///
    /// A cancellation without a non-empty reason is rejected before the
    /// transition table is consulted.
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
        cancellation_reason: Option<&str>,
    ) -> Result<TransitionOutcome, AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if new_status == AppointmentStatus::Cancelled
            && cancellation_reason.map_or(true, |reason| reason.trim().is_empty())
        {
            return Err(AppointmentError::CancellationReasonRequired);
        }

        if current_status == new_status {
            debug!("Status already {}, treating as no-op", current_status);
            return Ok(TransitionOutcome::NoOp);
        }

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current_status,
                to: new_status,
            });
        }

        info!("Status transition validated: {} -> {}", current_status, new_status);
        Ok(TransitionOutcome::Applied)
    }

    /// All valid next statuses for a given current status.
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current_status {
            AppointmentStatus::Scheduled => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Completed,
            ],
            AppointmentStatus::Confirmed => vec![
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Completed,
            ],
            // Terminal states
            AppointmentStatus::Cancelled => vec![],
            AppointmentStatus::NoShow => vec![],
            AppointmentStatus::Completed => vec![],
        }
    }

    /// Whether an appointment in `status` may still be moved or reassigned.
    pub fn can_reschedule(&self, status: AppointmentStatus) -> bool {
        !status.is_terminal()
    }
}
