// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use idempotency_cell::IdempotencyError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub source: AppointmentSource,
    pub cancellation_reason: Option<String>,
    pub notes: Option<String>,
    /// Set on public bookings; see `services::fingerprint`.
    pub booking_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this appointment occupies its `[start, end)` interval on the staff calendar.
    pub fn blocks_schedule(&self) -> bool {
        !self.is_deleted() && self.status != AppointmentStatus::Cancelled
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        intervals_overlap(self.start_time, self.end_time, start, end)
    }
}

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Cancelled,
    NoShow,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow | AppointmentStatus::Completed
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "SCHEDULED"),
            AppointmentStatus::Confirmed => write!(f, "CONFIRMED"),
            AppointmentStatus::Cancelled => write!(f, "CANCELLED"),
            AppointmentStatus::NoShow => write!(f, "NO_SHOW"),
            AppointmentStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentSource {
    Staff,
    Public,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window around `[start, end)` wide enough to catch anything that could overlap it.
    pub fn around(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let margin = Duration::days(1);
        Self {
            start: start.checked_sub_signed(margin).unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: end.checked_add_signed(margin).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

// ==============================================================================
// CLINIC CONFIGURATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatingHoursRow {
    /// Sunday = 0 .. Saturday = 6.
    pub day_of_week: u8,
    pub open_time: String,
    pub close_time: String,
    pub is_closed: bool,
}

impl OperatingHoursRow {
    pub fn open(day_of_week: u8, open_time: &str, close_time: &str) -> Self {
        Self {
            day_of_week,
            open_time: open_time.to_string(),
            close_time: close_time.to_string(),
            is_closed: false,
        }
    }

    pub fn closed(day_of_week: u8) -> Self {
        Self {
            day_of_week,
            open_time: "00:00".to_string(),
            close_time: "00:00".to_string(),
            is_closed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRules {
    pub lead_time_minutes: i64,
    pub max_advance_days: i64,
    pub slot_step_minutes: i64,
    /// Staff-only override; never honoured for public bookings.
    pub allow_double_booking: bool,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            lead_time_minutes: 60,
            max_advance_days: 60,
            slot_step_minutes: 30,
            allow_double_booking: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clinic {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub timezone: String,
    pub operating_hours: Vec<OperatingHoursRow>,
    pub booking_rules: BookingRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub duration_minutes: i64,
    /// Practitioner whose calendar public bookings for this service land on.
    pub staff_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Local `HH:MM` in the clinic timezone.
    pub label: String,
}

// ==============================================================================
// ATTENDANCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientAttendanceMetrics {
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub no_show_count: u32,
    pub late_cancel_count: u32,
    pub last_no_show_at: Option<DateTime<Utc>>,
    pub last_late_cancel_at: Option<DateTime<Utc>>,
}

impl PatientAttendanceMetrics {
    pub fn empty(clinic_id: Uuid, patient_id: Uuid) -> Self {
        Self {
            clinic_id,
            patient_id,
            no_show_count: 0,
            late_cancel_count: 0,
            last_no_show_at: None,
            last_late_cancel_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEventKind {
    NoShow,
    LateCancel,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub staff_id: Uuid,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub end_time: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[serde(default)]
    pub allow_double_booking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    pub cancellation_reason: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub staff_id: Option<Uuid>,
    pub notes: Option<String>,
    #[serde(default)]
    pub allow_double_booking: bool,
}

impl UpdateAppointmentRequest {
    pub fn status(status: AppointmentStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn cancel(reason: &str) -> Self {
        Self {
            status: Some(AppointmentStatus::Cancelled),
            cancellation_reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn reschedules(&self) -> bool {
        self.start_time.is_some() || self.duration_minutes.is_some() || self.staff_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientContact {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicBookingRequest {
    pub clinic_slug: String,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub patient: PatientContact,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingConfirmation {
    pub appointment_id: Uuid,
    pub clinic_slug: String,
    pub clinic_name: String,
    pub service_id: Uuid,
    pub service_name: String,
    pub staff_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub local_date: NaiveDate,
    pub local_time: String,
    pub timezone: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicBookingOutcome {
    pub confirmation: BookingConfirmation,
    pub replayed: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment cannot start in the past")]
    PastAppointment,

    #[error("End time {provided_end} does not match start plus duration ({expected_end})")]
    DurationMismatch {
        expected_end: DateTime<Utc>,
        provided_end: DateTime<Utc>,
    },

    #[error("Appointment overlaps existing appointment {conflicting_id}")]
    OverlappingAppointment { conflicting_id: Uuid },

    #[error("A cancellation reason is required")]
    CancellationReasonRequired,

    #[error("Cannot transition appointment from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Requested slot is in the past")]
    BookingInPast,

    #[error("Bookings require at least {lead_time_minutes} minutes notice")]
    BookingLeadTimeViolation { lead_time_minutes: i64 },

    #[error("Bookings can be made at most {max_advance_days} days in advance")]
    BookingAdvanceLimitViolation { max_advance_days: i64 },

    #[error("A booking for this patient, service and day already exists")]
    DuplicateBooking,

    #[error("Clinic not found: {0}")]
    ClinicNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Invalid time format: {0} (expected HH:MM)")]
    InvalidTimeFormat(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid appointment duration: {0} minutes")]
    InvalidDuration(i64),

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Another booking attempt with this key is still in progress")]
    IdempotencyInProgress,

    #[error("Store error: {0}")]
    StoreError(String),
}

impl AppointmentError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::PastAppointment => "PAST_APPOINTMENT",
            AppointmentError::DurationMismatch { .. } => "DURATION_MISMATCH",
            AppointmentError::OverlappingAppointment { .. } => "OVERLAPPING_APPOINTMENT",
            AppointmentError::CancellationReasonRequired => "CANCELLATION_REASON_REQUIRED",
            AppointmentError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            AppointmentError::BookingInPast => "BOOKING_IN_PAST",
            AppointmentError::BookingLeadTimeViolation { .. } => "BOOKING_LEAD_TIME_VIOLATION",
            AppointmentError::BookingAdvanceLimitViolation { .. } => "BOOKING_ADVANCE_LIMIT_VIOLATION",
            AppointmentError::DuplicateBooking => "DUPLICATE_BOOKING",
            AppointmentError::ClinicNotFound(_) => "CLINIC_NOT_FOUND",
            AppointmentError::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            AppointmentError::InvalidTimeFormat(_) => "InvalidTimeFormat",
            AppointmentError::InvalidTimezone(_) => "INVALID_TIMEZONE",
            AppointmentError::InvalidDuration(_) => "INVALID_DURATION",
            AppointmentError::NotFound(_) => "APPOINTMENT_NOT_FOUND",
            AppointmentError::IdempotencyInProgress => "IDEMPOTENCY_IN_PROGRESS",
            AppointmentError::StoreError(_) => "STORE_ERROR",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Infrastructure failure rather than a rejected request.
    pub fn is_fault(&self) -> bool {
        matches!(self, AppointmentError::StoreError(_))
    }
}

impl From<IdempotencyError> for AppointmentError {
    fn from(err: IdempotencyError) -> Self {
        AppointmentError::StoreError(err.to_string())
    }
}
