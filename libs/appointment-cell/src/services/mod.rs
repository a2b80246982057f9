pub mod attendance;
pub mod booking;
pub mod civil_time;
pub mod conflict;
pub mod fingerprint;
pub mod lifecycle;
pub mod locks;
pub mod memory;
pub mod notification;
pub mod public_booking;
pub mod slots;
pub mod store;

pub use attendance::AttendanceTracker;
pub use booking::{AppointmentBookingService, AppointmentDraft};
pub use conflict::ConflictDetectionService;
pub use lifecycle::{AppointmentLifecycleService, TransitionOutcome};
pub use locks::{StaffLockGuard, StaffLockPair, StaffLocks};
pub use memory::{InMemoryAppointmentStore, InMemoryAttendanceStore, InMemoryClinicDirectory};
pub use notification::{LoggingNotifier, NotificationDispatcher};
pub use public_booking::PublicBookingService;
pub use slots::SlotEngine;
pub use store::{AppointmentStore, AttendanceStore, ClinicDirectory};
