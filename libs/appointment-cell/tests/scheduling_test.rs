mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::*;
use common::*;

// ==============================================================================
// SCHEDULING RULE VALIDATOR
// ==============================================================================

#[test]
fn test_overlap_rejected_unless_double_booking_allowed() {
    let validator = ConflictDetectionService::new();
    let staff = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
    let existing = vec![appointment(
        staff,
        Utc.with_ymd_and_hms(2026, 3, 10, 1, 0, 0).unwrap(),
        30,
        AppointmentStatus::Scheduled,
    )];
    let start = Utc.with_ymd_and_hms(2026, 3, 10, 1, 15, 0).unwrap();

    assert_matches!(
        validator.validate_scheduling_rules(start, 30, staff, now, &existing, None, false),
        Err(AppointmentError::OverlappingAppointment { conflicting_id }) if conflicting_id == existing[0].id
    );
    assert_eq!(
        validator.validate_scheduling_rules(start, 30, staff, now, &existing, None, true),
        Ok(Utc.with_ymd_and_hms(2026, 3, 10, 1, 45, 0).unwrap())
    );
}

#[test]
fn test_back_to_back_and_other_staff_do_not_conflict() {
    let validator = ConflictDetectionService::new();
    let staff = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
    let existing = vec![
        appointment(staff, Utc.with_ymd_and_hms(2026, 3, 10, 1, 0, 0).unwrap(), 30, AppointmentStatus::Scheduled),
        appointment(Uuid::new_v4(), Utc.with_ymd_and_hms(2026, 3, 10, 1, 30, 0).unwrap(), 30, AppointmentStatus::Scheduled),
        appointment(staff, Utc.with_ymd_and_hms(2026, 3, 10, 1, 30, 0).unwrap(), 30, AppointmentStatus::Cancelled),
    ];

    let start = Utc.with_ymd_and_hms(2026, 3, 10, 1, 30, 0).unwrap();
    assert!(validator
        .validate_scheduling_rules(start, 30, staff, now, &existing, None, false)
        .is_ok());
}

#[test]
fn test_validation_order_and_explicit_end() {
    let validator = ConflictDetectionService::new();
    let staff = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
    let past = now - Duration::hours(1);

    assert_eq!(
        validator.validate_scheduling_rules(past, 0, staff, now, &[], None, false),
        Err(AppointmentError::InvalidDuration(0))
    );
    assert_matches!(
        validator.validate_scheduling_rules(past, 30, staff, now, &[], Some(past + Duration::minutes(45)), false),
        Err(AppointmentError::DurationMismatch { .. })
    );
    assert_eq!(
        validator.validate_scheduling_rules(past, 30, staff, now, &[], None, false),
        Err(AppointmentError::PastAppointment)
    );

    let start = now + Duration::hours(2);
    assert_eq!(
        validator.validate_scheduling_rules(start, 30, staff, now, &[], Some(start + Duration::minutes(30)), false),
        Ok(start + Duration::minutes(30))
    );
}

// ==============================================================================
// STAFF APPOINTMENT SERVICE
// ==============================================================================

#[tokio::test]
async fn test_create_and_get_appointment() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);

    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();

    assert_eq!(created.status, AppointmentStatus::Scheduled);
    assert_eq!(created.source, AppointmentSource::Staff);
    assert_eq!(created.end_time, manila(2026, 3, 9, 10, 30));
    assert_eq!(harness.notifier.booked_count(), 1);

    let fetched = harness.booking.get_appointment(&ctx, created.id).await.unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn test_other_clinic_cannot_see_appointment() {
    let harness = TestHarness::new();
    let now = manila(2026, 3, 8, 12, 0);
    let created = harness
        .booking
        .create_appointment(&harness.ctx(), harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();

    let stranger = shared_models::StaffContext::new(Uuid::new_v4());
    assert_eq!(
        harness.booking.get_appointment(&stranger, created.id).await,
        Err(AppointmentError::NotFound(created.id))
    );
}

#[tokio::test]
async fn test_create_rejects_service_from_another_clinic() {
    let harness = TestHarness::new();
    let foreign = Service {
        id: Uuid::new_v4(),
        clinic_id: Uuid::new_v4(),
        name: "Elsewhere".to_string(),
        duration_minutes: 30,
        staff_id: Uuid::new_v4(),
    };
    harness.directory.insert_service(foreign.clone()).await;

    let mut request = harness.create_request(manila(2026, 3, 9, 10, 0));
    request.service_id = foreign.id;

    assert_eq!(
        harness.booking.create_appointment(&harness.ctx(), request, manila(2026, 3, 8, 12, 0)).await,
        Err(AppointmentError::ServiceNotFound(foreign.id))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_same_slot_book_once() {
    let harness = Arc::new(TestHarness::new());
    let now = manila(2026, 3, 8, 12, 0);
    let start = manila(2026, 3, 9, 10, 0);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                let request = harness.create_request(start);
                harness.booking.create_appointment(&harness.ctx(), request, now).await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppointmentError::OverlappingAppointment { .. })));
}

#[tokio::test]
async fn test_cancel_requires_reason_and_completed_is_terminal() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);
    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();

    assert_eq!(
        harness
            .booking
            .update_appointment(&ctx, created.id, UpdateAppointmentRequest::status(AppointmentStatus::Cancelled), now)
            .await,
        Err(AppointmentError::CancellationReasonRequired)
    );

    harness
        .booking
        .update_appointment(&ctx, created.id, UpdateAppointmentRequest::status(AppointmentStatus::Completed), now)
        .await
        .unwrap();

    for next in [AppointmentStatus::Scheduled, AppointmentStatus::Confirmed, AppointmentStatus::NoShow] {
        assert_matches!(
            harness
                .booking
                .update_appointment(&ctx, created.id, UpdateAppointmentRequest::status(next), now)
                .await,
            Err(AppointmentError::InvalidStatusTransition { from: AppointmentStatus::Completed, .. })
        );
    }
}

#[tokio::test]
async fn test_reschedule_excludes_itself_and_revalidates() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);

    let first = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();
    let second = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 11, 0)), now)
        .await
        .unwrap();

    // Moving by 15 minutes overlaps only its own old interval.
    let moved = harness
        .booking
        .update_appointment(
            &ctx,
            first.id,
            UpdateAppointmentRequest { start_time: Some(manila(2026, 3, 9, 10, 15)), ..Default::default() },
            now,
        )
        .await
        .unwrap();
    assert_eq!(moved.end_time, manila(2026, 3, 9, 10, 45));

    assert_matches!(
        harness
            .booking
            .update_appointment(
                &ctx,
                first.id,
                UpdateAppointmentRequest { start_time: Some(manila(2026, 3, 9, 10, 45)), ..Default::default() },
                now,
            )
            .await,
        Err(AppointmentError::OverlappingAppointment { conflicting_id }) if conflicting_id == second.id
    );
}

#[tokio::test]
async fn test_reschedule_of_terminal_appointment_fails() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);
    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();

    harness
        .booking
        .update_appointment(&ctx, created.id, UpdateAppointmentRequest::cancel("patient travelling"), now)
        .await
        .unwrap();

    assert_matches!(
        harness
            .booking
            .update_appointment(
                &ctx,
                created.id,
                UpdateAppointmentRequest { duration_minutes: Some(60), ..Default::default() },
                now,
            )
            .await,
        Err(AppointmentError::InvalidStatusTransition { from: AppointmentStatus::Cancelled, .. })
    );
}

#[tokio::test]
async fn test_deleted_appointment_is_hidden_and_frees_slot() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 1, 12, 0);
    let start = manila(2026, 3, 9, 10, 0);

    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(start), now)
        .await
        .unwrap();
    harness.booking.delete_appointment(&ctx, created.id, now).await.unwrap();

    assert_eq!(
        harness.booking.get_appointment(&ctx, created.id).await,
        Err(AppointmentError::NotFound(created.id))
    );
    assert_eq!(
        harness.booking.delete_appointment(&ctx, created.id, now).await,
        Err(AppointmentError::NotFound(created.id))
    );
    assert!(harness
        .booking
        .create_appointment(&ctx, harness.create_request(start), now)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_status_notification_failure_does_not_fail_update() {
    let harness = TestHarness::with_notifier(RecordingNotifier::failing());
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);

    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();
    let confirmed = harness
        .booking
        .update_appointment(&ctx, created.id, UpdateAppointmentRequest::status(AppointmentStatus::Confirmed), now)
        .await
        .unwrap();

    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert_eq!(harness.notifier.status_changes.lock().unwrap().len(), 1);
}

// ==============================================================================
// ATTENDANCE
// ==============================================================================

#[tokio::test]
async fn test_repeated_no_show_counts_once() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let created_at = manila(2026, 3, 8, 12, 0);
    let request = harness.create_request(manila(2026, 3, 9, 10, 0));
    let patient_id = request.patient_id;

    let created = harness.booking.create_appointment(&ctx, request, created_at).await.unwrap();
    let after = manila(2026, 3, 9, 11, 0);

    for _ in 0..3 {
        harness
            .booking
            .update_appointment(&ctx, created.id, UpdateAppointmentRequest::status(AppointmentStatus::NoShow), after)
            .await
            .unwrap();
    }

    let metrics = harness.booking.attendance(&ctx, patient_id).await.unwrap();
    assert_eq!(metrics.no_show_count, 1);
    assert_eq!(metrics.last_no_show_at, Some(after));
    assert_eq!(metrics.late_cancel_count, 0);
}

#[tokio::test]
async fn test_late_cancel_boundary() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 9, 9, 0);

    let soon_request = harness.create_request(now + Duration::hours(6));
    let soon_patient = soon_request.patient_id;
    let soon = harness.booking.create_appointment(&ctx, soon_request, now).await.unwrap();

    let later_request = harness.create_request(now + Duration::hours(40));
    let later_patient = later_request.patient_id;
    let later = harness.booking.create_appointment(&ctx, later_request, now).await.unwrap();

    for id in [soon.id, later.id] {
        harness
            .booking
            .update_appointment(&ctx, id, UpdateAppointmentRequest::cancel("schedule clash"), now)
            .await
            .unwrap();
    }

    let soon_metrics = harness.booking.attendance(&ctx, soon_patient).await.unwrap();
    let later_metrics = harness.booking.attendance(&ctx, later_patient).await.unwrap();
    assert_eq!(soon_metrics.late_cancel_count, 1);
    assert_eq!(soon_metrics.last_late_cancel_at, Some(now));
    assert_eq!(later_metrics.late_cancel_count, 0);
}

#[tokio::test]
async fn test_delete_counts_as_late_cancel_once() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 9, 9, 0);

    let request = harness.create_request(now + Duration::hours(3));
    let patient_id = request.patient_id;
    let created = harness.booking.create_appointment(&ctx, request, now).await.unwrap();

    harness
        .booking
        .update_appointment(&ctx, created.id, UpdateAppointmentRequest::cancel("feeling better"), now)
        .await
        .unwrap();
    harness.booking.delete_appointment(&ctx, created.id, now).await.unwrap();

    let second_request = harness.create_request(now + Duration::hours(5));
    let second_patient = second_request.patient_id;
    let second = harness.booking.create_appointment(&ctx, second_request, now).await.unwrap();
    harness.booking.delete_appointment(&ctx, second.id, now).await.unwrap();

    assert_eq!(harness.booking.attendance(&ctx, patient_id).await.unwrap().late_cancel_count, 1);
    assert_eq!(harness.booking.attendance(&ctx, second_patient).await.unwrap().late_cancel_count, 1);
}

#[tokio::test]
async fn test_attendance_is_created_lazily_and_resettable() {
    let tracker = AttendanceTracker::new(Arc::new(InMemoryAttendanceStore::new()), Duration::hours(24));
    let clinic_id = Uuid::new_v4();
    let patient_id = Uuid::new_v4();

    let fresh = tracker.metrics_for(clinic_id, patient_id).await.unwrap();
    assert_eq!(fresh, PatientAttendanceMetrics::empty(clinic_id, patient_id));

    let now = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();
    let mut missed = appointment(Uuid::new_v4(), now - Duration::hours(2), 30, AppointmentStatus::NoShow);
    missed.clinic_id = clinic_id;
    missed.patient_id = patient_id;

    assert!(tracker.record_no_show(&missed, now).await.unwrap());
    assert_eq!(tracker.metrics_for(clinic_id, patient_id).await.unwrap().no_show_count, 1);

    tracker.reset().await.unwrap();
    assert_eq!(tracker.metrics_for(clinic_id, patient_id).await.unwrap().no_show_count, 0);
    // Markers were cleared too.
    assert!(tracker.record_no_show(&missed, now).await.unwrap());
}

#[test]
fn test_started_appointment_is_never_a_late_cancel() {
    let tracker = AttendanceTracker::new(Arc::new(InMemoryAttendanceStore::new()), Duration::hours(24));
    let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();

    assert!(tracker.is_late_cancellation(now + Duration::hours(1), now));
    assert!(!tracker.is_late_cancellation(now, now));
    assert!(!tracker.is_late_cancellation(now - Duration::minutes(5), now));
    assert!(!tracker.is_late_cancellation(now + Duration::hours(24), now));
}

// ==============================================================================
// OVERFLOW & CONCURRENT UPDATES
// ==============================================================================

#[tokio::test]
async fn test_oversized_duration_is_rejected() {
    let harness = TestHarness::new();
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);
    let huge = i64::MAX / 2;

    let mut request = harness.create_request(manila(2026, 3, 9, 10, 0));
    request.duration_minutes = huge;
    assert_eq!(
        harness.booking.create_appointment(&ctx, request, now).await,
        Err(AppointmentError::InvalidDuration(huge))
    );

    let created = harness
        .booking
        .create_appointment(&ctx, harness.create_request(manila(2026, 3, 9, 10, 0)), now)
        .await
        .unwrap();
    assert_eq!(
        harness
            .booking
            .update_appointment(
                &ctx,
                created.id,
                UpdateAppointmentRequest { duration_minutes: Some(huge), ..Default::default() },
                now,
            )
            .await,
        Err(AppointmentError::InvalidDuration(huge))
    );

    let validator = ConflictDetectionService::new();
    assert_eq!(
        validator.validate_scheduling_rules(created.start_time, i64::MAX, created.staff_id, now, &[], None, false),
        Err(AppointmentError::InvalidDuration(i64::MAX))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_status_changes_apply_one_transition() {
    let harness = Arc::new(TestHarness::with_store_behaviour(StoreBehaviour::Yielding));
    let ctx = harness.ctx();
    let now = manila(2026, 3, 9, 9, 0);

    for round in 0..20 {
        let request = harness.create_request(now + Duration::hours(3) + Duration::minutes(30 * round));
        let patient_id = request.patient_id;
        let id = harness.booking.create_appointment(&ctx, request, now).await.unwrap().id;

        let cancel = {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .booking
                    .update_appointment(&ctx, id, UpdateAppointmentRequest::cancel("running late"), now)
                    .await
            })
        };
        let complete = {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .booking
                    .update_appointment(&ctx, id, UpdateAppointmentRequest::status(AppointmentStatus::Completed), now)
                    .await
            })
        };

        let cancelled = cancel.await.unwrap();
        let completed = complete.await.unwrap();
        assert_eq!(cancelled.is_ok() as u8 + completed.is_ok() as u8, 1, "round {}", round);

        let stored = harness.booking.get_appointment(&ctx, id).await.unwrap();
        let metrics = harness.booking.attendance(&ctx, patient_id).await.unwrap();
        if cancelled.is_ok() {
            assert_eq!(stored.status, AppointmentStatus::Cancelled);
            assert_eq!(metrics.late_cancel_count, 1);
        } else {
            assert_eq!(stored.status, AppointmentStatus::Completed);
            assert_eq!(metrics.late_cancel_count, 0);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reschedule_never_revives_cancelled_appointment() {
    let harness = Arc::new(TestHarness::with_store_behaviour(StoreBehaviour::Yielding));
    let ctx = harness.ctx();
    let now = manila(2026, 3, 8, 12, 0);

    for round in 0..20 {
        let day = manila(2026, 3, 9, 9, 0) + Duration::days(round);
        let id = harness
            .booking
            .create_appointment(&ctx, harness.create_request(day), now)
            .await
            .unwrap()
            .id;

        let cancel = {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .booking
                    .update_appointment(&ctx, id, UpdateAppointmentRequest::cancel("double booked"), now)
                    .await
            })
        };
        let reschedule = {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .booking
                    .update_appointment(
                        &ctx,
                        id,
                        UpdateAppointmentRequest { start_time: Some(day + Duration::hours(2)), ..Default::default() },
                        now,
                    )
                    .await
            })
        };

        assert!(cancel.await.unwrap().is_ok());
        let _ = reschedule.await.unwrap();

        let stored = harness.booking.get_appointment(&ctx, id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled, "round {}", round);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("double booked"));
    }
}
