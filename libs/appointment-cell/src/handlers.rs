// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use chrono::{DateTime, NaiveDate, Utc};
use headers::{Header, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::error::AppError;
use shared_models::StaffContext;

use crate::models::{
    AppointmentError, CreateAppointmentRequest, PatientContact, PublicBookingRequest, TimeWindow,
    UpdateAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::public_booking::PublicBookingService;

#[derive(Clone)]
pub struct AppState {
    pub booking: Arc<AppointmentBookingService>,
    pub public_booking: Arc<PublicBookingService>,
}

// ==============================================================================
// HEADERS
// ==============================================================================

static IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
static ACTOR_ID: HeaderName = HeaderName::from_static("x-actor-id");

/// `Idempotency-Key` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub String);

impl Header for IdempotencyKey {
    fn name() -> &'static HeaderName {
        &IDEMPOTENCY_KEY
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let key = value.to_str().map_err(|_| headers::Error::invalid())?.trim();
        if key.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(IdempotencyKey(key.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}

/// `X-Actor-Id` request header naming the acting staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorId(pub Uuid);

impl Header for ActorId {
    fn name() -> &'static HeaderName {
        &ACTOR_ID
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let raw = value.to_str().map_err(|_| headers::Error::invalid())?;
        Uuid::parse_str(raw.trim())
            .map(ActorId)
            .map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(&self.0.to_string()) {
            values.extend(std::iter::once(value));
        }
    }
}

fn staff_context(clinic_id: Uuid, actor: Option<TypedHeader<ActorId>>) -> StaffContext {
    match actor {
        Some(TypedHeader(ActorId(actor_id))) => StaffContext::with_actor(clinic_id, actor_id),
        None => StaffContext::new(clinic_id),
    }
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let code = err.code();
        let message = err.message();

        match err {
            AppointmentError::ClinicNotFound(_)
            | AppointmentError::ServiceNotFound(_)
            | AppointmentError::NotFound(_) => AppError::not_found(code, message),

            AppointmentError::OverlappingAppointment { .. }
            | AppointmentError::DuplicateBooking
            | AppointmentError::IdempotencyInProgress
            | AppointmentError::InvalidStatusTransition { .. } => AppError::conflict(code, message),

            AppointmentError::PastAppointment
            | AppointmentError::DurationMismatch { .. }
            | AppointmentError::CancellationReasonRequired
            | AppointmentError::BookingInPast
            | AppointmentError::BookingLeadTimeViolation { .. }
            | AppointmentError::BookingAdvanceLimitViolation { .. }
            | AppointmentError::InvalidDuration(_) => AppError::validation(code, message),

            AppointmentError::InvalidTimeFormat(_) => AppError::bad_request(code, message),

            AppointmentError::InvalidTimezone(_) | AppointmentError::StoreError(_) => {
                AppError::internal(code, message)
            }
        }
    }
}

// ==============================================================================
// QUERY / BODY STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
    pub service_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct PublicBookingBody {
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub patient: PatientContact,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListAppointmentsQuery {
    pub staff_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

pub async fn list_public_slots(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state
        .booking
        .list_available_slots(&slug, query.date, query.service_id, Utc::now())
        .await?;

    Ok(Json(json!({
        "ok": true,
        "date": query.date,
        "slots": slots,
    })))
}

pub async fn create_public_booking(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    idempotency_key: Option<TypedHeader<IdempotencyKey>>,
    Json(body): Json<PublicBookingBody>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = PublicBookingRequest {
        clinic_slug: slug,
        service_id: body.service_id,
        start_time: body.start_time,
        patient: body.patient,
        notes: body.notes,
    };
    let key = idempotency_key.map(|TypedHeader(IdempotencyKey(key))| key);

    let outcome = state
        .public_booking
        .create_public_booking(request, key.as_deref(), Utc::now())
        .await?;

    let status = if outcome.replayed { StatusCode::OK } else { StatusCode::CREATED };
    debug!("Public booking {} (replayed: {})", outcome.confirmation.appointment_id, outcome.replayed);

    Ok((
        status,
        Json(json!({
            "ok": true,
            "replayed": outcome.replayed,
            "booking": outcome.confirmation,
        })),
    ))
}

// ==============================================================================
// STAFF HANDLERS
// ==============================================================================

pub async fn create_appointment(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
    actor: Option<TypedHeader<ActorId>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let ctx = staff_context(clinic_id, actor);
    let appointment = state.booking.create_appointment(&ctx, request, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(json!({ "ok": true, "appointment": appointment }))))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Path(clinic_id): Path<Uuid>,
    actor: Option<TypedHeader<ActorId>>,
    Query(query): Query<ListAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_context(clinic_id, actor);
    let appointments = state
        .booking
        .list_appointments(&ctx, query.staff_id, TimeWindow::new(query.from, query.to))
        .await?;

    Ok(Json(json!({ "ok": true, "appointments": appointments })))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
    actor: Option<TypedHeader<ActorId>>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_context(clinic_id, actor);
    let appointment = state.booking.get_appointment(&ctx, appointment_id).await?;

    Ok(Json(json!({ "ok": true, "appointment": appointment })))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
    actor: Option<TypedHeader<ActorId>>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_context(clinic_id, actor);
    let appointment = state
        .booking
        .update_appointment(&ctx, appointment_id, request, Utc::now())
        .await?;

    Ok(Json(json!({ "ok": true, "appointment": appointment })))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Path((clinic_id, appointment_id)): Path<(Uuid, Uuid)>,
    actor: Option<TypedHeader<ActorId>>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_context(clinic_id, actor);
    let appointment = state.booking.delete_appointment(&ctx, appointment_id, Utc::now()).await?;

    Ok(Json(json!({ "ok": true, "appointment": appointment })))
}

pub async fn get_attendance(
    State(state): State<AppState>,
    Path((clinic_id, patient_id)): Path<(Uuid, Uuid)>,
    actor: Option<TypedHeader<ActorId>>,
) -> Result<Json<Value>, AppError> {
    let ctx = staff_context(clinic_id, actor);
    let metrics = state.booking.attendance(&ctx, patient_id).await?;

    Ok(Json(json!({ "ok": true, "attendance": metrics })))
}
