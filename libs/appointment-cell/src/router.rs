// libs/appointment-cell/src/router.rs
use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{self, AppState};

pub fn appointment_routes(state: AppState) -> Router {
    // Unauthenticated booking surface
    let public_routes = Router::new()
        .route("/public/clinics/{slug}/slots", get(handlers::list_public_slots))
        .route("/public/clinics/{slug}/bookings", post(handlers::create_public_booking));

    // Staff surface, scoped by clinic
    let staff_routes = Router::new()
        .route(
            "/clinics/{clinic_id}/appointments",
            post(handlers::create_appointment).get(handlers::list_appointments),
        )
        .route(
            "/clinics/{clinic_id}/appointments/{appointment_id}",
            get(handlers::get_appointment)
                .patch(handlers::update_appointment)
                .delete(handlers::delete_appointment),
        )
        .route(
            "/clinics/{clinic_id}/patients/{patient_id}/attendance",
            get(handlers::get_attendance),
        );

    Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .with_state(state)
}
