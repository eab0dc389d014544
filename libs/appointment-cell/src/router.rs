// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{AppointmentBookingService, SlotBuilderService};
use crate::timezone::ClinicTimezone;

#[derive(Clone)]
pub struct SchedulingState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<AppointmentBookingService>,
    pub slots: Arc<SlotBuilderService>,
    pub timezone: ClinicTimezone,
}

pub fn appointment_routes(state: SchedulingState) -> Router {
    // Staff operations require a session
    let protected_routes = Router::new()
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/recurring", post(handlers::book_recurring))
        .route("/appointments/conflicts/check", post(handlers::check_conflict))
        .route("/appointments/conflicts/check-series", post(handlers::check_series))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/weekday", patch(handlers::shift_weekday))
        .route("/appointments/{appointment_id}/status", patch(handlers::update_status))
        .route("/appointments/{appointment_id}/links", post(handlers::issue_links))
        .route("/recurrences/preview", post(handlers::preview_recurrence))
        .route("/recurrences/{recurrence_id}/occurrences", get(handlers::recurrence_occurrences))
        .route("/recurrences/{recurrence_id}/exceptions", post(handlers::toggle_exception))
        .route("/professionals/{professional_id}/slots", get(handlers::professional_slots))
        .route("/schedule/overview", get(handlers::schedule_overview))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Patients follow links from messages without logging in
    let public_routes = Router::new()
        .route("/public/links/validate", get(handlers::validate_link))
        .route("/public/appointments/{action}", post(handlers::consume_link));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .with_state(state)
}
