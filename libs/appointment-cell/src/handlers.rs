// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{require_admin, require_professional_scope};

use crate::models::{
    AppointmentError, AppointmentStatusUpdateRequest, BookAppointmentRequest, ConflictCheck,
    ConflictCheckRequest, LinkAction, LinkCredentials, LinkRejection, LinkValidation,
    RecurrenceExceptionRequest, RecurrencePreviewRequest, RecurringBookingRequest,
    RescheduleAppointmentRequest, SeriesConflictCheckRequest, ShiftWeekdayRequest,
};
use crate::router::SchedulingState;
use crate::services::messages::{conflict_message, link_rejection_message, series_conflict_message};
use crate::services::recurrence::active_occurrence_count;
use crate::timezone::ClinicTimezone;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

/// Public link query. Signed links carry `id`, `expires` and `sig`; stored
/// tokens carry `token`.
#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub action: Option<String>,
    pub id: Option<Uuid>,
    pub expires: Option<i64>,
    pub sig: Option<String>,
    pub token: Option<String>,
}

impl LinkQuery {
    fn credentials(&self) -> LinkCredentials {
        LinkCredentials {
            id: self.id,
            expires: self.expires,
            sig: self.sig.clone(),
            token: self.token.clone(),
        }
    }
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

/// HTTP rendering of scheduling errors; conflict messages are given in clinic time.
pub fn scheduling_error(err: AppointmentError, timezone: &ClinicTimezone) -> AppError {
    match err {
        AppointmentError::Validation(msg) => AppError::ValidationError(msg),
        AppointmentError::RecurrenceValidation(e) => AppError::ValidationError(e.to_string()),
        AppointmentError::Conflict(conflict) => AppError::conflict(
            conflict_message(&conflict, timezone),
            json!({ "conflict": conflict }),
        ),
        AppointmentError::SeriesConflict(conflicts) => AppError::conflict(
            series_conflict_message(&conflicts, timezone),
            json!({ "conflicts": conflicts }),
        ),
        AppointmentError::InvalidStatusTransition { .. } | AppointmentError::StaleStatus => {
            AppError::Unprocessable(err.to_string())
        }
        AppointmentError::LinkRejected(rejection) => match rejection {
            LinkRejection::Expired | LinkRejection::AlreadyUsed => {
                AppError::Gone(link_rejection_message(rejection).to_string())
            }
            LinkRejection::Invalid => AppError::BadRequest(link_rejection_message(rejection).to_string()),
        },
        AppointmentError::NotFound | AppointmentError::RecurrenceNotFound => AppError::NotFound(err.to_string()),
        AppointmentError::Forbidden => AppError::Forbidden(err.to_string()),
        AppointmentError::Availability(e) => AppError::from(e),
        AppointmentError::Database(msg) => AppError::Database(msg),
    }
}

impl SchedulingState {
    fn reject(&self, err: AppointmentError) -> AppError {
        scheduling_error(err, &self.timezone)
    }
}

// ==============================================================================
// CONFLICT CHECK HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn check_conflict(
    State(state): State<SchedulingState>,
    Extension(user): Extension<User>,
    Json(request): Json<ConflictCheckRequest>,
) -> Result<Json<Value>, AppError> {
    require_professional_scope(&user, request.professional_id)?;

    let check = state.booking.check_conflict(&request).await.map_err(|e| state.reject(e))?;

    Ok(Json(match check {
        ConflictCheck::Free => json!({ "ok": true }),
        ConflictCheck::Conflict(conflict) => json!({
            "ok": false,
            "message": conflict_message(&conflict, &state.timezone),
            "conflict": conflict
        }),
    }))
}

#[axum::debug_handler]
pub async fn check_series(
    State(state): State<SchedulingState>,
    Extension(user): Extension<User>,
    Json(request): Json<SeriesConflictCheckRequest>,
) -> Result<Json<Value>, AppError> {
    require_professional_scope(&user, request.professional_id)?;

    let conflicts = state.booking.check_series(&request).await.map_err(|e| state.reject(e))?;

    Ok(Json(json!({
        "conflicts": conflicts,
        "total": conflicts.len()
    })))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<SchedulingState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_professional_scope(&user, request.professional_id)?;

    let response = state
        .booking
        .book_appointment(request, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok((StatusCode::CREATED, Json(json!(response))))
}

#[axum::debug_handler]
pub async fn book_recurring(
    State(state): State<SchedulingState>,
    Extension(user): Extension<User>,
    Json(request): Json<RecurringBookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_professional_scope(&user, request.professional_id)?;

    let response = state
        .booking
        .book_recurring(request, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok((StatusCode::CREATED, Json(json!(response))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<SchedulingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await.map_err(|e| state.reject(e))?;
    require_professional_scope(&user, appointment.professional_id)?;

    Ok(Json(json!({
        "appointment": appointment,
        "status_label": appointment.status.label()
    })))
}

/// Load the appointment only to check the caller may touch its agenda.
async fn authorize_appointment(state: &SchedulingState, user: &User, appointment_id: Uuid) -> Result<(), AppError> {
    let appointment = state.booking.get_appointment(appointment_id).await.map_err(|e| state.reject(e))?;
    require_professional_scope(user, appointment.professional_id)
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<SchedulingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    authorize_appointment(&state, &user, appointment_id).await?;

    let response = state
        .booking
        .reschedule(appointment_id, request, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn shift_weekday(
    State(state): State<SchedulingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<ShiftWeekdayRequest>,
) -> Result<Json<Value>, AppError> {
    authorize_appointment(&state, &user, appointment_id).await?;

    let response = state
        .booking
        .shift_weekday(appointment_id, request, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!(response)))
}

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<SchedulingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<AppointmentStatusUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    authorize_appointment(&state, &user, appointment_id).await?;

    let appointment = state
        .booking
        .change_status(appointment_id, request.status, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!({
        "appointment": appointment,
        "status_label": appointment.status.label()
    })))
}

#[axum::debug_handler]
pub async fn issue_links(
    State(state): State<SchedulingState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    authorize_appointment(&state, &user, appointment_id).await?;

    let links = state
        .booking
        .issue_links(appointment_id, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok((StatusCode::CREATED, Json(json!(links))))
}

// ==============================================================================
// RECURRENCE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn preview_recurrence(
    State(state): State<SchedulingState>,
    Extension(_user): Extension<User>,
    Json(request): Json<RecurrencePreviewRequest>,
) -> Result<Json<Value>, AppError> {
    let occurrences = state.booking.preview(&request).map_err(|e| state.reject(e))?;

    Ok(Json(json!({
        "occurrences": occurrences,
        "total": occurrences.len(),
        "active": active_occurrence_count(&occurrences)
    })))
}

#[axum::debug_handler]
pub async fn recurrence_occurrences(
    State(state): State<SchedulingState>,
    Path(recurrence_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let recurrence = state.booking.get_recurrence(recurrence_id).await.map_err(|e| state.reject(e))?;
    require_professional_scope(&user, recurrence.professional_id)?;

    let occurrences = state
        .booking
        .recurrence_occurrences(recurrence_id)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!({
        "recurrence": recurrence,
        "occurrences": occurrences,
        "active": active_occurrence_count(&occurrences)
    })))
}

#[axum::debug_handler]
pub async fn toggle_exception(
    State(state): State<SchedulingState>,
    Path(recurrence_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<RecurrenceExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    let recurrence = state.booking.get_recurrence(recurrence_id).await.map_err(|e| state.reject(e))?;
    require_professional_scope(&user, recurrence.professional_id)?;

    let updated = state
        .booking
        .toggle_exception(recurrence_id, request.date, request.skip, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!(updated)))
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn professional_slots(
    State(state): State<SchedulingState>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_professional_scope(&user, professional_id)?;

    let slots = state
        .slots
        .slots_for_day(professional_id, query.date)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(json!({
        "professional_id": professional_id,
        "date": query.date,
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn schedule_overview(
    State(state): State<SchedulingState>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let overview = state.slots.day_overview(query.date).await.map_err(|e| state.reject(e))?;

    Ok(Json(json!(overview)))
}

// ==============================================================================
// PUBLIC LINK HANDLERS
// ==============================================================================

fn parse_action(segment: Option<&str>) -> Result<LinkAction, AppError> {
    segment
        .and_then(LinkAction::from_path_segment)
        .ok_or_else(|| AppError::BadRequest(link_rejection_message(LinkRejection::Invalid).to_string()))
}

#[axum::debug_handler]
pub async fn validate_link(
    State(state): State<SchedulingState>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<Value>, AppError> {
    let action = parse_action(query.action.as_deref())?;

    let validation = state
        .booking
        .validate_link(&query.credentials(), action, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    Ok(Json(match validation {
        LinkValidation::Valid { appointment_id } => json!({
            "valid": true,
            "appointment_id": appointment_id
        }),
        LinkValidation::Rejected(reason) => {
            debug!("Public link rejected: {}", reason);
            json!({
                "valid": false,
                "reason": reason,
                "message": link_rejection_message(reason)
            })
        }
    }))
}

#[axum::debug_handler]
pub async fn consume_link(
    State(state): State<SchedulingState>,
    Path(action): Path<String>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<Value>, AppError> {
    let action = parse_action(Some(&action))?;

    let appointment = state
        .booking
        .consume_link(&query.credentials(), action, Utc::now())
        .await
        .map_err(|e| state.reject(e))?;

    let message = match action {
        LinkAction::Confirm => "Consulta confirmada",
        LinkAction::Cancel => "Consulta cancelada",
    };

    Ok(Json(json!({
        "appointment_id": appointment.id,
        "status": appointment.status,
        "status_label": appointment.status.label(),
        "message": message
    })))
}
