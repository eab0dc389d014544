// libs/availability-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_professional_scope;

use crate::models::{AvailabilityError, CreateAvailabilityExceptionRequest, CreateAvailabilityRuleRequest};
use crate::router::AvailabilityState;

#[derive(Debug, Deserialize)]
pub struct ExceptionDateQuery {
    pub date: NaiveDate,
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::OverlappingRule | AvailabilityError::DuplicateException(_) => {
                AppError::Conflict { message: err.to_string(), details: None }
            }
            AvailabilityError::ProfessionalNotFound => AppError::NotFound(err.to_string()),
            AvailabilityError::Database(msg) => AppError::Database(msg),
        }
    }
}

#[axum::debug_handler]
pub async fn list_rules(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_professional_scope(&user, professional_id)?;

    let rules = state.service.list_rules(professional_id).await?;

    Ok(Json(json!({
        "rules": rules,
        "total": rules.len()
    })))
}

#[axum::debug_handler]
pub async fn create_rule(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAvailabilityRuleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_professional_scope(&user, professional_id)?;

    let rule = state.service.create_rule(professional_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!(rule))))
}

#[axum::debug_handler]
pub async fn list_exceptions(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<ExceptionDateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_professional_scope(&user, professional_id)?;

    let exceptions = state.service.exceptions_for_date(professional_id, query.date).await?;

    Ok(Json(json!({
        "date": query.date,
        "exceptions": exceptions
    })))
}

#[axum::debug_handler]
pub async fn create_exception(
    State(state): State<AvailabilityState>,
    Path(professional_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAvailabilityExceptionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_professional_scope(&user, professional_id)?;

    let exception = state.service.create_exception(professional_id, request).await?;

    Ok((StatusCode::CREATED, Json(json!(exception))))
}
