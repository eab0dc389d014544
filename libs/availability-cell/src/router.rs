// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::AvailabilityService;

#[derive(Clone)]
pub struct AvailabilityState {
    pub config: Arc<AppConfig>,
    pub service: Arc<AvailabilityService>,
}

pub fn availability_routes(state: AvailabilityState) -> Router {
    Router::new()
        .route(
            "/professionals/{professional_id}/availability",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/professionals/{professional_id}/availability/exceptions",
            get(handlers::list_exceptions).post(handlers::create_exception),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
