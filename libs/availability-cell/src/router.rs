// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers;
use crate::services::schedule::AvailabilityService;

pub fn availability_routes(service: Arc<AvailabilityService>) -> Router {
    Router::new()
        .route("/slots", get(handlers::get_slots))
        .route("/providers/{provider_id}/overview", get(handlers::get_overview))
        .route("/rules", post(handlers::add_rule))
        .route("/rules/{rule_id}", delete(handlers::remove_rule))
        .route("/exceptions", post(handlers::add_exception))
        .route("/exceptions/{exception_id}", delete(handlers::remove_exception))
        .with_state(service)
}
