// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::{self, SchedulingState};

pub fn scheduling_routes(state: Arc<SchedulingState>) -> Router {
    Router::new()
        // Appointment lifecycle
        .route(
            "/",
            post(handlers::create_appointment).get(handlers::list_my_appointments),
        )
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/history", get(handlers::get_appointment_history))
        .route("/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/{appointment_id}/reject", post(handlers::reject_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::request_reschedule))
        .route(
            "/{appointment_id}/reschedule/respond",
            post(handlers::respond_reschedule),
        )
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        // Field execution
        .route("/{appointment_id}/arrival", post(handlers::mark_arrived))
        .route("/{appointment_id}/start", post(handlers::start_execution))
        .route("/{appointment_id}/presence", post(handlers::respond_presence))
        .route(
            "/{appointment_id}/operational-status",
            patch(handlers::update_operational_status),
        )
        // Scope changes
        .route("/{appointment_id}/scope-changes", post(handlers::create_scope_change))
        .route(
            "/{appointment_id}/scope-changes/{scope_change_id}/attachments",
            post(handlers::add_scope_change_attachment),
        )
        .route(
            "/{appointment_id}/scope-changes/{scope_change_id}/approve",
            post(handlers::approve_scope_change),
        )
        .route(
            "/{appointment_id}/scope-changes/{scope_change_id}/reject",
            post(handlers::reject_scope_change),
        )
        // Completion acceptance
        .route("/{appointment_id}/completion", get(handlers::get_completion_term))
        .route("/{appointment_id}/completion/pin", post(handlers::generate_completion_pin))
        .route(
            "/{appointment_id}/completion/pin/validate",
            post(handlers::validate_completion_pin),
        )
        .route(
            "/{appointment_id}/completion/confirm",
            post(handlers::confirm_completion),
        )
        .route(
            "/{appointment_id}/completion/contest",
            post(handlers::contest_completion),
        )
        .with_state(state)
}

/// Scope-change listing lives under the service-request path.
pub fn service_request_routes(state: Arc<SchedulingState>) -> Router {
    Router::new()
        .route(
            "/{service_request_id}/scope-changes",
            get(handlers::list_scope_changes),
        )
        .with_state(state)
}
