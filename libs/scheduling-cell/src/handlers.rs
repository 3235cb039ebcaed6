// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::actor::Actor;

use crate::models::{
    AppointmentListQuery, CancelAppointmentRequest, ConfirmCompletionRequest,
    ContestCompletionRequest, CreateAppointmentRequest, CreateScopeChangeRequest,
    GenerateCompletionPinRequest, MarkArrivalRequest, RegisterScopeChangeAttachmentRequest,
    RejectAppointmentRequest, RejectScopeChangeRequest, RequestRescheduleRequest,
    RespondPresenceRequest, RespondRescheduleRequest, SchedulingError, StartExecutionRequest,
    UpdateOperationalStatusRequest, ValidateCompletionPinRequest,
};
use crate::services::booking::SchedulingService;
use crate::services::completion::CompletionService;
use crate::services::expiry::ExpirySweeper;
use crate::services::negotiation::NegotiationService;
use crate::services::operational::OperationalService;
use crate::services::scope_change::ScopeChangeService;

/// Shared handler state: one instance of each scheduling service, wired over
/// the same dependency bag at startup.
pub struct SchedulingState {
    pub scheduling: SchedulingService,
    pub negotiation: NegotiationService,
    pub operational: OperationalService,
    pub scope_changes: ScopeChangeService,
    pub completion: CompletionService,
    pub sweeper: ExpirySweeper,
}

// ==============================================================================
// APPOINTMENT LIFECYCLE HANDLERS
// ==============================================================================

pub async fn create_appointment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state.scheduling.create(actor, request).await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn list_my_appointments(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, SchedulingError> {
    let appointments = state.scheduling.list_my_appointments(actor, query).await?;
    Ok(Json(json!({ "success": true, "appointments": appointments })))
}

pub async fn get_appointment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state.scheduling.get_by_id(actor, appointment_id).await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn get_appointment_history(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let history = state.scheduling.get_history(actor, appointment_id).await?;
    Ok(Json(json!({ "success": true, "history": history })))
}

pub async fn confirm_appointment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state.scheduling.confirm(actor, appointment_id).await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn reject_appointment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RejectAppointmentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state.scheduling.reject(actor, appointment_id, request).await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn request_reschedule(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RequestRescheduleRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state
        .negotiation
        .request_reschedule(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn respond_reschedule(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RespondRescheduleRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state
        .negotiation
        .respond_reschedule(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn cancel_appointment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state.negotiation.cancel(actor, appointment_id, request).await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

// ==============================================================================
// OPERATIONAL HANDLERS
// ==============================================================================

pub async fn mark_arrived(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<MarkArrivalRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state
        .operational
        .mark_arrived(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn start_execution(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state
        .operational
        .start_execution(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn respond_presence(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RespondPresenceRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let appointment = state
        .operational
        .respond_presence(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

pub async fn update_operational_status(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateOperationalStatusRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let outcome = state
        .operational
        .update_operational_status(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({
        "success": true,
        "appointment": outcome.appointment,
        "completion": outcome.completion,
    })))
}

// ==============================================================================
// SCOPE-CHANGE HANDLERS
// ==============================================================================

pub async fn create_scope_change(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CreateScopeChangeRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let scope_change = state
        .scope_changes
        .create(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "scope_change": scope_change })))
}

pub async fn add_scope_change_attachment(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path((appointment_id, scope_change_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<RegisterScopeChangeAttachmentRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let attachment = state
        .scope_changes
        .add_attachment(actor, appointment_id, scope_change_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "attachment": attachment })))
}

pub async fn approve_scope_change(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path((appointment_id, scope_change_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, SchedulingError> {
    let scope_change = state
        .scope_changes
        .approve(actor, appointment_id, scope_change_id)
        .await?;
    Ok(Json(json!({ "success": true, "scope_change": scope_change })))
}

pub async fn reject_scope_change(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path((appointment_id, scope_change_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<RejectScopeChangeRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let scope_change = state
        .scope_changes
        .reject(actor, appointment_id, scope_change_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "scope_change": scope_change })))
}

pub async fn list_scope_changes(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(service_request_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let scope_changes = state
        .scope_changes
        .list_by_service_request(actor, service_request_id)
        .await?;
    Ok(Json(json!({ "success": true, "scope_changes": scope_changes })))
}

// ==============================================================================
// COMPLETION ACCEPTANCE HANDLERS
// ==============================================================================

pub async fn generate_completion_pin(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<GenerateCompletionPinRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let issued = state
        .completion
        .generate_pin(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({
        "success": true,
        "term": issued.term,
        "one_time_pin": issued.one_time_pin,
    })))
}

pub async fn validate_completion_pin(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ValidateCompletionPinRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let term = state
        .completion
        .validate_pin(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "term": term })))
}

pub async fn confirm_completion(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ConfirmCompletionRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let term = state
        .completion
        .confirm(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "term": term })))
}

pub async fn contest_completion(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<ContestCompletionRequest>,
) -> Result<Json<Value>, SchedulingError> {
    let term = state
        .completion
        .contest(actor, appointment_id, request)
        .await?;
    Ok(Json(json!({ "success": true, "term": term })))
}

pub async fn get_completion_term(
    State(state): State<Arc<SchedulingState>>,
    actor: Actor,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, SchedulingError> {
    let term = state.completion.get_term(actor, appointment_id).await?;
    Ok(Json(json!({ "success": true, "term": term })))
}
