// libs/availability-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::actor::Actor;

use crate::models::{
    AvailabilityError, CreateAvailabilityExceptionRequest, CreateAvailabilityRuleRequest,
    SlotsQuery,
};
use crate::services::schedule::AvailabilityService;

pub async fn get_overview(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AvailabilityError> {
    let overview = service.overview(actor, provider_id).await?;
    Ok(Json(json!({
        "success": true,
        "overview": overview,
    })))
}

pub async fn add_rule(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Json(request): Json<CreateAvailabilityRuleRequest>,
) -> Result<Json<Value>, AvailabilityError> {
    let rule = service.add_rule(actor, request).await?;
    Ok(Json(json!({
        "success": true,
        "rule": rule,
    })))
}

pub async fn remove_rule(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<Value>, AvailabilityError> {
    service.remove_rule(actor, rule_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn add_exception(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Json(request): Json<CreateAvailabilityExceptionRequest>,
) -> Result<Json<Value>, AvailabilityError> {
    let exception = service.add_exception(actor, request).await?;
    Ok(Json(json!({
        "success": true,
        "exception": exception,
    })))
}

pub async fn remove_exception(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Path(exception_id): Path<Uuid>,
) -> Result<Json<Value>, AvailabilityError> {
    service.remove_exception(actor, exception_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn get_slots(
    State(service): State<Arc<AvailabilityService>>,
    actor: Actor,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AvailabilityError> {
    let slots = service.available_slots(actor, query).await?;
    Ok(Json(json!({
        "success": true,
        "slots": slots,
    })))
}
