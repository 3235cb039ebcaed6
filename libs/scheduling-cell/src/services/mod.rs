// libs/scheduling-cell/src/services/mod.rs
pub mod booking;
pub mod completion;
pub mod expiry;
pub mod lifecycle;
pub mod locks;
pub mod negotiation;
pub mod operational;
pub mod scope_change;

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use availability_cell::services::schedule::AvailabilityService;
use shared_config::AppConfig;
use shared_models::actor::{Actor, ActorRole};
use shared_models::provider::{PlanTier, ProviderDirectory, ProviderProfile};

use crate::models::{
    Appointment, AppointmentHistoryEntry, AppointmentStatus, OperationalStatus, SchedulingError,
    ServiceRequestSummary,
};
use crate::ports::{
    ChecklistValidator, CommercialValueRecalculator, CreditLedger, FinancialPolicyCalculator,
    NoShowTelemetry, NotificationSender, ReminderScheduler,
};
use crate::repo::{
    AppointmentRepository, CompletionTermRepository, ScopeChangeRepository,
    ServiceRequestRepository,
};
use crate::services::locks::LockRegistry;
use shared_config::PlanCap;

/// Everything the scheduling services need, wired once at startup and shared.
pub struct SchedulingDeps {
    pub appointments: Arc<dyn AppointmentRepository>,
    pub scope_changes: Arc<dyn ScopeChangeRepository>,
    pub completion_terms: Arc<dyn CompletionTermRepository>,
    pub service_requests: Arc<dyn ServiceRequestRepository>,
    pub providers: Arc<dyn ProviderDirectory>,
    pub availability: Arc<AvailabilityService>,
    pub locks: Arc<LockRegistry>,
    pub checklist: Arc<dyn ChecklistValidator>,
    pub reminders: Arc<dyn ReminderScheduler>,
    pub notifications: Arc<dyn NotificationSender>,
    pub telemetry: Arc<dyn NoShowTelemetry>,
    pub financial: Arc<dyn FinancialPolicyCalculator>,
    pub ledger: Arc<dyn CreditLedger>,
    pub commercial: Arc<dyn CommercialValueRecalculator>,
    pub config: AppConfig,
}

impl SchedulingDeps {
    pub(crate) async fn load_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        self.appointments
            .get(appointment_id)
            .await?
            .ok_or(SchedulingError::AppointmentNotFound)
    }

    pub(crate) async fn load_service_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<ServiceRequestSummary, SchedulingError> {
        self.service_requests
            .get(service_request_id)
            .await?
            .ok_or(SchedulingError::RequestNotFound)
    }

    pub(crate) async fn load_active_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<ProviderProfile, SchedulingError> {
        self.providers
            .get_provider(provider_id)
            .await?
            .filter(|p| p.active)
            .ok_or(SchedulingError::ProviderNotFound)
    }

    pub(crate) fn plan_cap(&self, tier: PlanTier) -> PlanCap {
        match tier {
            PlanTier::Bronze => self.config.plan_caps.bronze,
            PlanTier::Silver => self.config.plan_caps.silver,
            PlanTier::Gold => self.config.plan_caps.gold,
        }
    }

    /// History appends after a committed mutation are best-effort: the audit
    /// trail may lag but the aggregate is never rolled back over it.
    pub(crate) async fn record_history(&self, entry: AppointmentHistoryEntry) {
        let appointment_id = entry.appointment_id;
        if let Err(err) = self.appointments.append_history(entry).await {
            warn!(
                "History append failed for appointment {} (audit trail will lag): {}",
                appointment_id, err
            );
        }
    }

    pub(crate) async fn notify(
        &self,
        recipient_id: Uuid,
        subject: &str,
        body: &str,
        action_url: Option<&str>,
    ) {
        if let Err(err) = self
            .notifications
            .send(recipient_id, subject, body, action_url)
            .await
        {
            warn!("Notification '{}' to {} failed: {}", subject, recipient_id, err);
        }
    }
}

/// Actor must be admin, or the appointment's provider.
pub(crate) fn ensure_provider_or_admin(
    actor: Actor,
    appointment: &Appointment,
) -> Result<(), SchedulingError> {
    if actor.role.is_admin() {
        return Ok(());
    }
    if actor.role.is_provider() && actor.id == appointment.provider_id {
        return Ok(());
    }
    Err(SchedulingError::Forbidden(
        "only the assigned provider or an admin may perform this action".to_string(),
    ))
}

/// Actor must be admin, or the appointment's client.
pub(crate) fn ensure_client_or_admin(
    actor: Actor,
    appointment: &Appointment,
) -> Result<(), SchedulingError> {
    if actor.role.is_admin() {
        return Ok(());
    }
    if actor.role.is_client() && actor.id == appointment.client_id {
        return Ok(());
    }
    Err(SchedulingError::Forbidden(
        "only the client or an admin may perform this action".to_string(),
    ))
}

/// Actor must be one of the appointment's parties (client or provider).
pub(crate) fn ensure_party(actor: Actor, appointment: &Appointment) -> Result<(), SchedulingError> {
    let allowed = (actor.role.is_client() && actor.id == appointment.client_id)
        || (actor.role.is_provider() && actor.id == appointment.provider_id);
    if allowed {
        return Ok(());
    }
    Err(SchedulingError::Forbidden(
        "only a party to this appointment may perform this action".to_string(),
    ))
}

pub(crate) fn ensure_can_view(actor: Actor, appointment: &Appointment) -> Result<(), SchedulingError> {
    if actor.role.is_admin() {
        return Ok(());
    }
    ensure_party(actor, appointment)
}

pub(crate) fn history_entry(
    appointment: &Appointment,
    previous_status: Option<AppointmentStatus>,
    previous_operational_status: Option<OperationalStatus>,
    actor_id: Option<Uuid>,
    actor_role: ActorRole,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
) -> AppointmentHistoryEntry {
    AppointmentHistoryEntry {
        id: Uuid::new_v4(),
        appointment_id: appointment.id,
        previous_status,
        new_status: appointment.status,
        previous_operational_status,
        new_operational_status: appointment.operational_status,
        actor_id,
        actor_role,
        reason,
        metadata,
        occurred_at: Utc::now(),
    }
}

/// Trimmed, non-empty reason or a validation error.
pub(crate) fn required_reason(raw: &str, what: &str) -> Result<String, SchedulingError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SchedulingError::InvalidReason(format!(
            "{} requires a reason",
            what
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn optional_reason(raw: Option<&String>) -> Option<String> {
    raw.map(|r| r.trim().to_string()).filter(|r| !r.is_empty())
}

/// Metadata blob recording the outcome of a best-effort collaborator call in
/// the audit trail, so failures stay observable without failing transitions.
pub(crate) fn side_effect_metadata(kind: &str, detail: &str) -> serde_json::Value {
    serde_json::json!({ "side_effect": kind, "detail": detail })
}
