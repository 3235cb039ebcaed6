// libs/scheduling-cell/src/services/scope_change.rs
use std::cmp;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::actor::{Actor, ActorRole};

use crate::models::{
    Appointment, AppointmentStatus, CreateScopeChangeRequest, MediaKind,
    RegisterScopeChangeAttachmentRequest, RejectScopeChangeRequest, SchedulingError,
    ScopeChangeAttachment, ScopeChangeRequest, ScopeChangeStatus,
};
use crate::services::locks;
use crate::services::{
    ensure_client_or_admin, ensure_provider_or_admin, history_entry, required_reason,
    side_effect_metadata, SchedulingDeps,
};

/// Provider-initiated scope/value amendments requiring client approval.
/// Incremental values are capped by the provider's plan tier; at most one
/// request may be pending per appointment, and versions chain monotonically.
pub struct ScopeChangeService {
    deps: Arc<SchedulingDeps>,
}

impl ScopeChangeService {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    pub async fn create(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: CreateScopeChangeRequest,
    ) -> Result<ScopeChangeRequest, SchedulingError> {
        let reason = required_reason(&request.reason, "a scope change")?;

        let description = request.additional_scope_description.trim().to_string();
        if description.is_empty() {
            return Err(SchedulingError::InvalidValue(
                "additional scope description is required".to_string(),
            ));
        }

        if request.incremental_value_cents <= 0 {
            return Err(SchedulingError::InvalidValue(
                "incremental value must be positive".to_string(),
            ));
        }

        let _appointment_guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;

        if !in_active_execution(appointment.status) {
            return Err(SchedulingError::InvalidState(format!(
                "scope changes require an active appointment, current status is {}",
                appointment.status
            )));
        }

        let _request_guard = self
            .deps
            .locks
            .acquire(&locks::service_request_key(appointment.service_request_id))
            .await;

        let service_request = self
            .deps
            .load_service_request(appointment.service_request_id)
            .await?;
        let provider = self.deps.load_active_provider(appointment.provider_id).await?;

        let cap = self.deps.plan_cap(provider.plan_tier);
        let cap_cents = match service_request.accepted_proposal_value_cents() {
            Some(accepted) => cmp::min(
                cap.absolute_cap_cents,
                accepted * cap.percent_cap / 100,
            ),
            None => cap.absolute_cap_cents,
        };
        if request.incremental_value_cents > cap_cents {
            return Err(SchedulingError::PolicyViolation(format!(
                "incremental value exceeds the {} cent cap for the provider's plan",
                cap_cents
            )));
        }

        if let Some(mut pending) = self
            .deps
            .scope_changes
            .pending_by_appointment(appointment.id)
            .await?
        {
            if self.is_timed_out(&pending, Utc::now()) {
                expire_in_place(&self.deps, &appointment, &mut pending).await?;
            } else {
                return Err(SchedulingError::ScopeChangePending);
            }
        }

        let latest = self
            .deps
            .scope_changes
            .latest_by_appointment(appointment.id)
            .await?;
        let version = latest.as_ref().map(|l| l.version + 1).unwrap_or(1);
        let previous_version_id = latest.map(|l| l.id);

        let now = Utc::now();
        let scope_change = ScopeChangeRequest {
            id: Uuid::new_v4(),
            service_request_id: appointment.service_request_id,
            appointment_id: appointment.id,
            provider_id: appointment.provider_id,
            version,
            status: ScopeChangeStatus::PendingClientApproval,
            reason,
            additional_scope_description: description,
            incremental_value_cents: request.incremental_value_cents,
            requested_at: now,
            client_responded_at: None,
            client_response_reason: None,
            previous_version_id,
            attachments: Vec::new(),
            created_at: now,
            updated_at: None,
        };

        self.deps.scope_changes.insert(scope_change.clone()).await?;

        self.deps
            .record_history(history_entry(
                &appointment,
                Some(appointment.status),
                appointment.operational_status,
                Some(actor.id),
                actor.role,
                Some("scope change requested".to_string()),
                Some(json!({
                    "scope_change_id": scope_change.id,
                    "version": scope_change.version,
                    "incremental_value_cents": scope_change.incremental_value_cents,
                })),
            ))
            .await;

        info!(
            "Scope change {} (v{}) requested on appointment {} for {} cents",
            scope_change.id, scope_change.version, appointment.id, scope_change.incremental_value_cents
        );

        self.deps
            .notify(
                appointment.client_id,
                "Scope change awaiting your approval",
                &format!(
                    "The provider requested an additional {} cents: {}",
                    scope_change.incremental_value_cents, scope_change.additional_scope_description
                ),
                None,
            )
            .await;

        Ok(scope_change)
    }

    pub async fn add_attachment(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        scope_change_id: Uuid,
        request: RegisterScopeChangeAttachmentRequest,
    ) -> Result<ScopeChangeAttachment, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;

        let mut scope_change = self.load_scope_change(scope_change_id, appointment_id).await?;

        if scope_change.status != ScopeChangeStatus::PendingClientApproval {
            return Err(SchedulingError::InvalidState(
                "attachments are only accepted while client approval is pending".to_string(),
            ));
        }

        if scope_change.attachments.len() >= self.deps.config.scope_change_max_attachments {
            return Err(SchedulingError::PolicyViolation(format!(
                "a scope change carries at most {} attachments",
                self.deps.config.scope_change_max_attachments
            )));
        }

        if request.size_bytes <= 0
            || request.size_bytes > self.deps.config.scope_change_max_attachment_bytes
        {
            return Err(SchedulingError::InvalidValue(format!(
                "attachment size must be between 1 and {} bytes",
                self.deps.config.scope_change_max_attachment_bytes
            )));
        }

        if request.file_url.trim().is_empty() || request.file_name.trim().is_empty() {
            return Err(SchedulingError::InvalidValue(
                "attachment file url and name are required".to_string(),
            ));
        }

        let attachment = ScopeChangeAttachment {
            id: Uuid::new_v4(),
            scope_change_request_id: scope_change.id,
            uploaded_by: actor.id,
            file_url: request.file_url.trim().to_string(),
            file_name: request.file_name.trim().to_string(),
            media_kind: MediaKind::from_content_type(&request.content_type),
            content_type: request.content_type,
            size_bytes: request.size_bytes,
            created_at: Utc::now(),
        };

        scope_change.attachments.push(attachment.clone());
        scope_change.updated_at = Some(Utc::now());
        self.deps.scope_changes.update(scope_change).await?;

        Ok(attachment)
    }

    pub async fn approve(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        scope_change_id: Uuid,
    ) -> Result<ScopeChangeRequest, SchedulingError> {
        self.respond(actor, appointment_id, scope_change_id, None).await
    }

    pub async fn reject(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        scope_change_id: Uuid,
        request: RejectScopeChangeRequest,
    ) -> Result<ScopeChangeRequest, SchedulingError> {
        let reason = required_reason(&request.reason, "rejecting a scope change")?;
        self.respond(actor, appointment_id, scope_change_id, Some(reason))
            .await
    }

    /// Scope changes visible to the parties of a service request.
    pub async fn list_by_service_request(
        &self,
        actor: Actor,
        service_request_id: Uuid,
    ) -> Result<Vec<ScopeChangeRequest>, SchedulingError> {
        let service_request = self.deps.load_service_request(service_request_id).await?;

        let allowed = actor.role.is_admin()
            || (actor.role.is_client() && service_request.client_id == actor.id)
            || (actor.role.is_provider() && service_request.has_accepted_proposal_from(actor.id));
        if !allowed {
            return Err(SchedulingError::Forbidden(
                "only the parties of this service request may list its scope changes".to_string(),
            ));
        }

        Ok(self
            .deps
            .scope_changes
            .by_service_request(service_request_id)
            .await?)
    }

    /// `rejection_reason` of `None` approves, `Some` rejects.
    async fn respond(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        scope_change_id: Uuid,
        rejection_reason: Option<String>,
    ) -> Result<ScopeChangeRequest, SchedulingError> {
        let _appointment_guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_client_or_admin(actor, &appointment)?;

        let _request_guard = self
            .deps
            .locks
            .acquire(&locks::service_request_key(appointment.service_request_id))
            .await;

        let mut scope_change = self.load_scope_change(scope_change_id, appointment_id).await?;

        match scope_change.status {
            ScopeChangeStatus::PendingClientApproval => {}
            ScopeChangeStatus::Expired => return Err(SchedulingError::ScopeChangeExpired),
            other => {
                return Err(SchedulingError::InvalidState(format!(
                    "scope change was already resolved ({})",
                    other
                )))
            }
        }

        let now = Utc::now();
        if self.is_timed_out(&scope_change, now) {
            expire_in_place(&self.deps, &appointment, &mut scope_change).await?;
            return Err(SchedulingError::ScopeChangeExpired);
        }

        let approving = rejection_reason.is_none();
        scope_change.status = if approving {
            ScopeChangeStatus::ApprovedByClient
        } else {
            ScopeChangeStatus::RejectedByClient
        };
        scope_change.client_responded_at = Some(now);
        scope_change.client_response_reason = rejection_reason.clone();
        scope_change.updated_at = Some(now);

        self.deps.scope_changes.update(scope_change.clone()).await?;

        recalculate_totals(&self.deps, &appointment).await;

        self.deps
            .record_history(history_entry(
                &appointment,
                Some(appointment.status),
                appointment.operational_status,
                Some(actor.id),
                actor.role,
                rejection_reason.or_else(|| Some("scope change approved".to_string())),
                Some(json!({
                    "scope_change_id": scope_change.id,
                    "version": scope_change.version,
                    "status": scope_change.status,
                })),
            ))
            .await;

        info!(
            "Scope change {} on appointment {} is now {}",
            scope_change.id, appointment.id, scope_change.status
        );

        let subject = if approving {
            "Scope change approved"
        } else {
            "Scope change rejected"
        };
        self.deps
            .notify(appointment.provider_id, subject, "The client answered your scope change.", None)
            .await;

        Ok(scope_change)
    }

    async fn load_scope_change(
        &self,
        scope_change_id: Uuid,
        appointment_id: Uuid,
    ) -> Result<ScopeChangeRequest, SchedulingError> {
        self.deps
            .scope_changes
            .get(scope_change_id)
            .await?
            .filter(|sc| sc.appointment_id == appointment_id)
            .ok_or(SchedulingError::ScopeChangeNotFound)
    }

    fn is_timed_out(&self, scope_change: &ScopeChangeRequest, now: DateTime<Utc>) -> bool {
        is_timed_out(&self.deps, scope_change, now)
    }
}

pub(crate) fn in_active_execution(status: AppointmentStatus) -> bool {
    matches!(
        status,
        AppointmentStatus::Confirmed
            | AppointmentStatus::RescheduleConfirmed
            | AppointmentStatus::Arrived
            | AppointmentStatus::InProgress
    )
}

pub(crate) fn is_timed_out(
    deps: &SchedulingDeps,
    scope_change: &ScopeChangeRequest,
    now: DateTime<Utc>,
) -> bool {
    scope_change.status == ScopeChangeStatus::PendingClientApproval
        && scope_change.requested_at + ChronoDuration::hours(deps.config.scope_change_timeout_hours)
            <= now
}

/// Expire a stalled pending request under the locks the caller already holds.
/// Records the expiry in history, notifies both parties and refreshes the
/// commercial totals.
pub(crate) async fn expire_in_place(
    deps: &SchedulingDeps,
    appointment: &Appointment,
    scope_change: &mut ScopeChangeRequest,
) -> Result<(), SchedulingError> {
    let now = Utc::now();
    scope_change.status = ScopeChangeStatus::Expired;
    scope_change.client_responded_at = None;
    scope_change.updated_at = Some(now);
    deps.scope_changes.update(scope_change.clone()).await?;

    deps.record_history(history_entry(
        appointment,
        Some(appointment.status),
        appointment.operational_status,
        None,
        ActorRole::System,
        Some("scope change expired without client response".to_string()),
        Some(json!({
            "scope_change_id": scope_change.id,
            "version": scope_change.version,
        })),
    ))
    .await;

    info!(
        "Scope change {} on appointment {} expired without response",
        scope_change.id, appointment.id
    );

    recalculate_totals(deps, appointment).await;

    deps.notify(
        appointment.client_id,
        "Scope change expired",
        "A pending scope change expired without a response.",
        None,
    )
    .await;
    deps.notify(
        appointment.provider_id,
        "Scope change expired",
        "Your scope change request expired without a client response.",
        None,
    )
    .await;

    Ok(())
}

/// Refresh and persist the running commercial totals. Best-effort: a failed
/// recalculation leaves the previous totals in place and is recorded.
pub(crate) async fn recalculate_totals(deps: &SchedulingDeps, appointment: &Appointment) {
    match deps.commercial.recalculate(appointment.service_request_id).await {
        Ok(totals) => {
            if let Err(err) = deps
                .service_requests
                .update_commercial_totals(appointment.service_request_id, totals)
                .await
            {
                warn!(
                    "Commercial totals persist failed for request {}: {}",
                    appointment.service_request_id, err
                );
            }
        }
        Err(err) => {
            warn!(
                "Commercial recalculation failed for request {}: {}",
                appointment.service_request_id, err
            );
            deps.record_history(history_entry(
                appointment,
                Some(appointment.status),
                appointment.operational_status,
                None,
                ActorRole::System,
                Some("commercial recalculation failed".to_string()),
                Some(side_effect_metadata("commercial_recalculation", &err.to_string())),
            ))
            .await;
        }
    }
}
