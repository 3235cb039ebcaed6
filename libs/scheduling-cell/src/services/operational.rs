// libs/scheduling-cell/src/services/operational.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::actor::Actor;

use crate::models::{
    Appointment, AppointmentStatus, MarkArrivalRequest, OperationalStatus,
    OperationalUpdateOutcome, RespondPresenceRequest, SchedulingError, StartExecutionRequest,
    UpdateOperationalStatusRequest,
};
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::locks;
use crate::services::{
    completion, ensure_party, ensure_provider_or_admin, history_entry, optional_reason,
    scope_change, SchedulingDeps,
};

/// Drives the field-execution sub-state machine: arrival, service start,
/// operational status changes and the completion barrier, plus the presence
/// confirmations that feed no-show telemetry.
pub struct OperationalService {
    deps: Arc<SchedulingDeps>,
}

impl OperationalService {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    /// Provider records on-site arrival, with GPS evidence or a manual
    /// justification.
    pub async fn mark_arrived(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: MarkArrivalRequest,
    ) -> Result<Appointment, SchedulingError> {
        let has_coordinates = request.latitude.is_some() && request.longitude.is_some();
        let manual_reason = optional_reason(request.manual_reason.as_ref());
        if !has_coordinates && manual_reason.is_none() {
            return Err(SchedulingError::InvalidReason(
                "arrival requires coordinates or a manual reason".to_string(),
            ));
        }

        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;
        AppointmentLifecycle::validate_transition(appointment.status, AppointmentStatus::Arrived)?;
        AppointmentLifecycle::validate_operational_transition(
            appointment.operational_status,
            OperationalStatus::OnSite,
        )?;

        let previous_status = appointment.status;
        let previous_operational = appointment.operational_status;
        let now = Utc::now();
        appointment.status = AppointmentStatus::Arrived;
        appointment.arrived_at = Some(now);
        appointment.arrived_latitude = request.latitude;
        appointment.arrived_longitude = request.longitude;
        appointment.arrived_accuracy_meters = request.accuracy_meters;
        appointment.arrived_manual_reason = manual_reason.clone();
        appointment.operational_status = Some(OperationalStatus::OnSite);
        appointment.operational_status_updated_at = Some(now);
        appointment.operational_status_reason = manual_reason;
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                previous_operational,
                Some(actor.id),
                actor.role,
                Some("provider arrived on site".to_string()),
                None,
            ))
            .await;

        info!("Appointment {}: provider arrived on site", appointment.id);

        self.deps
            .notify(
                appointment.client_id,
                "Provider on site",
                "The provider arrived at the service location.",
                None,
            )
            .await;

        Ok(appointment)
    }

    pub async fn start_execution(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: StartExecutionRequest,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;
        AppointmentLifecycle::validate_transition(appointment.status, AppointmentStatus::InProgress)?;
        AppointmentLifecycle::validate_operational_transition(
            appointment.operational_status,
            OperationalStatus::InService,
        )?;

        let previous_status = appointment.status;
        let previous_operational = appointment.operational_status;
        let now = Utc::now();
        appointment.status = AppointmentStatus::InProgress;
        appointment.started_at = Some(now);
        appointment.operational_status = Some(OperationalStatus::InService);
        appointment.operational_status_updated_at = Some(now);
        appointment.operational_status_reason = optional_reason(request.reason.as_ref());
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                previous_operational,
                Some(actor.id),
                actor.role,
                Some("service execution started".to_string()),
                None,
            ))
            .await;

        info!("Appointment {}: execution started", appointment.id);

        self.deps
            .notify(
                appointment.client_id,
                "Service started",
                "The provider started working on your request.",
                None,
            )
            .await;

        Ok(appointment)
    }

    /// Either party records whether they will be present. Independent of the
    /// primary machine; allowed in any non-terminal state.
    pub async fn respond_presence(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: RespondPresenceRequest,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_party(actor, &appointment)?;

        if appointment.status.is_terminal() {
            return Err(SchedulingError::InvalidState(
                "presence cannot be recorded on a closed appointment".to_string(),
            ));
        }

        let now = Utc::now();
        let reason = optional_reason(request.reason.as_ref());
        if actor.role.is_client() {
            appointment.client_presence_confirmed = Some(request.confirmed);
            appointment.client_presence_responded_at = Some(now);
            appointment.client_presence_reason = reason.clone();
        } else {
            appointment.provider_presence_confirmed = Some(request.confirmed);
            appointment.provider_presence_responded_at = Some(now);
            appointment.provider_presence_reason = reason.clone();
        }
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(appointment.status),
                appointment.operational_status,
                Some(actor.id),
                actor.role,
                reason.clone(),
                Some(json!({ "presence_confirmed": request.confirmed, "responded_by": actor.role })),
            ))
            .await;

        if let Err(err) = self
            .deps
            .telemetry
            .record_presence_response(appointment.id, actor.role, request.confirmed, reason.as_deref())
            .await
        {
            warn!(
                "No-show telemetry failed for appointment {}: {}",
                appointment.id, err
            );
        }

        Ok(appointment)
    }

    /// Advance the operational machine. Transitions into OnSite/InService
    /// drag the primary status along; Completed additionally passes the
    /// checklist and pending-amendment gates atomically under the
    /// appointment and service-request locks, then issues the acceptance
    /// PIN.
    pub async fn update_operational_status(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: UpdateOperationalStatusRequest,
    ) -> Result<OperationalUpdateOutcome, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;

        if appointment.status.is_terminal() {
            return Err(SchedulingError::InvalidState(
                "operational status cannot change on a closed appointment".to_string(),
            ));
        }

        AppointmentLifecycle::validate_operational_transition(
            appointment.operational_status,
            request.status,
        )?;

        if request.status == OperationalStatus::Completed {
            return self.complete(actor, appointment, request).await;
        }

        let previous_status = appointment.status;
        let previous_operational = appointment.operational_status;
        let now = Utc::now();
        let reason = optional_reason(request.reason.as_ref());

        // Sync point: entering OnSite or InService advances the primary
        // machine when it is still behind.
        if let Some(primary) = AppointmentLifecycle::primary_sync_for(request.status) {
            if appointment.status != primary {
                AppointmentLifecycle::validate_transition(appointment.status, primary)?;
                appointment.status = primary;
                match primary {
                    AppointmentStatus::Arrived if appointment.arrived_at.is_none() => {
                        appointment.arrived_at = Some(now);
                    }
                    AppointmentStatus::InProgress if appointment.started_at.is_none() => {
                        appointment.started_at = Some(now);
                    }
                    _ => {}
                }
            }
        }

        appointment.operational_status = Some(request.status);
        appointment.operational_status_updated_at = Some(now);
        appointment.operational_status_reason = reason.clone();
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                previous_operational,
                Some(actor.id),
                actor.role,
                reason,
                None,
            ))
            .await;

        info!(
            "Appointment {}: operational status now {}",
            appointment.id, request.status
        );

        Ok(OperationalUpdateOutcome {
            appointment,
            completion: None,
        })
    }

    /// The completion barrier. Holds the service-request lock (acquired
    /// after the appointment lock, preserving the global order) while the
    /// checklist and amendment gates are evaluated, so no amendment can
    /// slip in between the check and the transition.
    async fn complete(
        &self,
        actor: Actor,
        mut appointment: Appointment,
        request: UpdateOperationalStatusRequest,
    ) -> Result<OperationalUpdateOutcome, SchedulingError> {
        let _request_guard = self
            .deps
            .locks
            .acquire(&locks::service_request_key(appointment.service_request_id))
            .await;

        let gate = self
            .deps
            .checklist
            .validate_required_items(appointment.id)
            .await
            .map_err(|err| SchedulingError::Repository(err.to_string()))?;
        if !gate.can_complete {
            return Err(SchedulingError::PolicyViolation(format!(
                "required checklist items are pending: {}",
                gate.pending_item_names.join(", ")
            )));
        }

        if let Some(mut pending) = self
            .deps
            .scope_changes
            .pending_by_appointment(appointment.id)
            .await?
        {
            if scope_change::is_timed_out(&self.deps, &pending, Utc::now()) {
                // A stalled amendment stops blocking once its timeout has
                // passed; expire it and retry the gate against the new state.
                scope_change::expire_in_place(&self.deps, &appointment, &mut pending).await?;
            } else {
                return Err(SchedulingError::ScopeChangePending);
            }
        }

        AppointmentLifecycle::validate_transition(appointment.status, AppointmentStatus::Completed)?;

        let previous_status = appointment.status;
        let previous_operational = appointment.operational_status;
        let now = Utc::now();
        appointment.status = AppointmentStatus::Completed;
        appointment.completed_at = Some(now);
        appointment.operational_status = Some(OperationalStatus::Completed);
        appointment.operational_status_updated_at = Some(now);
        appointment.operational_status_reason = optional_reason(request.reason.as_ref());
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                previous_operational,
                Some(actor.id),
                actor.role,
                Some("service completed".to_string()),
                None,
            ))
            .await;

        info!("Appointment {} completed", appointment.id);

        // The primary transition is committed; a failed PIN issuance must not
        // undo it. The provider can reissue through the completion endpoint.
        let completion = match completion::issue_term(&self.deps, &appointment, actor.role, Some(actor.id)).await
        {
            Ok(issued) => Some(issued),
            Err(err) => {
                warn!(
                    "Completion PIN issuance failed for appointment {}: {}",
                    appointment.id, err
                );
                None
            }
        };

        Ok(OperationalUpdateOutcome {
            appointment,
            completion,
        })
    }
}
