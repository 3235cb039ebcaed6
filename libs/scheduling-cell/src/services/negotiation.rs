// libs/scheduling-cell/src/services/negotiation.rs
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use availability_cell::services::slots::{
    MAX_SLOT_DURATION_MINUTES, MIN_SLOT_DURATION_MINUTES,
};
use shared_models::actor::Actor;

use crate::models::{
    Appointment, AppointmentStatus, CancelAppointmentRequest, RequestRescheduleRequest,
    RespondRescheduleRequest, SchedulingError,
};
use crate::ports::{CreditEntryType, FinancialEvent};
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::locks;
use crate::services::{
    ensure_party, history_entry, required_reason, side_effect_metadata, SchedulingDeps,
};

/// Mid-flight window negotiation (reschedule proposals) and cancellation.
/// Both are party-only acts; admins intervene through confirm/reject or the
/// support tooling instead.
pub struct NegotiationService {
    deps: Arc<SchedulingDeps>,
}

impl NegotiationService {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    /// Either party proposes a new same-day window. The appointment parks in
    /// a reschedule-requested status until the other party responds.
    pub async fn request_reschedule(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: RequestRescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let reason = required_reason(&request.reason, "requesting a reschedule")?;
        self.validate_proposed_window(
            request.proposed_window_starts_at,
            request.proposed_window_ends_at,
        )?;

        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_party(actor, &appointment)?;

        let pending_status = if actor.role.is_client() {
            AppointmentStatus::RescheduleRequestedByClient
        } else {
            AppointmentStatus::RescheduleRequestedByProvider
        };
        AppointmentLifecycle::validate_transition(appointment.status, pending_status)?;

        let previous_status = appointment.status;
        let now = Utc::now();
        appointment.status = pending_status;
        appointment.proposed_window_starts_at = Some(request.proposed_window_starts_at);
        appointment.proposed_window_ends_at = Some(request.proposed_window_ends_at);
        appointment.reschedule_requested_at = Some(now);
        appointment.reschedule_requested_by = Some(actor.role);
        appointment.reschedule_request_reason = Some(reason.clone());
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                None,
                Some(actor.id),
                actor.role,
                Some(reason),
                None,
            ))
            .await;

        info!(
            "Reschedule requested on appointment {} by {} ({} to {})",
            appointment.id,
            actor.role,
            request.proposed_window_starts_at,
            request.proposed_window_ends_at
        );

        let counterparty = self.counterparty_of(&appointment, actor);
        self.deps
            .notify(
                counterparty,
                "Reschedule requested",
                "The other party proposed a new time window for your appointment.",
                None,
            )
            .await;

        Ok(appointment)
    }

    /// The opposite party accepts or rejects the proposal. Acceptance
    /// re-validates the slot under the appointment lock before swapping the
    /// window; rejection reverts to the status held before the request.
    pub async fn respond_reschedule(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: RespondRescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;

        let requested_by_client =
            appointment.status == AppointmentStatus::RescheduleRequestedByClient;
        let requested_by_provider =
            appointment.status == AppointmentStatus::RescheduleRequestedByProvider;
        if !requested_by_client && !requested_by_provider {
            return Err(SchedulingError::InvalidState(
                "no reschedule request is pending".to_string(),
            ));
        }

        if !actor.role.is_admin() {
            ensure_party(actor, &appointment)?;
            let actor_is_requester = (requested_by_client && actor.role.is_client())
                || (requested_by_provider && actor.role.is_provider());
            if actor_is_requester {
                return Err(SchedulingError::Forbidden(
                    "the requesting party cannot respond to its own reschedule".to_string(),
                ));
            }
        }

        let (Some(proposed_start), Some(proposed_end)) = (
            appointment.proposed_window_starts_at,
            appointment.proposed_window_ends_at,
        ) else {
            return Err(SchedulingError::InvalidState(
                "reschedule request has no proposed window".to_string(),
            ));
        };

        let previous_status = appointment.status;
        let now = Utc::now();

        if request.accept {
            // The proposed window may have been taken since the request; the
            // appointment's own current window is excluded from the check.
            let bookable = self
                .deps
                .availability
                .window_is_bookable(
                    appointment.provider_id,
                    proposed_start,
                    proposed_end,
                    Some(appointment.id),
                )
                .await?;
            if !bookable {
                return Err(SchedulingError::SlotUnavailable);
            }

            appointment.window_starts_at = proposed_start;
            appointment.window_ends_at = proposed_end;
            appointment.status = AppointmentStatus::RescheduleConfirmed;
            appointment.operational_status = Some(crate::models::OperationalStatus::OnTheWay);
            appointment.operational_status_updated_at = Some(now);
            appointment.operational_status_reason = None;
            self.clear_negotiation_fields(&mut appointment);
            appointment.updated_at = Some(now);

            self.deps.appointments.update(appointment.clone()).await?;
            self.deps
                .record_history(history_entry(
                    &appointment,
                    Some(previous_status),
                    None,
                    Some(actor.id),
                    actor.role,
                    Some("reschedule accepted".to_string()),
                    None,
                ))
                .await;

            info!(
                "Reschedule accepted on appointment {}; window now {} to {}",
                appointment.id, appointment.window_starts_at, appointment.window_ends_at
            );
        } else {
            let reason = required_reason(
                request.reason.as_deref().unwrap_or(""),
                "rejecting a reschedule",
            )?;

            let history = self.deps.appointments.history_for(appointment.id).await?;
            let revert_status =
                AppointmentLifecycle::revert_status_after_reschedule(&history, appointment.status);

            appointment.status = revert_status;
            self.clear_negotiation_fields(&mut appointment);
            appointment.updated_at = Some(now);

            self.deps.appointments.update(appointment.clone()).await?;
            self.deps
                .record_history(history_entry(
                    &appointment,
                    Some(previous_status),
                    None,
                    Some(actor.id),
                    actor.role,
                    Some(reason),
                    None,
                ))
                .await;

            info!(
                "Reschedule rejected on appointment {}; reverted to {}",
                appointment.id, appointment.status
            );
        }

        let counterparty = if requested_by_client {
            appointment.client_id
        } else {
            appointment.provider_id
        };
        let subject = if request.accept {
            "Reschedule accepted"
        } else {
            "Reschedule rejected"
        };
        self.deps
            .notify(counterparty, subject, "Your reschedule request was answered.", None)
            .await;

        Ok(appointment)
    }

    /// Party cancellation with mandatory reason. Refused once the provider
    /// has arrived and inside the minimum-notice window; fires the financial
    /// policy hook and reminder cancellation as isolated side effects.
    pub async fn cancel(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        let reason = required_reason(&request.reason, "cancelling an appointment")?;

        let appointment = {
            let _guard = self
                .deps
                .locks
                .acquire(&locks::appointment_key(appointment_id))
                .await;

            let mut appointment = self.deps.load_appointment(appointment_id).await?;
            ensure_party(actor, &appointment)?;

            let target = if actor.role.is_client() {
                AppointmentStatus::CancelledByClient
            } else {
                AppointmentStatus::CancelledByProvider
            };
            AppointmentLifecycle::validate_transition(appointment.status, target)?;

            let now = Utc::now();
            let notice = ChronoDuration::hours(self.deps.config.cancel_min_notice_hours);
            if appointment.window_starts_at <= now + notice {
                return Err(SchedulingError::PolicyViolation(format!(
                    "cancellation requires at least {} hours of notice",
                    self.deps.config.cancel_min_notice_hours
                )));
            }

            let previous_status = appointment.status;
            appointment.status = target;
            appointment.cancelled_at = Some(now);
            self.clear_negotiation_fields(&mut appointment);
            appointment.updated_at = Some(now);

            self.deps.appointments.update(appointment.clone()).await?;
            self.deps
                .record_history(history_entry(
                    &appointment,
                    Some(previous_status),
                    None,
                    Some(actor.id),
                    actor.role,
                    Some(reason.clone()),
                    None,
                ))
                .await;

            info!("Appointment {} cancelled by {}: {}", appointment.id, actor.role, reason);
            appointment
        };

        // Side effects run outside the lock and never fail the cancellation.
        if let Err(err) = self
            .deps
            .reminders
            .cancel_pending(appointment.id, "appointment cancelled")
            .await
        {
            warn!(
                "Reminder cancellation failed for appointment {}: {}",
                appointment.id, err
            );
        }

        let event = if actor.role.is_client() {
            FinancialEvent::ClientCancellation
        } else {
            FinancialEvent::ProviderCancellation
        };
        self.apply_financial_policy(&appointment, event).await;

        let counterparty = self.counterparty_of(&appointment, actor);
        self.deps
            .notify(
                counterparty,
                "Appointment cancelled",
                &format!("The appointment was cancelled: {}", reason),
                None,
            )
            .await;

        Ok(appointment)
    }

    /// Calculate the penalty/compensation breakdown for a cancellation or
    /// no-show event and post it to the provider credit ledger. Failures are
    /// logged and recorded in history, never surfaced to the caller.
    pub(crate) async fn apply_financial_policy(&self, appointment: &Appointment, event: FinancialEvent) {
        apply_financial_policy(&self.deps, appointment, event).await;
    }

    fn counterparty_of(&self, appointment: &Appointment, actor: Actor) -> Uuid {
        if actor.role.is_client() {
            appointment.provider_id
        } else {
            appointment.client_id
        }
    }

    fn clear_negotiation_fields(&self, appointment: &mut Appointment) {
        appointment.proposed_window_starts_at = None;
        appointment.proposed_window_ends_at = None;
        appointment.reschedule_requested_at = None;
        appointment.reschedule_requested_by = None;
        appointment.reschedule_request_reason = None;
    }

    fn validate_proposed_window(
        &self,
        starts_at: chrono::DateTime<Utc>,
        ends_at: chrono::DateTime<Utc>,
    ) -> Result<(), SchedulingError> {
        if ends_at <= starts_at {
            return Err(SchedulingError::InvalidWindow(
                "proposed window end must be after its start".to_string(),
            ));
        }

        let minutes = (ends_at - starts_at).num_minutes();
        if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&minutes) {
            return Err(SchedulingError::InvalidWindow(format!(
                "proposed window must be between {} and {} minutes",
                MIN_SLOT_DURATION_MINUTES, MAX_SLOT_DURATION_MINUTES
            )));
        }

        if starts_at.date_naive() != ends_at.date_naive() {
            return Err(SchedulingError::InvalidWindow(
                "proposed window must start and end on the same day".to_string(),
            ));
        }

        let now = Utc::now();
        let min_lead = ChronoDuration::hours(self.deps.config.reschedule_min_lead_hours);
        if starts_at < now + min_lead {
            return Err(SchedulingError::PolicyViolation(format!(
                "reschedule requires at least {} hours of lead time",
                self.deps.config.reschedule_min_lead_hours
            )));
        }

        let horizon = ChronoDuration::days(self.deps.config.reschedule_max_horizon_days);
        if starts_at > now + horizon {
            return Err(SchedulingError::PolicyViolation(format!(
                "reschedule cannot be more than {} days ahead",
                self.deps.config.reschedule_max_horizon_days
            )));
        }

        Ok(())
    }
}

/// Shared between cancellation and the expiry sweep (provider no-show).
pub(crate) async fn apply_financial_policy(
    deps: &SchedulingDeps,
    appointment: &Appointment,
    event: FinancialEvent,
) {
    let service_value_cents = match deps.service_requests.get(appointment.service_request_id).await {
        Ok(Some(request)) => request.current_value_cents,
        Ok(None) => 0,
        Err(err) => {
            warn!(
                "Financial policy skipped for appointment {}: service request load failed: {}",
                appointment.id, err
            );
            return;
        }
    };

    if service_value_cents <= 0 {
        tracing::debug!(
            "Financial policy skipped for appointment {}: no commercial value",
            appointment.id
        );
        return;
    }

    let breakdown = match deps
        .financial
        .calculate(event, service_value_cents, appointment.window_starts_at, Utc::now())
        .await
    {
        Ok(breakdown) => breakdown,
        Err(err) => {
            warn!(
                "Financial policy calculation failed for appointment {}: {}",
                appointment.id, err
            );
            deps.record_history(history_entry(
                appointment,
                Some(appointment.status),
                appointment.operational_status,
                None,
                shared_models::actor::ActorRole::System,
                Some("financial policy calculation failed".to_string()),
                Some(side_effect_metadata("financial_policy", &err.to_string())),
            ))
            .await;
            return;
        }
    };

    let (entry_type, amount_cents) = match event {
        FinancialEvent::ClientCancellation | FinancialEvent::ClientNoShow => {
            (CreditEntryType::Compensation, breakdown.compensation_cents)
        }
        FinancialEvent::ProviderCancellation | FinancialEvent::ProviderNoShow => {
            (CreditEntryType::Penalty, breakdown.penalty_cents)
        }
    };

    if amount_cents <= 0 {
        return;
    }

    if let Err(err) = deps
        .ledger
        .apply_mutation(
            appointment.provider_id,
            entry_type,
            amount_cents,
            &breakdown.memo,
            appointment.id,
        )
        .await
    {
        warn!(
            "Credit ledger mutation failed for appointment {}: {}",
            appointment.id, err
        );
        deps.record_history(history_entry(
            appointment,
            Some(appointment.status),
            appointment.operational_status,
            None,
            shared_models::actor::ActorRole::System,
            Some("credit ledger mutation failed".to_string()),
            Some(side_effect_metadata("credit_ledger", &err.to_string())),
        ))
        .await;
    } else {
        info!(
            "Financial policy applied for appointment {}: rule '{}', {:?} of {} cents",
            appointment.id, breakdown.rule_name, entry_type, amount_cents
        );
    }
}
