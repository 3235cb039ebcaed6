// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use availability_cell::services::slots::{
    MAX_SLOT_DURATION_MINUTES, MIN_SLOT_DURATION_MINUTES,
};
use shared_models::actor::{Actor, ActorRole};

use crate::models::{
    Appointment, AppointmentListQuery, AppointmentStatus, CreateAppointmentRequest,
    OperationalStatus, RejectAppointmentRequest, SchedulingError, ServiceRequestStatus,
};
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::locks;
use crate::services::{
    ensure_can_view, ensure_provider_or_admin, history_entry, optional_reason, required_reason,
    SchedulingDeps,
};

/// Books appointments and drives the provider confirmation step. Creation is
/// the only operation that takes the paired creation locks; everything after
/// it keys on the appointment id.
pub struct SchedulingService {
    deps: Arc<SchedulingDeps>,
}

impl SchedulingService {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    /// Reserve a window on the provider's calendar for a service request.
    ///
    /// Availability is read lock-free by callers picking a slot; the
    /// authoritative conflict check happens here, after the creation locks
    /// are held, so exactly one of two racing creations can win a window.
    pub async fn create(
        &self,
        actor: Actor,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        if actor.role == ActorRole::System {
            return Err(SchedulingError::Forbidden(
                "system actors cannot create appointments".to_string(),
            ));
        }

        let window_start = request.window_starts_at;
        let window_end = request.window_ends_at;

        if window_end <= window_start {
            return Err(SchedulingError::InvalidWindow(
                "window end must be after window start".to_string(),
            ));
        }

        let window_minutes = (window_end - window_start).num_minutes();
        if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES).contains(&window_minutes) {
            return Err(SchedulingError::InvalidWindow(format!(
                "window must be between {} and {} minutes",
                MIN_SLOT_DURATION_MINUTES, MAX_SLOT_DURATION_MINUTES
            )));
        }

        if window_start.date_naive() != window_end.date_naive() {
            return Err(SchedulingError::InvalidWindow(
                "window must start and end on the same day".to_string(),
            ));
        }

        if window_start < Utc::now() + ChronoDuration::minutes(1) {
            return Err(SchedulingError::InvalidWindow(
                "window must be in the future".to_string(),
            ));
        }

        self.deps.load_active_provider(request.provider_id).await?;

        if actor.role.is_provider() && actor.id != request.provider_id {
            return Err(SchedulingError::Forbidden(
                "providers may only create appointments for themselves".to_string(),
            ));
        }

        let service_request = self
            .deps
            .load_service_request(request.service_request_id)
            .await?;

        if actor.role.is_client() && service_request.client_id != actor.id {
            return Err(SchedulingError::Forbidden(
                "clients may only schedule their own service requests".to_string(),
            ));
        }

        if service_request.status.is_closed() {
            return Err(SchedulingError::RequestClosed);
        }

        if !service_request.has_accepted_proposal_from(request.provider_id) {
            return Err(SchedulingError::ProviderNotAssigned);
        }

        let day = window_start.date_naive();
        let provider_key = locks::provider_day_key(request.provider_id, day);
        let request_key = locks::request_day_key(request.service_request_id, day);

        debug!(
            "Acquiring creation locks for provider {} and request {} on {}",
            request.provider_id, request.service_request_id, day
        );
        let _guards = self.deps.locks.acquire_pair(&provider_key, &request_key).await;

        // Re-check under lock: another creation may have won the window.
        let request_appointments = self
            .deps
            .appointments
            .blocking_by_service_request(request.service_request_id)
            .await?;
        let conflicting = request_appointments
            .iter()
            .any(|a| a.window_starts_at < window_end && a.window_ends_at > window_start);
        if conflicting {
            return Err(SchedulingError::RequestWindowConflict);
        }

        let bookable = self
            .deps
            .availability
            .window_is_bookable(request.provider_id, window_start, window_end, None)
            .await?;
        if !bookable {
            return Err(SchedulingError::SlotUnavailable);
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            service_request_id: request.service_request_id,
            client_id: service_request.client_id,
            provider_id: request.provider_id,
            status: AppointmentStatus::PendingProviderConfirmation,
            window_starts_at: window_start,
            window_ends_at: window_end,
            expires_at: Some(now + ChronoDuration::hours(self.deps.config.confirmation_expiry_hours)),
            reason: optional_reason(request.reason.as_ref()),
            proposed_window_starts_at: None,
            proposed_window_ends_at: None,
            reschedule_requested_at: None,
            reschedule_requested_by: None,
            reschedule_request_reason: None,
            operational_status: None,
            operational_status_updated_at: None,
            operational_status_reason: None,
            confirmed_at: None,
            arrived_at: None,
            arrived_latitude: None,
            arrived_longitude: None,
            arrived_accuracy_meters: None,
            arrived_manual_reason: None,
            started_at: None,
            rejected_at: None,
            cancelled_at: None,
            completed_at: None,
            client_presence_confirmed: None,
            client_presence_responded_at: None,
            client_presence_reason: None,
            provider_presence_confirmed: None,
            provider_presence_responded_at: None,
            provider_presence_reason: None,
            no_show_risk_score: None,
            no_show_risk_level: None,
            no_show_risk_reasons: None,
            created_at: now,
            updated_at: None,
        };

        self.deps.appointments.insert(appointment.clone()).await?;

        self.deps
            .record_history(history_entry(
                &appointment,
                None,
                None,
                Some(actor.id),
                actor.role,
                Some("appointment created".to_string()),
                None,
            ))
            .await;

        if service_request.status != ServiceRequestStatus::Scheduled {
            self.deps
                .service_requests
                .update_status(service_request.id, ServiceRequestStatus::Scheduled)
                .await?;
        }

        drop(_guards);

        info!(
            "Appointment {} created for request {} with provider {} ({} to {})",
            appointment.id,
            appointment.service_request_id,
            appointment.provider_id,
            appointment.window_starts_at,
            appointment.window_ends_at
        );

        self.deps
            .notify(
                appointment.provider_id,
                "New appointment awaiting your confirmation",
                &format!(
                    "A visit was scheduled for {} to {}.",
                    appointment.window_starts_at, appointment.window_ends_at
                ),
                None,
            )
            .await;

        Ok(appointment)
    }

    /// Provider accepts the pending reservation; clears the confirmation SLA
    /// and opens the operational machine at `OnTheWay`.
    pub async fn confirm(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;
        AppointmentLifecycle::validate_transition(appointment.status, AppointmentStatus::Confirmed)?;

        let previous_status = appointment.status;
        let now = Utc::now();
        appointment.status = AppointmentStatus::Confirmed;
        appointment.confirmed_at = Some(now);
        appointment.expires_at = None;
        appointment.operational_status = Some(OperationalStatus::OnTheWay);
        appointment.operational_status_updated_at = Some(now);
        appointment.updated_at = Some(now);

        self.deps.appointments.update(appointment.clone()).await?;
        self.deps
            .record_history(history_entry(
                &appointment,
                Some(previous_status),
                None,
                Some(actor.id),
                actor.role,
                Some("appointment confirmed by provider".to_string()),
                None,
            ))
            .await;

        info!("Appointment {} confirmed", appointment.id);

        if let Err(err) = self
            .deps
            .reminders
            .schedule_for_appointment(appointment.id, "appointment confirmed")
            .await
        {
            tracing::warn!(
                "Reminder scheduling failed for appointment {}: {}",
                appointment.id,
                err
            );
        }

        self.deps
            .notify(
                appointment.client_id,
                "Your appointment was confirmed",
                &format!(
                    "The provider confirmed the visit from {} to {}.",
                    appointment.window_starts_at, appointment.window_ends_at
                ),
                None,
            )
            .await;

        Ok(appointment)
    }

    pub async fn reject(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: RejectAppointmentRequest,
    ) -> Result<Appointment, SchedulingError> {
        let reason = required_reason(&request.reason, "rejecting an appointment")?;

        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let mut appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;
        AppointmentLifecycle::validate_transition(
            appointment.status,
            AppointmentStatus::RejectedByProvider,
        )?;

        let previous_status = appointment.status;
        let now = Utc::now();
        appointment.status = AppointmentStatus::RejectedByProvider;
        appointment.rejected_at = Some(now);
        appointment.expires_at = None;
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

        info!("Appointment {} rejected: {}", appointment.id, reason);

        self.deps
            .notify(
                appointment.client_id,
                "Your appointment was declined",
                &format!("The provider declined the visit: {}", reason),
                None,
            )
            .await;

        Ok(appointment)
    }

    pub async fn get_by_id(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<Appointment, SchedulingError> {
        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_can_view(actor, &appointment)?;
        Ok(appointment)
    }

    pub async fn get_history(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<Vec<crate::models::AppointmentHistoryEntry>, SchedulingError> {
        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_can_view(actor, &appointment)?;
        Ok(self.deps.appointments.history_for(appointment_id).await?)
    }

    pub async fn list_my_appointments(
        &self,
        actor: Actor,
        query: AppointmentListQuery,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        let appointments = match actor.role {
            ActorRole::Provider => {
                self.deps
                    .appointments
                    .list_by_provider(actor.id, query.from, query.to)
                    .await?
            }
            ActorRole::Client => {
                self.deps
                    .appointments
                    .list_by_client(actor.id, query.from, query.to)
                    .await?
            }
            _ => Vec::new(),
        };
        Ok(appointments)
    }
}
