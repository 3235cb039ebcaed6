// libs/scheduling-cell/src/services/expiry.rs
//
// Periodic sweeps for time-based policy windows: pending confirmations past
// their SLA and scope changes past their approval timeout. Each item is
// processed independently so one failure never blocks the rest of the batch,
// and the status re-check under the lock keeps repeated runs idempotent.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use shared_models::actor::ActorRole;

use crate::models::{AppointmentStatus, SchedulingError};
use crate::ports::FinancialEvent;
use crate::services::lifecycle::AppointmentLifecycle;
use crate::services::locks;
use crate::services::negotiation::apply_financial_policy;
use crate::services::{history_entry, scope_change, SchedulingDeps};

pub struct ExpirySweeper {
    deps: Arc<SchedulingDeps>,
}

impl ExpirySweeper {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    /// Expire appointments the provider never confirmed. Fires the provider
    /// no-show financial event for each one. Returns how many expired.
    pub async fn expire_pending_appointments(&self) -> Result<usize, SchedulingError> {
        let now = Utc::now();
        let batch = self
            .deps
            .appointments
            .expired_pending(now, self.deps.config.expiry_sweep_batch_size)
            .await?;

        let mut expired = 0usize;
        for stale in batch {
            match self.expire_one_appointment(stale.id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!("Expiry of appointment {} failed: {}", stale.id, err);
                }
            }
        }

        if expired > 0 {
            info!("Expired {} unconfirmed appointments", expired);
        }
        Ok(expired)
    }

    async fn expire_one_appointment(&self, appointment_id: uuid::Uuid) -> Result<bool, SchedulingError> {
        let appointment = {
            let _guard = self
                .deps
                .locks
                .acquire(&locks::appointment_key(appointment_id))
                .await;

            let mut appointment = self.deps.load_appointment(appointment_id).await?;

            // Re-check under the lock; a provider may have confirmed since
            // the batch was selected.
            let still_expired = appointment.status == AppointmentStatus::PendingProviderConfirmation
                && appointment.expires_at.is_some_and(|deadline| deadline <= Utc::now());
            if !still_expired {
                return Ok(false);
            }

            AppointmentLifecycle::validate_transition(
                appointment.status,
                AppointmentStatus::ExpiredWithoutProviderAction,
            )?;

            let previous_status = appointment.status;
            let now = Utc::now();
            appointment.status = AppointmentStatus::ExpiredWithoutProviderAction;
            appointment.expires_at = None;
            appointment.updated_at = Some(now);

            self.deps.appointments.update(appointment.clone()).await?;
            self.deps
                .record_history(history_entry(
                    &appointment,
                    Some(previous_status),
                    None,
                    None,
                    ActorRole::System,
                    Some("expired without provider confirmation".to_string()),
                    None,
                ))
                .await;

            appointment
        };

        if let Err(err) = self
            .deps
            .reminders
            .cancel_pending(appointment.id, "appointment expired")
            .await
        {
            warn!(
                "Reminder cancellation failed for expired appointment {}: {}",
                appointment.id, err
            );
        }

        apply_financial_policy(&self.deps, &appointment, FinancialEvent::ProviderNoShow).await;

        self.deps
            .notify(
                appointment.client_id,
                "Appointment expired",
                "The provider did not confirm your appointment in time.",
                None,
            )
            .await;
        self.deps
            .notify(
                appointment.provider_id,
                "Appointment expired",
                "An appointment expired because it was not confirmed in time.",
                None,
            )
            .await;

        Ok(true)
    }

    /// Expire scope changes past the client-approval timeout. This is the
    /// sweep that unblocks a completion stalled behind a pending amendment.
    pub async fn expire_pending_scope_changes(&self) -> Result<usize, SchedulingError> {
        let cutoff =
            Utc::now() - ChronoDuration::hours(self.deps.config.scope_change_timeout_hours);
        let batch = self
            .deps
            .scope_changes
            .expired_pending(cutoff, self.deps.config.expiry_sweep_batch_size)
            .await?;

        let mut expired = 0usize;
        for stale in batch {
            match self.expire_one_scope_change(stale.id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!("Expiry of scope change {} failed: {}", stale.id, err);
                }
            }
        }

        if expired > 0 {
            info!("Expired {} stalled scope changes", expired);
        }
        Ok(expired)
    }

    async fn expire_one_scope_change(
        &self,
        scope_change_id: uuid::Uuid,
    ) -> Result<bool, SchedulingError> {
        let mut stale = self
            .deps
            .scope_changes
            .get(scope_change_id)
            .await?
            .ok_or(SchedulingError::ScopeChangeNotFound)?;

        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(stale.appointment_id))
            .await;

        // Re-read under the lock; the client may have responded meanwhile.
        stale = self
            .deps
            .scope_changes
            .get(scope_change_id)
            .await?
            .ok_or(SchedulingError::ScopeChangeNotFound)?;
        if !scope_change::is_timed_out(&self.deps, &stale, Utc::now()) {
            return Ok(false);
        }

        let appointment = self.deps.load_appointment(stale.appointment_id).await?;
        scope_change::expire_in_place(&self.deps, &appointment, &mut stale).await?;
        Ok(true)
    }
}
