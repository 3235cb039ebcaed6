// libs/scheduling-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{
    AppointmentHistoryEntry, AppointmentStatus, OperationalStatus, SchedulingError,
};

/// Transition tables for the two appointment state machines. The primary and
/// operational machines are kept separate and joined only at the defined sync
/// points (arrival, execution start, completion).
pub struct AppointmentLifecycle;

impl AppointmentLifecycle {
    pub fn valid_transitions(current: AppointmentStatus) -> Vec<AppointmentStatus> {
        match current {
            AppointmentStatus::PendingProviderConfirmation => vec![
                AppointmentStatus::Confirmed,
                AppointmentStatus::RejectedByProvider,
                AppointmentStatus::ExpiredWithoutProviderAction,
            ],
            AppointmentStatus::Confirmed | AppointmentStatus::RescheduleConfirmed => vec![
                AppointmentStatus::Arrived,
                AppointmentStatus::RescheduleRequestedByClient,
                AppointmentStatus::RescheduleRequestedByProvider,
                AppointmentStatus::CancelledByClient,
                AppointmentStatus::CancelledByProvider,
            ],
            // No cancellation once the provider is on site.
            AppointmentStatus::Arrived => vec![AppointmentStatus::InProgress],
            AppointmentStatus::InProgress => vec![AppointmentStatus::Completed],
            // Accept moves forward; reject reverts to the pre-negotiation status.
            AppointmentStatus::RescheduleRequestedByClient
            | AppointmentStatus::RescheduleRequestedByProvider => vec![
                AppointmentStatus::RescheduleConfirmed,
                AppointmentStatus::Confirmed,
            ],
            // Terminal states.
            AppointmentStatus::RejectedByProvider
            | AppointmentStatus::ExpiredWithoutProviderAction
            | AppointmentStatus::CancelledByClient
            | AppointmentStatus::CancelledByProvider
            | AppointmentStatus::Completed => vec![],
        }
    }

    pub fn validate_transition(
        current: AppointmentStatus,
        next: AppointmentStatus,
    ) -> Result<(), SchedulingError> {
        debug!("Validating status transition {} -> {}", current, next);

        if !Self::valid_transitions(current).contains(&next) {
            warn!("Invalid status transition attempted: {} -> {}", current, next);
            return Err(SchedulingError::InvalidState(format!(
                "cannot move from {} to {}",
                current, next
            )));
        }
        Ok(())
    }

    pub fn valid_operational_transitions(current: OperationalStatus) -> Vec<OperationalStatus> {
        match current {
            OperationalStatus::OnTheWay => vec![OperationalStatus::OnSite],
            OperationalStatus::OnSite => vec![OperationalStatus::InService],
            OperationalStatus::InService => vec![
                OperationalStatus::WaitingParts,
                OperationalStatus::Completed,
            ],
            OperationalStatus::WaitingParts => vec![OperationalStatus::InService],
            OperationalStatus::Completed => vec![],
        }
    }

    pub fn validate_operational_transition(
        current: Option<OperationalStatus>,
        next: OperationalStatus,
    ) -> Result<(), SchedulingError> {
        let Some(current) = current else {
            return Err(SchedulingError::InvalidState(
                "appointment has no operational status yet".to_string(),
            ));
        };

        if !Self::valid_operational_transitions(current).contains(&next) {
            warn!(
                "Invalid operational transition attempted: {} -> {}",
                current, next
            );
            return Err(SchedulingError::InvalidState(format!(
                "cannot move operational status from {} to {}",
                current, next
            )));
        }
        Ok(())
    }

    /// Primary status an operational transition drags the appointment to, at
    /// the machines' sync points.
    pub fn primary_sync_for(operational: OperationalStatus) -> Option<AppointmentStatus> {
        match operational {
            OperationalStatus::OnSite => Some(AppointmentStatus::Arrived),
            OperationalStatus::InService => Some(AppointmentStatus::InProgress),
            OperationalStatus::Completed => Some(AppointmentStatus::Completed),
            OperationalStatus::OnTheWay | OperationalStatus::WaitingParts => None,
        }
    }

    /// Status to revert to when a reschedule request is rejected: the
    /// previous status of the most recent history entry that put the
    /// appointment into the pending-reschedule status, defaulting to
    /// `Confirmed` when the trail has no usable entry.
    pub fn revert_status_after_reschedule(
        history: &[AppointmentHistoryEntry],
        pending_status: AppointmentStatus,
    ) -> AppointmentStatus {
        history
            .iter()
            .rev()
            .find(|entry| entry.new_status == pending_status)
            .and_then(|entry| entry.previous_status)
            .filter(|status| {
                matches!(
                    status,
                    AppointmentStatus::Confirmed | AppointmentStatus::RescheduleConfirmed
                )
            })
            .unwrap_or(AppointmentStatus::Confirmed)
    }
}
