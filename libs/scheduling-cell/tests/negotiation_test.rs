// libs/scheduling-cell/tests/negotiation_test.rs
mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use uuid::Uuid;

use scheduling_cell::models::{
    AppointmentStatus, CancelAppointmentRequest, CreateAppointmentRequest, OperationalStatus,
    RequestRescheduleRequest, RespondRescheduleRequest, SchedulingError,
};
use shared_models::provider::PlanTier;

use common::{build_backend, client, provider, tomorrow_at};

struct Scenario {
    backend: common::TestBackend,
    provider_id: Uuid,
    client_id: Uuid,
    appointment_id: Uuid,
}

/// Booked and confirmed appointment for tomorrow 10:00 to 10:30.
async fn confirmed_scenario() -> Scenario {
    let backend = build_backend();
    let provider_id = backend.seed_provider(PlanTier::Bronze).await;
    let client_id = Uuid::new_v4();
    let request_id = backend.seed_service_request(client_id, provider_id, 30_000).await;

    let appointment = backend
        .scheduling
        .create(
            client(client_id),
            CreateAppointmentRequest {
                service_request_id: request_id,
                provider_id,
                window_starts_at: tomorrow_at(10, 0),
                window_ends_at: tomorrow_at(10, 30),
                reason: None,
            },
        )
        .await
        .unwrap();
    backend
        .scheduling
        .confirm(provider(provider_id), appointment.id)
        .await
        .unwrap();

    Scenario {
        backend,
        provider_id,
        client_id,
        appointment_id: appointment.id,
    }
}

#[tokio::test]
async fn full_reschedule_negotiation_replaces_the_window() {
    let scenario = confirmed_scenario().await;
    let backend = &scenario.backend;

    let requested = backend
        .negotiation
        .request_reschedule(
            client(scenario.client_id),
            scenario.appointment_id,
            RequestRescheduleRequest {
                proposed_window_starts_at: tomorrow_at(14, 0),
                proposed_window_ends_at: tomorrow_at(14, 30),
                reason: "stuck at work in the morning".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(requested.status, AppointmentStatus::RescheduleRequestedByClient);
    assert_eq!(requested.proposed_window_starts_at, Some(tomorrow_at(14, 0)));

    let accepted = backend
        .negotiation
        .respond_reschedule(
            provider(scenario.provider_id),
            scenario.appointment_id,
            RespondRescheduleRequest {
                accept: true,
                reason: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(accepted.status, AppointmentStatus::RescheduleConfirmed);
    assert_eq!(accepted.window_starts_at, tomorrow_at(14, 0));
    assert_eq!(accepted.window_ends_at, tomorrow_at(14, 30));
    assert_eq!(accepted.operational_status, Some(OperationalStatus::OnTheWay));
    assert_eq!(accepted.proposed_window_starts_at, None);
    assert_eq!(accepted.reschedule_requested_by, None);
}

#[tokio::test]
async fn rejecting_a_reschedule_reverts_to_the_prior_status() {
    let scenario = confirmed_scenario().await;
    let backend = &scenario.backend;

    backend
        .negotiation
        .request_reschedule(
            provider(scenario.provider_id),
            scenario.appointment_id,
            RequestRescheduleRequest {
                proposed_window_starts_at: tomorrow_at(16, 0),
                proposed_window_ends_at: tomorrow_at(16, 30),
                reason: "earlier job is running long".to_string(),
            },
        )
        .await
        .unwrap();

    // Rejection needs a reason.
    assert_matches!(
        backend
            .negotiation
            .respond_reschedule(
                client(scenario.client_id),
                scenario.appointment_id,
                RespondRescheduleRequest {
                    accept: false,
                    reason: None,
                },
            )
            .await,
        Err(SchedulingError::InvalidReason(_))
    );

    let reverted = backend
        .negotiation
        .respond_reschedule(
            client(scenario.client_id),
            scenario.appointment_id,
            RespondRescheduleRequest {
                accept: false,
                reason: Some("afternoon does not work for me".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(reverted.status, AppointmentStatus::Confirmed);
    assert_eq!(reverted.proposed_window_starts_at, None);
    assert_eq!(reverted.window_starts_at, tomorrow_at(10, 0));
}

#[tokio::test]
async fn the_requesting_party_cannot_answer_its_own_proposal() {
    let scenario = confirmed_scenario().await;
    let backend = &scenario.backend;

    backend
        .negotiation
        .request_reschedule(
            client(scenario.client_id),
            scenario.appointment_id,
            RequestRescheduleRequest {
                proposed_window_starts_at: tomorrow_at(14, 0),
                proposed_window_ends_at: tomorrow_at(14, 30),
                reason: "morning conflict".to_string(),
            },
        )
        .await
        .unwrap();

    assert_matches!(
        backend
            .negotiation
            .respond_reschedule(
                client(scenario.client_id),
                scenario.appointment_id,
                RespondRescheduleRequest {
                    accept: true,
                    reason: None,
                },
            )
            .await,
        Err(SchedulingError::Forbidden(_))
    );
}

#[tokio::test]
async fn reschedule_windows_honor_lead_time_and_horizon() {
    let scenario = confirmed_scenario().await;
    let backend = &scenario.backend;

    // Under the 2-hour lead. Runs shortly before midnight trip the same-day
    // rule instead, which is an equally valid refusal.
    let soon = Utc::now() + Duration::minutes(30);
    assert_matches!(
        backend
            .negotiation
            .request_reschedule(
                client(scenario.client_id),
                scenario.appointment_id,
                RequestRescheduleRequest {
                    proposed_window_starts_at: soon,
                    proposed_window_ends_at: soon + Duration::minutes(30),
                    reason: "asap please".to_string(),
                },
            )
            .await,
        Err(SchedulingError::PolicyViolation(_)) | Err(SchedulingError::InvalidWindow(_))
    );

    // Beyond the 30-day horizon.
    let far = (Utc::now() + Duration::days(45))
        .date_naive()
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc();
    assert_matches!(
        backend
            .negotiation
            .request_reschedule(
                client(scenario.client_id),
                scenario.appointment_id,
                RequestRescheduleRequest {
                    proposed_window_starts_at: far,
                    proposed_window_ends_at: far + Duration::minutes(30),
                    reason: "sometime next month".to_string(),
                },
            )
            .await,
        Err(SchedulingError::PolicyViolation(_))
    );
}

#[tokio::test]
async fn acceptance_revalidates_the_slot_at_response_time() {
    let scenario = confirmed_scenario().await;
    let backend = &scenario.backend;

    backend
        .negotiation
        .request_reschedule(
            client(scenario.client_id),
            scenario.appointment_id,
            RequestRescheduleRequest {
                proposed_window_starts_at: tomorrow_at(14, 0),
                proposed_window_ends_at: tomorrow_at(14, 30),
                reason: "afternoon preferred".to_string(),
            },
        )
        .await
        .unwrap();

    // Another booking takes the proposed window before the provider answers.
    let other_client = Uuid::new_v4();
    let other_request = backend
        .seed_service_request(other_client, scenario.provider_id, 20_000)
        .await;
    let competing = backend
        .scheduling
        .create(
            client(other_client),
            CreateAppointmentRequest {
                service_request_id: other_request,
                provider_id: scenario.provider_id,
                window_starts_at: tomorrow_at(14, 0),
                window_ends_at: tomorrow_at(14, 30),
                reason: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(competing.status, AppointmentStatus::PendingProviderConfirmation);

    assert_matches!(
        backend
            .negotiation
            .respond_reschedule(
                provider(scenario.provider_id),
                scenario.appointment_id,
                RespondRescheduleRequest {
                    accept: true,
                    reason: None,
                },
            )
            .await,
        Err(SchedulingError::SlotUnavailable)
    );
}

#[tokio::test]
async fn cancellation_enforces_notice_window_and_terminal_guards() {
    let backend = build_backend();
    let provider_id = backend.seed_provider(PlanTier::Bronze).await;
    let client_id = Uuid::new_v4();
    let request_id = backend.seed_service_request(client_id, provider_id, 30_000).await;

    // Confirmed appointment starting within the 2-hour notice window.
    let imminent = backend
        .seed_appointment(
            client_id,
            provider_id,
            request_id,
            AppointmentStatus::Confirmed,
            Some(OperationalStatus::OnTheWay),
            Utc::now() + Duration::hours(1),
            Utc::now() + Duration::hours(1) + Duration::minutes(30),
        )
        .await;

    assert_matches!(
        backend
            .negotiation
            .cancel(
                client(client_id),
                imminent.id,
                CancelAppointmentRequest {
                    reason: "change of plans".to_string()
                },
            )
            .await,
        Err(SchedulingError::PolicyViolation(_))
    );

    // Once the provider has arrived, cancellation is no longer possible.
    let arrived = backend
        .seed_appointment(
            client_id,
            provider_id,
            request_id,
            AppointmentStatus::Arrived,
            Some(OperationalStatus::OnSite),
            tomorrow_at(10, 0),
            tomorrow_at(10, 30),
        )
        .await;
    assert_matches!(
        backend
            .negotiation
            .cancel(
                client(client_id),
                arrived.id,
                CancelAppointmentRequest {
                    reason: "never mind".to_string()
                },
            )
            .await,
        Err(SchedulingError::InvalidState(_))
    );

    // A far-out confirmed appointment cancels cleanly.
    let cancellable = backend
        .seed_appointment(
            client_id,
            provider_id,
            request_id,
            AppointmentStatus::Confirmed,
            Some(OperationalStatus::OnTheWay),
            tomorrow_at(14, 0),
            tomorrow_at(14, 30),
        )
        .await;
    let cancelled = backend
        .negotiation
        .cancel(
            provider(provider_id),
            cancellable.id,
            CancelAppointmentRequest {
                reason: "equipment failure".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::CancelledByProvider);
    assert!(cancelled.cancelled_at.is_some());
}
