// libs/scheduling-cell/tests/completion_test.rs
mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use uuid::Uuid;

use scheduling_cell::models::{
    AppointmentStatus, CompletionMethod, CompletionTermStatus, ConfirmCompletionRequest,
    ContestCompletionRequest, GenerateCompletionPinRequest, OperationalStatus, SchedulingError,
    ServiceRequestStatus, ValidateCompletionPinRequest,
};
use shared_models::actor::{Actor, ActorRole};
use shared_models::provider::PlanTier;

use common::{build_backend, client, provider, tomorrow_at};

struct Scenario {
    backend: common::TestBackend,
    provider_id: Uuid,
    client_id: Uuid,
    request_id: Uuid,
    appointment_id: Uuid,
    pin: String,
}

/// Completed appointment with a freshly issued acceptance PIN.
async fn completed_scenario() -> Scenario {
    let backend = build_backend();
    let provider_id = backend.seed_provider(PlanTier::Bronze).await;
    let client_id = Uuid::new_v4();
    let request_id = backend.seed_service_request(client_id, provider_id, 40_000).await;

    let appointment = backend
        .seed_appointment(
            client_id,
            provider_id,
            request_id,
            AppointmentStatus::Completed,
            Some(OperationalStatus::Completed),
            tomorrow_at(10, 0),
            tomorrow_at(11, 0),
        )
        .await;

    let issued = backend
        .completion
        .generate_pin(
            provider(provider_id),
            appointment.id,
            GenerateCompletionPinRequest::default(),
        )
        .await
        .unwrap();

    Scenario {
        backend,
        provider_id,
        client_id,
        request_id,
        appointment_id: appointment.id,
        pin: issued.one_time_pin,
    }
}

fn wrong_pin(pin: &str) -> String {
    let first = pin.chars().next().unwrap();
    let flipped = if first == '9' { '0' } else { ((first as u8) + 1) as char };
    let mut wrong = String::new();
    wrong.push(flipped);
    wrong.push_str(&pin[1..]);
    wrong
}

#[tokio::test]
async fn correct_pin_accepts_the_term_and_completes_the_request() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;

    let term = backend
        .completion
        .validate_pin(
            client(scenario.client_id),
            scenario.appointment_id,
            ValidateCompletionPinRequest {
                pin: scenario.pin.clone(),
            },
        )
        .await
        .unwrap();

    assert_eq!(term.status, CompletionTermStatus::AcceptedByClient);
    assert_eq!(term.accepted_method, Some(CompletionMethod::Pin));
    assert!(term.accepted_at.is_some());
    assert_eq!(term.pin_hash, None);

    let request = backend
        .deps
        .service_requests
        .get(scenario.request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, ServiceRequestStatus::Completed);
}

#[tokio::test]
async fn repeated_failures_escalate_and_lock_the_pin() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;
    let bad_pin = wrong_pin(&scenario.pin);

    // Four misses leave the term pending with the counter advanced.
    for attempt in 1..=4 {
        let result = backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: bad_pin.clone(),
                },
            )
            .await;
        assert_matches!(result, Err(SchedulingError::InvalidPin));

        let term = backend
            .completion
            .get_term(client(scenario.client_id), scenario.appointment_id)
            .await
            .unwrap();
        assert_eq!(term.status, CompletionTermStatus::PendingClientAcceptance);
        assert_eq!(term.pin_failed_attempts, attempt);
    }

    // The fifth miss locks the protocol and escalates.
    assert_matches!(
        backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: bad_pin.clone(),
                },
            )
            .await,
        Err(SchedulingError::PinLocked)
    );

    let term = backend
        .completion
        .get_term(client(scenario.client_id), scenario.appointment_id)
        .await
        .unwrap();
    assert_eq!(term.status, CompletionTermStatus::EscalatedToAdmin);
    assert!(term.escalated_at.is_some());

    // Even the correct PIN is refused once escalated.
    assert_matches!(
        backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: scenario.pin.clone(),
                },
            )
            .await,
        Err(SchedulingError::PinLocked)
    );

    // The provider cannot revive an escalated PIN; an admin can.
    assert_matches!(
        backend
            .completion
            .generate_pin(
                provider(scenario.provider_id),
                scenario.appointment_id,
                GenerateCompletionPinRequest::default(),
            )
            .await,
        Err(SchedulingError::Forbidden(_))
    );

    let admin = Actor::new(Uuid::new_v4(), ActorRole::Admin);
    let reissued = backend
        .completion
        .generate_pin(
            admin,
            scenario.appointment_id,
            GenerateCompletionPinRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        reissued.term.status,
        CompletionTermStatus::PendingClientAcceptance
    );
    assert_eq!(reissued.term.pin_failed_attempts, 0);
    assert_eq!(reissued.term.escalated_at, None);

    backend
        .completion
        .validate_pin(
            client(scenario.client_id),
            scenario.appointment_id,
            ValidateCompletionPinRequest {
                pin: reissued.one_time_pin,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_pin_flags_the_term_until_a_fresh_one_is_issued() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;

    // Backdate the PIN expiry.
    let mut term = backend
        .completion
        .get_term(client(scenario.client_id), scenario.appointment_id)
        .await
        .unwrap();
    term.pin_expires_at = Some(Utc::now() - Duration::minutes(1));
    backend.deps.completion_terms.update(term).await.unwrap();

    assert_matches!(
        backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: scenario.pin.clone(),
                },
            )
            .await,
        Err(SchedulingError::PinExpired)
    );

    let term = backend
        .completion
        .get_term(client(scenario.client_id), scenario.appointment_id)
        .await
        .unwrap();
    assert_eq!(term.status, CompletionTermStatus::Expired);
    assert_eq!(term.pin_hash, None);

    // Re-issuing does not need force once the old PIN is gone.
    let reissued = backend
        .completion
        .generate_pin(
            provider(scenario.provider_id),
            scenario.appointment_id,
            GenerateCompletionPinRequest::default(),
        )
        .await
        .unwrap();

    let accepted = backend
        .completion
        .validate_pin(
            client(scenario.client_id),
            scenario.appointment_id,
            ValidateCompletionPinRequest {
                pin: reissued.one_time_pin,
            },
        )
        .await
        .unwrap();
    assert_eq!(accepted.status, CompletionTermStatus::AcceptedByClient);
}

#[tokio::test]
async fn signature_acceptance_works_regardless_of_pin_state() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;
    let bad_pin = wrong_pin(&scenario.pin);

    // Lock the PIN entirely.
    for _ in 0..5 {
        let _ = backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: bad_pin.clone(),
                },
            )
            .await;
    }

    // Too-short signature is rejected.
    assert_matches!(
        backend
            .completion
            .confirm(
                client(scenario.client_id),
                scenario.appointment_id,
                ConfirmCompletionRequest {
                    method: CompletionMethod::SignatureName,
                    pin: None,
                    signature_name: Some("Jo".to_string()),
                },
            )
            .await,
        Err(SchedulingError::InvalidValue(_))
    );

    let term = backend
        .completion
        .confirm(
            client(scenario.client_id),
            scenario.appointment_id,
            ConfirmCompletionRequest {
                method: CompletionMethod::SignatureName,
                pin: None,
                signature_name: Some("Joana Pereira".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(term.status, CompletionTermStatus::AcceptedByClient);
    assert_eq!(term.accepted_method, Some(CompletionMethod::SignatureName));
    assert_eq!(term.accepted_signature_name.as_deref(), Some("Joana Pereira"));
}

#[tokio::test]
async fn contest_moves_the_term_to_contested_and_closes_pin_validation() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;

    assert_matches!(
        backend
            .completion
            .contest(
                client(scenario.client_id),
                scenario.appointment_id,
                ContestCompletionRequest {
                    reason: "bad".to_string(),
                },
            )
            .await,
        Err(SchedulingError::InvalidReason(_))
    );

    let term = backend
        .completion
        .contest(
            client(scenario.client_id),
            scenario.appointment_id,
            ContestCompletionRequest {
                reason: "the leak is still there".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(term.status, CompletionTermStatus::ContestedByClient);
    assert!(term.contested_at.is_some());

    assert_matches!(
        backend
            .completion
            .validate_pin(
                client(scenario.client_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: scenario.pin.clone(),
                },
            )
            .await,
        Err(SchedulingError::InvalidState(_))
    );
}

#[tokio::test]
async fn only_the_client_may_accept_and_parties_may_read_the_term() {
    let scenario = completed_scenario().await;
    let backend = &scenario.backend;

    assert_matches!(
        backend
            .completion
            .validate_pin(
                provider(scenario.provider_id),
                scenario.appointment_id,
                ValidateCompletionPinRequest {
                    pin: scenario.pin.clone(),
                },
            )
            .await,
        Err(SchedulingError::Forbidden(_))
    );

    let term = backend
        .completion
        .get_term(provider(scenario.provider_id), scenario.appointment_id)
        .await
        .unwrap();
    assert_eq!(term.status, CompletionTermStatus::PendingClientAcceptance);

    assert_matches!(
        backend
            .completion
            .get_term(client(Uuid::new_v4()), scenario.appointment_id)
            .await,
        Err(SchedulingError::Forbidden(_))
    );
}
