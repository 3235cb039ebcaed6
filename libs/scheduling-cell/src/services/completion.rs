// libs/scheduling-cell/src/services/completion.rs
//
// One-time-PIN / signed-name acceptance of work completion. Only the salted
// hash of a PIN is ever stored; the plaintext appears exactly once in the
// issuance result and in the outbound client notification.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use ring::constant_time;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::actor::{Actor, ActorRole};

use crate::models::{
    Appointment, CompletionMethod, CompletionPinIssued, CompletionTerm, CompletionTermStatus,
    ConfirmCompletionRequest, ContestCompletionRequest, GenerateCompletionPinRequest,
    SchedulingError, ServiceRequestStatus, ValidateCompletionPinRequest,
};
use crate::services::locks;
use crate::services::{ensure_can_view, ensure_provider_or_admin, history_entry, SchedulingDeps};

pub struct CompletionService {
    deps: Arc<SchedulingDeps>,
}

impl CompletionService {
    pub fn new(deps: Arc<SchedulingDeps>) -> Self {
        Self { deps }
    }

    /// Issue (or reissue) the acceptance PIN for a completed appointment.
    /// Regeneration resets the failed-attempt counter and clears prior
    /// contest/escalation state; an escalated term only an admin can revive.
    pub async fn generate_pin(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: GenerateCompletionPinRequest,
    ) -> Result<CompletionPinIssued, SchedulingError> {
        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_provider_or_admin(actor, &appointment)?;

        if appointment.completed_at.is_none() {
            return Err(SchedulingError::InvalidState(
                "completion acceptance requires a completed appointment".to_string(),
            ));
        }

        if let Some(term) = self.deps.completion_terms.by_appointment(appointment.id).await? {
            match term.status {
                CompletionTermStatus::AcceptedByClient => {
                    return Err(SchedulingError::InvalidState(
                        "the completion was already accepted".to_string(),
                    ));
                }
                CompletionTermStatus::EscalatedToAdmin if !actor.role.is_admin() => {
                    return Err(SchedulingError::Forbidden(
                        "an escalated completion PIN can only be regenerated by an admin"
                            .to_string(),
                    ));
                }
                CompletionTermStatus::PendingClientAcceptance => {
                    let pin_still_valid = term
                        .pin_expires_at
                        .is_some_and(|expiry| expiry > Utc::now());
                    if pin_still_valid && !request.force_regenerate {
                        return Err(SchedulingError::PolicyViolation(
                            "a valid PIN already exists; pass force_regenerate to replace it"
                                .to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }

        issue_term(&self.deps, &appointment, actor.role, Some(actor.id)).await
    }

    /// Client submits the PIN. Matching accepts the term; a mismatch counts
    /// against the lockout budget and the final miss escalates to admin.
    pub async fn validate_pin(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: ValidateCompletionPinRequest,
    ) -> Result<CompletionTerm, SchedulingError> {
        let _appointment_guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        self.ensure_accepting_client(actor, &appointment)?;

        let _request_guard = self
            .deps
            .locks
            .acquire(&locks::service_request_key(appointment.service_request_id))
            .await;

        let mut term = self
            .deps
            .completion_terms
            .by_appointment(appointment.id)
            .await?
            .ok_or(SchedulingError::TermNotFound)?;

        match term.status {
            CompletionTermStatus::PendingClientAcceptance => {}
            CompletionTermStatus::EscalatedToAdmin => return Err(SchedulingError::PinLocked),
            CompletionTermStatus::Expired => return Err(SchedulingError::PinExpired),
            CompletionTermStatus::AcceptedByClient => {
                return Err(SchedulingError::InvalidState(
                    "the completion was already accepted".to_string(),
                ));
            }
            CompletionTermStatus::ContestedByClient => {
                return Err(SchedulingError::InvalidState(
                    "the completion was contested; PIN validation is closed".to_string(),
                ));
            }
        }

        let now = Utc::now();
        if term.pin_expires_at.map_or(true, |expiry| expiry <= now) {
            term.status = CompletionTermStatus::Expired;
            term.pin_hash = None;
            term.pin_expires_at = None;
            term.updated_at = Some(now);
            self.deps.completion_terms.update(term).await?;

            self.deps
                .record_history(history_entry(
                    &appointment,
                    Some(appointment.status),
                    appointment.operational_status,
                    Some(actor.id),
                    actor.role,
                    Some("completion PIN expired".to_string()),
                    None,
                ))
                .await;

            return Err(SchedulingError::PinExpired);
        }

        let Some(stored_hash) = term.pin_hash.clone() else {
            return Err(SchedulingError::PinExpired);
        };

        let submitted_hash = hash_pin(appointment.id, request.pin.trim());
        let matches =
            constant_time::verify_slices_are_equal(submitted_hash.as_bytes(), stored_hash.as_bytes())
                .is_ok();

        if !matches {
            term.pin_failed_attempts += 1;
            term.updated_at = Some(now);

            if term.pin_failed_attempts >= self.deps.config.completion_pin_max_attempts {
                term.status = CompletionTermStatus::EscalatedToAdmin;
                term.escalated_at = Some(now);
                term.pin_hash = None;
                term.pin_expires_at = None;
                self.deps.completion_terms.update(term).await?;

                self.deps
                    .record_history(history_entry(
                        &appointment,
                        Some(appointment.status),
                        appointment.operational_status,
                        Some(actor.id),
                        actor.role,
                        Some("completion PIN locked after repeated failures".to_string()),
                        None,
                    ))
                    .await;

                warn!(
                    "Completion PIN for appointment {} locked after {} failed attempts",
                    appointment.id, self.deps.config.completion_pin_max_attempts
                );
                self.fan_out_to_admins(
                    &appointment,
                    "Completion PIN escalated",
                    "A completion PIN was locked after repeated failed attempts.",
                )
                .await;

                return Err(SchedulingError::PinLocked);
            }

            self.deps.completion_terms.update(term).await?;
            return Err(SchedulingError::InvalidPin);
        }

        self.accept(&appointment, term, actor, CompletionMethod::Pin, None)
            .await
    }

    /// Acceptance entry point that supports both methods. The signed-name
    /// path stays open to the client regardless of PIN state.
    pub async fn confirm(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: ConfirmCompletionRequest,
    ) -> Result<CompletionTerm, SchedulingError> {
        match request.method {
            CompletionMethod::Pin => {
                let pin = request.pin.clone().ok_or_else(|| {
                    SchedulingError::InvalidValue("PIN is required for PIN acceptance".to_string())
                })?;
                self.validate_pin(actor, appointment_id, ValidateCompletionPinRequest { pin })
                    .await
            }
            CompletionMethod::SignatureName => {
                let name = request
                    .signature_name
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string();
                if name.chars().count() < 3 {
                    return Err(SchedulingError::InvalidValue(
                        "signature name must have at least 3 characters".to_string(),
                    ));
                }

                let _appointment_guard = self
                    .deps
                    .locks
                    .acquire(&locks::appointment_key(appointment_id))
                    .await;

                let appointment = self.deps.load_appointment(appointment_id).await?;
                self.ensure_accepting_client(actor, &appointment)?;

                let _request_guard = self
                    .deps
                    .locks
                    .acquire(&locks::service_request_key(appointment.service_request_id))
                    .await;

                let term = self
                    .deps
                    .completion_terms
                    .by_appointment(appointment.id)
                    .await?
                    .ok_or(SchedulingError::TermNotFound)?;

                if term.status == CompletionTermStatus::AcceptedByClient {
                    return Err(SchedulingError::InvalidState(
                        "the completion was already accepted".to_string(),
                    ));
                }

                self.accept(
                    &appointment,
                    term,
                    actor,
                    CompletionMethod::SignatureName,
                    Some(name),
                )
                .await
            }
        }
    }

    /// Client disputes the completion; all admins are notified for manual
    /// review.
    pub async fn contest(
        &self,
        actor: Actor,
        appointment_id: Uuid,
        request: ContestCompletionRequest,
    ) -> Result<CompletionTerm, SchedulingError> {
        let reason = request.reason.trim().to_string();
        if reason.chars().count() < 5 {
            return Err(SchedulingError::InvalidReason(
                "contest reason must have at least 5 characters".to_string(),
            ));
        }

        let _guard = self
            .deps
            .locks
            .acquire(&locks::appointment_key(appointment_id))
            .await;

        let appointment = self.deps.load_appointment(appointment_id).await?;
        self.ensure_accepting_client(actor, &appointment)?;

        let mut term = self
            .deps
            .completion_terms
            .by_appointment(appointment.id)
            .await?
            .ok_or(SchedulingError::TermNotFound)?;

        match term.status {
            CompletionTermStatus::AcceptedByClient => {
                return Err(SchedulingError::InvalidState(
                    "an accepted completion cannot be contested".to_string(),
                ));
            }
            CompletionTermStatus::ContestedByClient => {
                return Err(SchedulingError::InvalidState(
                    "the completion was already contested".to_string(),
                ));
            }
            _ => {}
        }

        let now = Utc::now();
        term.status = CompletionTermStatus::ContestedByClient;
        term.contest_reason = Some(reason.clone());
        term.contested_at = Some(now);
        term.updated_at = Some(now);
        self.deps.completion_terms.update(term.clone()).await?;

        self.deps
            .record_history(history_entry(
                &appointment,
                Some(appointment.status),
                appointment.operational_status,
                Some(actor.id),
                actor.role,
                Some(reason.clone()),
                Some(json!({ "completion_term_id": term.id, "contested": true })),
            ))
            .await;

        info!("Completion of appointment {} contested: {}", appointment.id, reason);

        self.fan_out_to_admins(
            &appointment,
            "Completion contested",
            &format!("A client contested a completion: {}", reason),
        )
        .await;

        Ok(term)
    }

    pub async fn get_term(
        &self,
        actor: Actor,
        appointment_id: Uuid,
    ) -> Result<CompletionTerm, SchedulingError> {
        let appointment = self.deps.load_appointment(appointment_id).await?;
        ensure_can_view(actor, &appointment)?;

        self.deps
            .completion_terms
            .by_appointment(appointment.id)
            .await?
            .ok_or(SchedulingError::TermNotFound)
    }

    async fn accept(
        &self,
        appointment: &Appointment,
        mut term: CompletionTerm,
        actor: Actor,
        method: CompletionMethod,
        signature_name: Option<String>,
    ) -> Result<CompletionTerm, SchedulingError> {
        let now = Utc::now();
        term.status = CompletionTermStatus::AcceptedByClient;
        term.accepted_method = Some(method);
        term.accepted_signature_name = signature_name;
        term.accepted_at = Some(now);
        term.pin_hash = None;
        term.pin_expires_at = None;
        term.updated_at = Some(now);
        self.deps.completion_terms.update(term.clone()).await?;

        // Acceptance closes the whole service request.
        self.deps
            .service_requests
            .update_status(appointment.service_request_id, ServiceRequestStatus::Completed)
            .await?;

        self.deps
            .record_history(history_entry(
                appointment,
                Some(appointment.status),
                appointment.operational_status,
                Some(actor.id),
                actor.role,
                Some("completion accepted by client".to_string()),
                Some(json!({ "completion_term_id": term.id, "method": method })),
            ))
            .await;

        info!(
            "Completion of appointment {} accepted via {:?}",
            appointment.id, method
        );

        self.deps
            .notify(
                appointment.provider_id,
                "Completion accepted",
                "The client accepted the service completion.",
                None,
            )
            .await;

        Ok(term)
    }

    fn ensure_accepting_client(
        &self,
        actor: Actor,
        appointment: &Appointment,
    ) -> Result<(), SchedulingError> {
        if actor.role.is_client() && actor.id == appointment.client_id {
            return Ok(());
        }
        Err(SchedulingError::Forbidden(
            "only the client may respond to a completion term".to_string(),
        ))
    }

    async fn fan_out_to_admins(&self, appointment: &Appointment, subject: &str, body: &str) {
        match self.deps.providers.admin_user_ids().await {
            Ok(admins) => {
                for admin_id in admins {
                    self.deps.notify(admin_id, subject, body, None).await;
                }
            }
            Err(err) => warn!(
                "Admin fan-out skipped for appointment {}: {}",
                appointment.id, err
            ),
        }
    }
}

/// Create or reset the completion term for a completed appointment and issue
/// a fresh PIN. Callers hold the appointment lock.
pub(crate) async fn issue_term(
    deps: &SchedulingDeps,
    appointment: &Appointment,
    actor_role: ActorRole,
    actor_id: Option<Uuid>,
) -> Result<CompletionPinIssued, SchedulingError> {
    let service_request = deps.load_service_request(appointment.service_request_id).await?;

    let now = Utc::now();
    let pin = generate_pin(deps.config.completion_pin_length);
    let pin_hash = hash_pin(appointment.id, &pin);
    let pin_expires_at = now + ChronoDuration::minutes(deps.config.completion_pin_ttl_minutes);

    let summary = format!(
        "Service completion for appointment on {} ({} to {})",
        appointment.window_starts_at.date_naive(),
        appointment.window_starts_at.time(),
        appointment.window_ends_at.time()
    );
    let payload_json = json!({
        "appointment_id": appointment.id,
        "service_request_id": appointment.service_request_id,
        "provider_id": appointment.provider_id,
        "client_id": appointment.client_id,
        "window_starts_at": appointment.window_starts_at,
        "window_ends_at": appointment.window_ends_at,
        "completed_at": appointment.completed_at,
        "current_value_cents": service_request.current_value_cents,
    })
    .to_string();
    let payload_hash = sha256_hex(payload_json.as_bytes());

    let term = match deps.completion_terms.by_appointment(appointment.id).await? {
        Some(mut existing) => {
            existing.status = CompletionTermStatus::PendingClientAcceptance;
            existing.summary = summary;
            existing.payload_json = payload_json;
            existing.payload_hash = payload_hash;
            existing.pin_hash = Some(pin_hash);
            existing.pin_expires_at = Some(pin_expires_at);
            existing.pin_failed_attempts = 0;
            existing.accepted_method = None;
            existing.accepted_signature_name = None;
            existing.accepted_at = None;
            existing.contest_reason = None;
            existing.contested_at = None;
            existing.escalated_at = None;
            existing.updated_at = Some(now);
            deps.completion_terms.update(existing.clone()).await?;
            existing
        }
        None => {
            let term = CompletionTerm {
                id: Uuid::new_v4(),
                service_request_id: appointment.service_request_id,
                appointment_id: appointment.id,
                provider_id: appointment.provider_id,
                client_id: appointment.client_id,
                status: CompletionTermStatus::PendingClientAcceptance,
                summary,
                payload_json,
                payload_hash,
                pin_hash: Some(pin_hash),
                pin_expires_at: Some(pin_expires_at),
                pin_failed_attempts: 0,
                accepted_method: None,
                accepted_signature_name: None,
                accepted_at: None,
                contest_reason: None,
                contested_at: None,
                escalated_at: None,
                created_at: now,
                updated_at: None,
            };
            deps.completion_terms.insert(term.clone()).await?;
            term
        }
    };

    deps.record_history(history_entry(
        appointment,
        Some(appointment.status),
        appointment.operational_status,
        actor_id,
        actor_role,
        Some("completion PIN issued".to_string()),
        Some(json!({ "completion_term_id": term.id })),
    ))
    .await;

    info!("Completion PIN issued for appointment {}", appointment.id);

    // The single outbound message carrying the plaintext PIN.
    deps.notify(
        appointment.client_id,
        "Confirm your service completion",
        &format!(
            "Use PIN {} to confirm the completed service. It expires in {} minutes.",
            pin, deps.config.completion_pin_ttl_minutes
        ),
        None,
    )
    .await;

    Ok(CompletionPinIssued {
        term,
        one_time_pin: pin,
    })
}

pub(crate) fn generate_pin(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Salted PIN hash; the appointment id is the salt.
pub(crate) fn hash_pin(appointment_id: Uuid, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(appointment_id.as_bytes());
    hasher.update(pin.as_bytes());
    sha256_digest_hex(hasher)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    sha256_digest_hex(hasher)
}

fn sha256_digest_hex(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_are_numeric_and_fixed_length() {
        for _ in 0..32 {
            let pin = generate_pin(6);
            assert_eq!(pin.len(), 6);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn hash_is_deterministic_and_salted_by_appointment() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(hash_pin(first, "123456"), hash_pin(first, "123456"));
        assert_ne!(hash_pin(first, "123456"), hash_pin(second, "123456"));
        assert_ne!(hash_pin(first, "123456"), hash_pin(first, "654321"));
    }

    #[test]
    fn hash_verifies_against_plaintext() {
        let appointment_id = Uuid::new_v4();
        let pin = generate_pin(6);
        let stored = hash_pin(appointment_id, &pin);

        let submitted = hash_pin(appointment_id, &pin);
        assert!(constant_time::verify_slices_are_equal(
            submitted.as_bytes(),
            stored.as_bytes()
        )
        .is_ok());
    }
}
