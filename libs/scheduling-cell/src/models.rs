// libs/scheduling-cell/src/models.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use shared_models::actor::ActorRole;

// ==============================================================================
// APPOINTMENT AGGREGATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingProviderConfirmation,
    Confirmed,
    RejectedByProvider,
    ExpiredWithoutProviderAction,
    RescheduleRequestedByClient,
    RescheduleRequestedByProvider,
    RescheduleConfirmed,
    Arrived,
    InProgress,
    CancelledByClient,
    CancelledByProvider,
    Completed,
}

impl AppointmentStatus {
    /// Statuses that hold the calendar window against other bookings.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::PendingProviderConfirmation
                | AppointmentStatus::Confirmed
                | AppointmentStatus::Arrived
                | AppointmentStatus::InProgress
                | AppointmentStatus::RescheduleRequestedByClient
                | AppointmentStatus::RescheduleRequestedByProvider
                | AppointmentStatus::RescheduleConfirmed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::RejectedByProvider
                | AppointmentStatus::ExpiredWithoutProviderAction
                | AppointmentStatus::CancelledByClient
                | AppointmentStatus::CancelledByProvider
                | AppointmentStatus::Completed
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppointmentStatus::PendingProviderConfirmation => "pending_provider_confirmation",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::RejectedByProvider => "rejected_by_provider",
            AppointmentStatus::ExpiredWithoutProviderAction => "expired_without_provider_action",
            AppointmentStatus::RescheduleRequestedByClient => "reschedule_requested_by_client",
            AppointmentStatus::RescheduleRequestedByProvider => "reschedule_requested_by_provider",
            AppointmentStatus::RescheduleConfirmed => "reschedule_confirmed",
            AppointmentStatus::Arrived => "arrived",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::CancelledByClient => "cancelled_by_client",
            AppointmentStatus::CancelledByProvider => "cancelled_by_provider",
            AppointmentStatus::Completed => "completed",
        };
        write!(f, "{}", label)
    }
}

/// Field-execution sub-state, tracked once a booking is confirmed. Runs in
/// parallel with the primary status and joins it at defined sync points
/// (arrival, execution start, completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalStatus {
    OnTheWay,
    OnSite,
    InService,
    WaitingParts,
    Completed,
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationalStatus::OnTheWay => "on_the_way",
            OperationalStatus::OnSite => "on_site",
            OperationalStatus::InService => "in_service",
            OperationalStatus::WaitingParts => "waiting_parts",
            OperationalStatus::Completed => "completed",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub status: AppointmentStatus,
    pub window_starts_at: DateTime<Utc>,
    pub window_ends_at: DateTime<Utc>,
    /// Provider-confirmation SLA deadline; cleared on confirmation.
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,

    // Reschedule negotiation, present only while a request is pending.
    pub proposed_window_starts_at: Option<DateTime<Utc>>,
    pub proposed_window_ends_at: Option<DateTime<Utc>>,
    pub reschedule_requested_at: Option<DateTime<Utc>>,
    pub reschedule_requested_by: Option<ActorRole>,
    pub reschedule_request_reason: Option<String>,

    pub operational_status: Option<OperationalStatus>,
    pub operational_status_updated_at: Option<DateTime<Utc>>,
    pub operational_status_reason: Option<String>,

    pub confirmed_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub arrived_latitude: Option<f64>,
    pub arrived_longitude: Option<f64>,
    pub arrived_accuracy_meters: Option<f64>,
    pub arrived_manual_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub client_presence_confirmed: Option<bool>,
    pub client_presence_responded_at: Option<DateTime<Utc>>,
    pub client_presence_reason: Option<String>,
    pub provider_presence_confirmed: Option<bool>,
    pub provider_presence_responded_at: Option<DateTime<Utc>>,
    pub provider_presence_reason: Option<String>,

    // Computed by an external risk worker; carried on the aggregate only.
    pub no_show_risk_score: Option<i32>,
    pub no_show_risk_level: Option<String>,
    pub no_show_risk_reasons: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.provider_id == user_id
    }
}

/// Append-only audit trail entry. Never edited or deleted; together the
/// entries reconstruct every transition the aggregate went through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentHistoryEntry {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub previous_status: Option<AppointmentStatus>,
    pub new_status: AppointmentStatus,
    pub previous_operational_status: Option<OperationalStatus>,
    pub new_operational_status: Option<OperationalStatus>,
    pub actor_id: Option<Uuid>,
    pub actor_role: ActorRole,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

// ==============================================================================
// APPOINTMENT REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub service_request_id: Uuid,
    pub provider_id: Uuid,
    pub window_starts_at: DateTime<Utc>,
    pub window_ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRescheduleRequest {
    pub proposed_window_starts_at: DateTime<Utc>,
    pub proposed_window_ends_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondRescheduleRequest {
    pub accept: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkArrivalRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub manual_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExecutionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOperationalStatusRequest {
    pub status: OperationalStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondPresenceRequest {
    pub confirmed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentListQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// ==============================================================================
// SCOPE-CHANGE (AMENDMENT) MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeChangeStatus {
    PendingClientApproval,
    ApprovedByClient,
    RejectedByClient,
    Expired,
}

impl fmt::Display for ScopeChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScopeChangeStatus::PendingClientApproval => "pending_client_approval",
            ScopeChangeStatus::ApprovedByClient => "approved_by_client",
            ScopeChangeStatus::RejectedByClient => "rejected_by_client",
            ScopeChangeStatus::Expired => "expired",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn from_content_type(content_type: &str) -> Self {
        let normalized = content_type.trim().to_ascii_lowercase();
        if normalized.starts_with("image/") {
            MediaKind::Image
        } else if normalized.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Document
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeChangeAttachment {
    pub id: Uuid,
    pub scope_change_request_id: Uuid,
    pub uploaded_by: Uuid,
    pub file_url: String,
    pub file_name: String,
    pub content_type: String,
    pub media_kind: MediaKind,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Provider-initiated amendment to the agreed scope/value, awaiting client
/// approval. Versions increase monotonically per appointment and chain to the
/// previous version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeChangeRequest {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub version: i32,
    pub status: ScopeChangeStatus,
    pub reason: String,
    pub additional_scope_description: String,
    pub incremental_value_cents: i64,
    pub requested_at: DateTime<Utc>,
    pub client_responded_at: Option<DateTime<Utc>>,
    pub client_response_reason: Option<String>,
    pub previous_version_id: Option<Uuid>,
    pub attachments: Vec<ScopeChangeAttachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScopeChangeRequest {
    pub reason: String,
    pub additional_scope_description: String,
    pub incremental_value_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectScopeChangeRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterScopeChangeAttachmentRequest {
    pub file_url: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

// ==============================================================================
// COMPLETION ACCEPTANCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTermStatus {
    PendingClientAcceptance,
    AcceptedByClient,
    ContestedByClient,
    Expired,
    EscalatedToAdmin,
}

impl fmt::Display for CompletionTermStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CompletionTermStatus::PendingClientAcceptance => "pending_client_acceptance",
            CompletionTermStatus::AcceptedByClient => "accepted_by_client",
            CompletionTermStatus::ContestedByClient => "contested_by_client",
            CompletionTermStatus::Expired => "expired",
            CompletionTermStatus::EscalatedToAdmin => "escalated_to_admin",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMethod {
    Pin,
    SignatureName,
}

/// Tamper-evident record of work acceptance. The PIN is never stored or
/// logged in plaintext; only its salted hash lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionTerm {
    pub id: Uuid,
    pub service_request_id: Uuid,
    pub appointment_id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub status: CompletionTermStatus,
    pub summary: String,
    pub payload_json: String,
    pub payload_hash: String,
    #[serde(skip_serializing, default)]
    pub pin_hash: Option<String>,
    pub pin_expires_at: Option<DateTime<Utc>>,
    pub pin_failed_attempts: i32,
    pub accepted_method: Option<CompletionMethod>,
    pub accepted_signature_name: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub contest_reason: Option<String>,
    pub contested_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateCompletionPinRequest {
    #[serde(default)]
    pub force_regenerate: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCompletionPinRequest {
    pub pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmCompletionRequest {
    pub method: CompletionMethod,
    pub pin: Option<String>,
    pub signature_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestCompletionRequest {
    pub reason: String,
}

/// Result of issuing a completion PIN. `one_time_pin` is the only place the
/// plaintext ever appears besides the client notification.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPinIssued {
    pub term: CompletionTerm,
    pub one_time_pin: String,
}

/// Outcome of an operational-status update; carries the issued completion
/// term when the transition reached `Completed`.
#[derive(Debug, Clone, Serialize)]
pub struct OperationalUpdateOutcome {
    pub appointment: Appointment,
    pub completion: Option<CompletionPinIssued>,
}

// ==============================================================================
// SERVICE REQUEST PROJECTION
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRequestStatus {
    Open,
    Scheduled,
    Completed,
    Validated,
    Canceled,
}

impl ServiceRequestStatus {
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ServiceRequestStatus::Completed
                | ServiceRequestStatus::Validated
                | ServiceRequestStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub provider_id: Uuid,
    pub estimated_value_cents: Option<i64>,
    pub accepted: bool,
    pub invalidated: bool,
}

/// The slice of the service request the scheduling core needs; resolved by id
/// through the repository rather than held as a live object graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequestSummary {
    pub id: Uuid,
    pub client_id: Uuid,
    pub status: ServiceRequestStatus,
    pub proposals: Vec<ProposalSummary>,
    pub commercial_base_value_cents: Option<i64>,
    pub approved_incremental_value_cents: i64,
    pub current_value_cents: i64,
}

impl ServiceRequestSummary {
    /// Highest accepted, non-invalidated proposal value, when any.
    pub fn accepted_proposal_value_cents(&self) -> Option<i64> {
        self.proposals
            .iter()
            .filter(|p| p.accepted && !p.invalidated)
            .filter_map(|p| p.estimated_value_cents)
            .filter(|v| *v > 0)
            .max()
    }

    pub fn has_accepted_proposal_from(&self, provider_id: Uuid) -> bool {
        self.proposals
            .iter()
            .any(|p| p.provider_id == provider_id && p.accepted && !p.invalidated)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommercialTotals {
    pub base_value_cents: i64,
    pub approved_incremental_value_cents: i64,
    pub current_value_cents: i64,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulingError {
    #[error("{0}")]
    Forbidden(String),

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Service request not found")]
    RequestNotFound,

    #[error("Provider not found")]
    ProviderNotFound,

    #[error("Scope change request not found")]
    ScopeChangeNotFound,

    #[error("Completion term not found")]
    TermNotFound,

    #[error("Operation not allowed in current status: {0}")]
    InvalidState(String),

    #[error("Invalid appointment window: {0}")]
    InvalidWindow(String),

    #[error("Invalid reason: {0}")]
    InvalidReason(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("The chosen window is not available for this provider")]
    SlotUnavailable,

    #[error("The window conflicts with another appointment for this service request")]
    RequestWindowConflict,

    #[error("Service request is already closed")]
    RequestClosed,

    #[error("Provider has no accepted proposal for this service request")]
    ProviderNotAssigned,

    #[error("A scope change request is already pending client approval")]
    ScopeChangePending,

    #[error("The scope change request has expired")]
    ScopeChangeExpired,

    #[error("The completion PIN has expired")]
    PinExpired,

    #[error("The completion PIN is invalid")]
    InvalidPin,

    #[error("The completion PIN is locked after too many failed attempts")]
    PinLocked,

    #[error("Repository error: {0}")]
    Repository(String),
}

impl SchedulingError {
    /// Stable machine-readable code surfaced to API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulingError::Forbidden(_) => "forbidden",
            SchedulingError::AppointmentNotFound => "appointment_not_found",
            SchedulingError::RequestNotFound => "request_not_found",
            SchedulingError::ProviderNotFound => "provider_not_found",
            SchedulingError::ScopeChangeNotFound => "scope_change_not_found",
            SchedulingError::TermNotFound => "term_not_found",
            SchedulingError::InvalidState(_) => "invalid_state",
            SchedulingError::InvalidWindow(_) => "invalid_window",
            SchedulingError::InvalidReason(_) => "invalid_reason",
            SchedulingError::InvalidValue(_) => "invalid_value",
            SchedulingError::PolicyViolation(_) => "policy_violation",
            SchedulingError::SlotUnavailable => "slot_unavailable",
            SchedulingError::RequestWindowConflict => "request_window_conflict",
            SchedulingError::RequestClosed => "request_closed",
            SchedulingError::ProviderNotAssigned => "provider_not_assigned",
            SchedulingError::ScopeChangePending => "scope_change_pending",
            SchedulingError::ScopeChangeExpired => "scope_change_expired",
            SchedulingError::PinExpired => "pin_expired",
            SchedulingError::InvalidPin => "invalid_pin",
            SchedulingError::PinLocked => "pin_locked",
            SchedulingError::Repository(_) => "repository",
        }
    }
}

impl From<shared_models::error::RepoError> for SchedulingError {
    fn from(err: shared_models::error::RepoError) -> Self {
        SchedulingError::Repository(err.0)
    }
}

impl From<availability_cell::models::AvailabilityError> for SchedulingError {
    fn from(err: availability_cell::models::AvailabilityError) -> Self {
        use availability_cell::models::AvailabilityError as AE;
        match err {
            AE::Forbidden(msg) => SchedulingError::Forbidden(msg),
            AE::ProviderNotFound => SchedulingError::ProviderNotFound,
            AE::Repository(msg) => SchedulingError::Repository(msg),
            other => SchedulingError::InvalidWindow(other.to_string()),
        }
    }
}

impl IntoResponse for SchedulingError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulingError::Forbidden(_) => StatusCode::FORBIDDEN,
            SchedulingError::AppointmentNotFound
            | SchedulingError::RequestNotFound
            | SchedulingError::ProviderNotFound
            | SchedulingError::ScopeChangeNotFound
            | SchedulingError::TermNotFound => StatusCode::NOT_FOUND,
            SchedulingError::SlotUnavailable
            | SchedulingError::RequestWindowConflict
            | SchedulingError::ScopeChangePending => StatusCode::CONFLICT,
            SchedulingError::InvalidState(_)
            | SchedulingError::RequestClosed
            | SchedulingError::ProviderNotAssigned
            | SchedulingError::ScopeChangeExpired
            | SchedulingError::PinExpired
            | SchedulingError::PinLocked => StatusCode::UNPROCESSABLE_ENTITY,
            SchedulingError::InvalidPin => StatusCode::BAD_REQUEST,
            SchedulingError::InvalidWindow(_)
            | SchedulingError::InvalidReason(_)
            | SchedulingError::InvalidValue(_)
            | SchedulingError::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            SchedulingError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error_code": self.code(),
            "error_message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
