// libs/availability-cell/src/models.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY MODELS
// ==============================================================================

/// Recurring weekly availability window for a provider. Times are local to
/// the provider's availability timezone; conversion to UTC happens in the
/// slot generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One-off block on a provider's calendar (vacation, personal time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Half-open bookable (or reserved) window `[starts_at, ends_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl SlotWindow {
    pub fn new(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self { starts_at, ends_at }
    }

    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        self.starts_at < other_end && self.ends_at > other_start
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityRuleRequest {
    pub provider_id: Uuid,
    pub day_of_week: Weekday,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default = "default_slot_duration")]
    pub slot_duration_minutes: i64,
}

fn default_slot_duration() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityExceptionRequest {
    pub provider_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityOverview {
    pub provider_id: Uuid,
    pub rules: Vec<AvailabilityRule>,
    pub blocks: Vec<AvailabilityException>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotsQuery {
    pub provider_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub slot_duration_minutes: Option<i64>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AvailabilityError {
    #[error("{0}")]
    Forbidden(String),

    #[error("Provider not found")]
    ProviderNotFound,

    #[error("Availability rule not found")]
    RuleNotFound,

    #[error("Availability exception not found")]
    ExceptionNotFound,

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Slot query range cannot exceed {0} days")]
    RangeTooLarge(i64),

    #[error("Slot duration must be between {min} and {max} minutes")]
    InvalidSlotDuration { min: i64, max: i64 },

    #[error("Invalid availability window: {0}")]
    InvalidWindow(String),

    #[error("Conflicts with existing availability: {0}")]
    ScheduleConflict(String),

    #[error("Window contains a live appointment")]
    WindowReserved,

    #[error("Repository error: {0}")]
    Repository(String),
}

impl AvailabilityError {
    /// Stable machine-readable code surfaced to API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AvailabilityError::Forbidden(_) => "forbidden",
            AvailabilityError::ProviderNotFound => "provider_not_found",
            AvailabilityError::RuleNotFound => "rule_not_found",
            AvailabilityError::ExceptionNotFound => "exception_not_found",
            AvailabilityError::InvalidRange(_) => "invalid_range",
            AvailabilityError::RangeTooLarge(_) => "range_too_large",
            AvailabilityError::InvalidSlotDuration { .. } => "invalid_slot_duration",
            AvailabilityError::InvalidWindow(_) => "invalid_window",
            AvailabilityError::ScheduleConflict(_) => "availability_conflict",
            AvailabilityError::WindowReserved => "window_reserved",
            AvailabilityError::Repository(_) => "repository",
        }
    }
}

impl From<shared_models::error::RepoError> for AvailabilityError {
    fn from(err: shared_models::error::RepoError) -> Self {
        AvailabilityError::Repository(err.0)
    }
}

impl IntoResponse for AvailabilityError {
    fn into_response(self) -> Response {
        let status = match &self {
            AvailabilityError::Forbidden(_) => StatusCode::FORBIDDEN,
            AvailabilityError::ProviderNotFound
            | AvailabilityError::RuleNotFound
            | AvailabilityError::ExceptionNotFound => StatusCode::NOT_FOUND,
            AvailabilityError::ScheduleConflict(_) | AvailabilityError::WindowReserved => {
                StatusCode::CONFLICT
            }
            AvailabilityError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };

        let body = Json(json!({
            "success": false,
            "error_code": self.code(),
            "error_message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
