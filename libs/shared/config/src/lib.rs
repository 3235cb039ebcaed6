use std::env;
use tracing::warn;

/// Scheduling policy knobs, resolved once at startup from the environment.
///
/// Every value has a production default so the service boots in a fresh
/// environment; unparsable overrides are logged and ignored.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Hours a provider has to confirm a pending appointment before it
    /// auto-expires.
    pub confirmation_expiry_hours: i64,
    /// Minimum notice, in hours, required to cancel before the window start.
    pub cancel_min_notice_hours: i64,
    /// Minimum lead time for a proposed reschedule window.
    pub reschedule_min_lead_hours: i64,
    /// Maximum advance horizon for a proposed reschedule window, in days.
    pub reschedule_max_horizon_days: i64,
    /// Hours a scope-change request may stay pending before it expires.
    pub scope_change_timeout_hours: i64,
    pub scope_change_max_attachments: usize,
    pub scope_change_max_attachment_bytes: i64,
    /// Completion PIN time-to-live.
    pub completion_pin_ttl_minutes: i64,
    pub completion_pin_length: usize,
    pub completion_pin_max_attempts: i32,
    /// UTC offset (minutes) used to interpret availability rule times when a
    /// provider has no explicit offset configured.
    pub availability_utc_offset_minutes: i32,
    /// Batch size for the periodic expiry sweeps.
    pub expiry_sweep_batch_size: usize,
    pub plan_caps: PlanCaps,
}

/// Per-tier caps for scope-change incremental values.
#[derive(Debug, Clone, Copy)]
pub struct PlanCap {
    pub absolute_cap_cents: i64,
    pub percent_cap: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanCaps {
    pub bronze: PlanCap,
    pub silver: PlanCap,
    pub gold: PlanCap,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            confirmation_expiry_hours: env_i64("APPOINTMENT_CONFIRMATION_EXPIRY_HOURS", 12),
            cancel_min_notice_hours: env_i64("APPOINTMENT_CANCEL_MIN_NOTICE_HOURS", 2),
            reschedule_min_lead_hours: env_i64("APPOINTMENT_RESCHEDULE_MIN_LEAD_HOURS", 2),
            reschedule_max_horizon_days: env_i64("APPOINTMENT_RESCHEDULE_MAX_HORIZON_DAYS", 30),
            scope_change_timeout_hours: env_i64("SCOPE_CHANGE_TIMEOUT_HOURS", 24),
            scope_change_max_attachments: env_i64("SCOPE_CHANGE_MAX_ATTACHMENTS", 5) as usize,
            scope_change_max_attachment_bytes: env_i64(
                "SCOPE_CHANGE_MAX_ATTACHMENT_BYTES",
                10 * 1024 * 1024,
            ),
            completion_pin_ttl_minutes: env_i64("COMPLETION_PIN_TTL_MINUTES", 30),
            completion_pin_length: env_i64("COMPLETION_PIN_LENGTH", 6) as usize,
            completion_pin_max_attempts: env_i64("COMPLETION_PIN_MAX_ATTEMPTS", 5) as i32,
            availability_utc_offset_minutes: resolve_availability_offset(),
            expiry_sweep_batch_size: env_i64("EXPIRY_SWEEP_BATCH_SIZE", 200) as usize,
            plan_caps: PlanCaps {
                bronze: PlanCap {
                    absolute_cap_cents: env_i64("PLAN_BRONZE_SCOPE_CAP_CENTS", 15_000),
                    percent_cap: env_i64("PLAN_BRONZE_SCOPE_CAP_PERCENT", 30),
                },
                silver: PlanCap {
                    absolute_cap_cents: env_i64("PLAN_SILVER_SCOPE_CAP_CENTS", 40_000),
                    percent_cap: env_i64("PLAN_SILVER_SCOPE_CAP_PERCENT", 50),
                },
                gold: PlanCap {
                    absolute_cap_cents: env_i64("PLAN_GOLD_SCOPE_CAP_CENTS", 100_000),
                    percent_cap: env_i64("PLAN_GOLD_SCOPE_CAP_PERCENT", 80),
                },
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", key, default);
            default
        }),
        Err(_) => default,
    }
}

/// Rule times are local to the provider's market. The platform default is the
/// business timezone (UTC-3); an unresolvable override falls back to the host
/// offset so slot math stays internally consistent.
fn resolve_availability_offset() -> i32 {
    const DEFAULT_BUSINESS_OFFSET_MINUTES: i32 = -180;

    match env::var("AVAILABILITY_UTC_OFFSET_MINUTES") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            let host_offset = chrono::Local::now().offset().local_minus_utc() / 60;
            warn!(
                "AVAILABILITY_UTC_OFFSET_MINUTES is not a valid integer, falling back to host offset {}",
                host_offset
            );
            host_offset
        }),
        Err(_) => DEFAULT_BUSINESS_OFFSET_MINUTES,
    }
}
