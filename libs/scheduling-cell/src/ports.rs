// libs/scheduling-cell/src/ports.rs
//
// Seams to the collaborators the scheduling core consults but does not own:
// checklist validation, reminder dispatch, notification delivery, the
// financial policy engine and the commercial value recalculator. Reminder,
// notification, ledger and telemetry calls are best-effort: a failure is
// logged and recorded, never allowed to fail the state transition that
// triggered it.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use shared_models::actor::ActorRole;

use crate::models::CommercialTotals;
use crate::repo::{ScopeChangeRepository, ServiceRequestRepository};

// ==============================================================================
// CHECKLIST VALIDATION
// ==============================================================================

#[derive(Debug, Clone)]
pub struct ChecklistGate {
    pub can_complete: bool,
    pub pending_item_names: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChecklistValidator: Send + Sync {
    /// Pass/fail gate consulted before an appointment may complete.
    async fn validate_required_items(&self, appointment_id: Uuid) -> Result<ChecklistGate>;
}

/// Default validator for deployments without checklist templates configured.
pub struct NoPendingChecklistValidator;

#[async_trait]
impl ChecklistValidator for NoPendingChecklistValidator {
    async fn validate_required_items(&self, _appointment_id: Uuid) -> Result<ChecklistGate> {
        Ok(ChecklistGate {
            can_complete: true,
            pending_item_names: Vec::new(),
        })
    }
}

// ==============================================================================
// REMINDERS & NOTIFICATIONS
// ==============================================================================

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule_for_appointment(&self, appointment_id: Uuid, reason: &str) -> Result<()>;

    async fn cancel_pending(&self, appointment_id: Uuid, reason: &str) -> Result<()>;
}

pub struct LoggingReminderScheduler;

#[async_trait]
impl ReminderScheduler for LoggingReminderScheduler {
    async fn schedule_for_appointment(&self, appointment_id: Uuid, reason: &str) -> Result<()> {
        info!("Reminder scheduling requested for appointment {}: {}", appointment_id, reason);
        Ok(())
    }

    async fn cancel_pending(&self, appointment_id: Uuid, reason: &str) -> Result<()> {
        info!("Reminder cancellation requested for appointment {}: {}", appointment_id, reason);
        Ok(())
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send<'a>(
        &self,
        recipient_id: Uuid,
        subject: &str,
        body: &str,
        action_url: Option<&'a str>,
    ) -> Result<()>;
}

pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send<'a>(
        &self,
        recipient_id: Uuid,
        subject: &str,
        _body: &str,
        _action_url: Option<&'a str>,
    ) -> Result<()> {
        info!("Notification to {}: {}", recipient_id, subject);
        Ok(())
    }
}

// ==============================================================================
// NO-SHOW TELEMETRY
// ==============================================================================

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NoShowTelemetry: Send + Sync {
    async fn record_presence_response<'a>(
        &self,
        appointment_id: Uuid,
        role: ActorRole,
        confirmed: bool,
        reason: Option<&'a str>,
    ) -> Result<()>;
}

pub struct LoggingNoShowTelemetry;

#[async_trait]
impl NoShowTelemetry for LoggingNoShowTelemetry {
    async fn record_presence_response<'a>(
        &self,
        appointment_id: Uuid,
        role: ActorRole,
        confirmed: bool,
        _reason: Option<&'a str>,
    ) -> Result<()> {
        info!(
            "Presence response on appointment {}: {} confirmed={}",
            appointment_id, role, confirmed
        );
        Ok(())
    }
}

// ==============================================================================
// FINANCIAL POLICY & CREDIT LEDGER
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinancialEvent {
    ClientCancellation,
    ProviderCancellation,
    ClientNoShow,
    ProviderNoShow,
}

impl FinancialEvent {
    /// The party compensated when this event fires.
    pub fn counterparty(&self) -> ActorRole {
        match self {
            FinancialEvent::ClientCancellation | FinancialEvent::ClientNoShow => {
                ActorRole::Provider
            }
            FinancialEvent::ProviderCancellation | FinancialEvent::ProviderNoShow => {
                ActorRole::Client
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FinancialBreakdown {
    pub rule_name: String,
    pub counterparty_actor: ActorRole,
    pub penalty_cents: i64,
    pub compensation_cents: i64,
    pub platform_retained_cents: i64,
    pub memo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditEntryType {
    Penalty,
    Compensation,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait FinancialPolicyCalculator: Send + Sync {
    async fn calculate(
        &self,
        event: FinancialEvent,
        service_value_cents: i64,
        window_starts_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<FinancialBreakdown>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn apply_mutation(
        &self,
        provider_id: Uuid,
        entry_type: CreditEntryType,
        amount_cents: i64,
        reason: &str,
        reference: Uuid,
    ) -> Result<()>;
}

pub struct LoggingCreditLedger;

#[async_trait]
impl CreditLedger for LoggingCreditLedger {
    async fn apply_mutation(
        &self,
        provider_id: Uuid,
        entry_type: CreditEntryType,
        amount_cents: i64,
        reason: &str,
        reference: Uuid,
    ) -> Result<()> {
        info!(
            "Credit mutation for provider {}: {:?} {} cents ({}; ref {})",
            provider_id, entry_type, amount_cents, reason, reference
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FinancialRule {
    name: &'static str,
    min_hours_before_start: f64,
    max_hours_before_start: Option<f64>,
    penalty_percent: i64,
    compensation_percent: i64,
    platform_retained_percent: i64,
}

/// Notice-tiered policy table: the earlier the event relative to the window
/// start, the softer the penalty. First matching rule wins.
pub struct TieredFinancialPolicyCalculator {
    rules: Vec<FinancialRule>,
}

impl Default for TieredFinancialPolicyCalculator {
    fn default() -> Self {
        Self {
            rules: vec![
                FinancialRule {
                    name: "free cancellation window",
                    min_hours_before_start: 24.0,
                    max_hours_before_start: None,
                    penalty_percent: 0,
                    compensation_percent: 0,
                    platform_retained_percent: 0,
                },
                FinancialRule {
                    name: "late notice",
                    min_hours_before_start: 12.0,
                    max_hours_before_start: Some(24.0),
                    penalty_percent: 15,
                    compensation_percent: 10,
                    platform_retained_percent: 5,
                },
                FinancialRule {
                    name: "very late notice",
                    min_hours_before_start: 2.0,
                    max_hours_before_start: Some(12.0),
                    penalty_percent: 30,
                    compensation_percent: 20,
                    platform_retained_percent: 10,
                },
                FinancialRule {
                    name: "no notice",
                    min_hours_before_start: 0.0,
                    max_hours_before_start: Some(2.0),
                    penalty_percent: 50,
                    compensation_percent: 35,
                    platform_retained_percent: 15,
                },
            ],
        }
    }
}

impl TieredFinancialPolicyCalculator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FinancialPolicyCalculator for TieredFinancialPolicyCalculator {
    async fn calculate(
        &self,
        event: FinancialEvent,
        service_value_cents: i64,
        window_starts_at: DateTime<Utc>,
        occurred_at: DateTime<Utc>,
    ) -> Result<FinancialBreakdown> {
        if service_value_cents <= 0 {
            anyhow::bail!("service value must be positive");
        }

        let hours_before_start =
            ((window_starts_at - occurred_at).num_minutes() as f64 / 60.0).max(0.0);

        let rule = self
            .rules
            .iter()
            .find(|r| {
                hours_before_start >= r.min_hours_before_start
                    && r.max_hours_before_start
                        .map_or(true, |max| hours_before_start <= max)
            })
            .ok_or_else(|| anyhow::anyhow!("no financial policy rule matched"))?;

        let penalty_cents = percent_of(service_value_cents, rule.penalty_percent);
        let mut compensation_cents = percent_of(service_value_cents, rule.compensation_percent);
        let mut platform_retained_cents =
            percent_of(service_value_cents, rule.platform_retained_percent);

        // The split can never allocate more than the penalty collected.
        let allocated = compensation_cents + platform_retained_cents;
        if allocated > penalty_cents {
            let overflow = allocated - penalty_cents;
            if platform_retained_cents >= overflow {
                platform_retained_cents -= overflow;
            } else {
                compensation_cents -= overflow - platform_retained_cents;
                platform_retained_cents = 0;
            }
        }

        Ok(FinancialBreakdown {
            rule_name: rule.name.to_string(),
            counterparty_actor: event.counterparty(),
            penalty_cents,
            compensation_cents,
            platform_retained_cents,
            memo: format!(
                "event={:?}; rule='{}'; notice_hours={:.2}; value_cents={}; penalty_cents={}; compensation_cents={}; platform_cents={}",
                event,
                rule.name,
                hours_before_start,
                service_value_cents,
                penalty_cents,
                compensation_cents,
                platform_retained_cents
            ),
        })
    }
}

fn percent_of(value_cents: i64, percent: i64) -> i64 {
    // Round half away from zero on the cent.
    (value_cents * percent + 50) / 100
}

// ==============================================================================
// COMMERCIAL VALUE RECALCULATION
// ==============================================================================

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommercialValueRecalculator: Send + Sync {
    /// Recompute the running commercial totals of a service request (base
    /// value plus approved scope increments).
    async fn recalculate(&self, service_request_id: Uuid) -> Result<CommercialTotals>;
}

pub struct SummingCommercialValueService {
    service_requests: Arc<dyn ServiceRequestRepository>,
    scope_changes: Arc<dyn ScopeChangeRepository>,
}

impl SummingCommercialValueService {
    pub fn new(
        service_requests: Arc<dyn ServiceRequestRepository>,
        scope_changes: Arc<dyn ScopeChangeRepository>,
    ) -> Self {
        Self {
            service_requests,
            scope_changes,
        }
    }
}

#[async_trait]
impl CommercialValueRecalculator for SummingCommercialValueService {
    async fn recalculate(&self, service_request_id: Uuid) -> Result<CommercialTotals> {
        let request = self
            .service_requests
            .get(service_request_id)
            .await
            .map_err(|e| anyhow::anyhow!(e.0))?
            .ok_or_else(|| anyhow::anyhow!("service request not found"))?;

        let base_value_cents = request
            .commercial_base_value_cents
            .or_else(|| request.accepted_proposal_value_cents())
            .unwrap_or(0)
            .max(0);

        let approved_incremental_value_cents: i64 = self
            .scope_changes
            .by_service_request(service_request_id)
            .await
            .map_err(|e| anyhow::anyhow!(e.0))?
            .iter()
            .filter(|sc| sc.status == crate::models::ScopeChangeStatus::ApprovedByClient)
            .map(|sc| sc.incremental_value_cents.max(0))
            .sum();

        Ok(CommercialTotals {
            base_value_cents,
            approved_incremental_value_cents,
            current_value_cents: base_value_cents + approved_incremental_value_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn penalty_split_never_exceeds_penalty() {
        let calculator = TieredFinancialPolicyCalculator::new();
        let start = Utc::now() + chrono::Duration::hours(3);

        let breakdown = calculator
            .calculate(FinancialEvent::ClientCancellation, 10_000, start, Utc::now())
            .await
            .unwrap();

        assert_eq!(breakdown.penalty_cents, 3_000);
        assert!(breakdown.compensation_cents + breakdown.platform_retained_cents <= breakdown.penalty_cents);
        assert_eq!(breakdown.counterparty_actor, ActorRole::Provider);
    }

    #[tokio::test]
    async fn generous_notice_carries_no_penalty() {
        let calculator = TieredFinancialPolicyCalculator::new();
        let start = Utc::now() + chrono::Duration::hours(48);

        let breakdown = calculator
            .calculate(FinancialEvent::ProviderCancellation, 10_000, start, Utc::now())
            .await
            .unwrap();

        assert_eq!(breakdown.penalty_cents, 0);
        assert_eq!(breakdown.counterparty_actor, ActorRole::Client);
    }
}
