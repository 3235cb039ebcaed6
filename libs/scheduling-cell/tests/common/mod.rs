// libs/scheduling-cell/tests/common/mod.rs
//
// Shared fixture: in-memory backend, default collaborators, and seed helpers
// used across the scheduling integration suites.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use uuid::Uuid;

use availability_cell::repo::{AvailabilityRepository, MemoryAvailabilityRepository, ReservedCalendar};
use availability_cell::services::schedule::AvailabilityService;
use shared_config::{AppConfig, PlanCap, PlanCaps};
use shared_models::actor::{Actor, ActorRole};
use shared_models::provider::{PlanTier, ProviderProfile};

use scheduling_cell::models::{
    Appointment, AppointmentStatus, OperationalStatus, ProposalSummary, ServiceRequestStatus,
    ServiceRequestSummary,
};
use scheduling_cell::ports::{
    LoggingCreditLedger, LoggingNoShowTelemetry, LoggingNotificationSender,
    LoggingReminderScheduler, NoPendingChecklistValidator, SummingCommercialValueService,
    TieredFinancialPolicyCalculator,
};
use scheduling_cell::repo::{
    MemoryAppointmentRepository, MemoryCompletionTermRepository, MemoryProviderDirectory,
    MemoryScopeChangeRepository, MemoryServiceRequestRepository,
};
use scheduling_cell::services::booking::SchedulingService;
use scheduling_cell::services::completion::CompletionService;
use scheduling_cell::services::expiry::ExpirySweeper;
use scheduling_cell::services::locks::LockRegistry;
use scheduling_cell::services::negotiation::NegotiationService;
use scheduling_cell::services::operational::OperationalService;
use scheduling_cell::services::scope_change::ScopeChangeService;
use scheduling_cell::services::SchedulingDeps;

pub fn test_config() -> AppConfig {
    AppConfig {
        confirmation_expiry_hours: 12,
        cancel_min_notice_hours: 2,
        reschedule_min_lead_hours: 2,
        reschedule_max_horizon_days: 30,
        scope_change_timeout_hours: 24,
        scope_change_max_attachments: 5,
        scope_change_max_attachment_bytes: 10 * 1024 * 1024,
        completion_pin_ttl_minutes: 30,
        completion_pin_length: 6,
        completion_pin_max_attempts: 5,
        availability_utc_offset_minutes: 0,
        expiry_sweep_batch_size: 200,
        plan_caps: PlanCaps {
            bronze: PlanCap {
                absolute_cap_cents: 15_000,
                percent_cap: 30,
            },
            silver: PlanCap {
                absolute_cap_cents: 40_000,
                percent_cap: 50,
            },
            gold: PlanCap {
                absolute_cap_cents: 100_000,
                percent_cap: 80,
            },
        },
    }
}

pub struct TestBackend {
    pub deps: Arc<SchedulingDeps>,
    pub providers: Arc<MemoryProviderDirectory>,
    pub service_requests: Arc<MemoryServiceRequestRepository>,
    pub availability_rules: Arc<MemoryAvailabilityRepository>,
    pub scheduling: SchedulingService,
    pub negotiation: NegotiationService,
    pub operational: OperationalService,
    pub scope_changes: ScopeChangeService,
    pub completion: CompletionService,
    pub sweeper: ExpirySweeper,
}

pub fn build_backend() -> TestBackend {
    let appointments = Arc::new(MemoryAppointmentRepository::new());
    let scope_changes = Arc::new(MemoryScopeChangeRepository::new());
    let service_requests = Arc::new(MemoryServiceRequestRepository::new());
    let providers = Arc::new(MemoryProviderDirectory::new());
    let availability_rules = Arc::new(MemoryAvailabilityRepository::new());

    let availability = Arc::new(AvailabilityService::new(
        Arc::clone(&availability_rules) as Arc<dyn AvailabilityRepository>,
        Arc::clone(&appointments) as Arc<dyn ReservedCalendar>,
        providers.clone(),
        test_config(),
    ));

    let deps = Arc::new(SchedulingDeps {
        appointments: appointments.clone(),
        scope_changes: scope_changes.clone(),
        completion_terms: Arc::new(MemoryCompletionTermRepository::new()),
        service_requests: service_requests.clone(),
        providers: providers.clone(),
        availability,
        locks: Arc::new(LockRegistry::new()),
        checklist: Arc::new(NoPendingChecklistValidator),
        reminders: Arc::new(LoggingReminderScheduler),
        notifications: Arc::new(LoggingNotificationSender),
        telemetry: Arc::new(LoggingNoShowTelemetry),
        financial: Arc::new(TieredFinancialPolicyCalculator::new()),
        ledger: Arc::new(LoggingCreditLedger),
        commercial: Arc::new(SummingCommercialValueService::new(
            service_requests.clone(),
            scope_changes,
        )),
        config: test_config(),
    });

    TestBackend {
        scheduling: SchedulingService::new(Arc::clone(&deps)),
        negotiation: NegotiationService::new(Arc::clone(&deps)),
        operational: OperationalService::new(Arc::clone(&deps)),
        scope_changes: ScopeChangeService::new(Arc::clone(&deps)),
        completion: CompletionService::new(Arc::clone(&deps)),
        sweeper: ExpirySweeper::new(Arc::clone(&deps)),
        deps,
        providers,
        service_requests,
        availability_rules,
    }
}

pub fn client(id: Uuid) -> Actor {
    Actor::new(id, ActorRole::Client)
}

pub fn provider(id: Uuid) -> Actor {
    Actor::new(id, ActorRole::Provider)
}

impl TestBackend {
    /// Active provider with round-the-clock availability on every weekday,
    /// so window checks do not depend on the date a test runs.
    pub async fn seed_provider(&self, plan_tier: PlanTier) -> Uuid {
        let provider_id = Uuid::new_v4();
        self.providers
            .upsert_provider(ProviderProfile {
                id: provider_id,
                display_name: "Seeded Provider".to_string(),
                active: true,
                plan_tier,
                availability_utc_offset_minutes: Some(0),
            })
            .await;

        for day in [
            chrono::Weekday::Mon,
            chrono::Weekday::Tue,
            chrono::Weekday::Wed,
            chrono::Weekday::Thu,
            chrono::Weekday::Fri,
            chrono::Weekday::Sat,
            chrono::Weekday::Sun,
        ] {
            let rule = availability_cell::models::AvailabilityRule {
                id: Uuid::new_v4(),
                provider_id,
                day_of_week: day,
                start_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
                slot_duration_minutes: 30,
                active: true,
                created_at: Utc::now(),
                updated_at: None,
            };
            self.availability_rules.insert_rule(rule).await.unwrap();
        }

        provider_id
    }

    pub async fn seed_service_request(
        &self,
        client_id: Uuid,
        provider_id: Uuid,
        accepted_value_cents: i64,
    ) -> Uuid {
        let request_id = Uuid::new_v4();
        self.service_requests
            .upsert(ServiceRequestSummary {
                id: request_id,
                client_id,
                status: ServiceRequestStatus::Open,
                proposals: vec![ProposalSummary {
                    provider_id,
                    estimated_value_cents: Some(accepted_value_cents),
                    accepted: true,
                    invalidated: false,
                }],
                commercial_base_value_cents: Some(accepted_value_cents),
                approved_incremental_value_cents: 0,
                current_value_cents: accepted_value_cents,
            })
            .await;
        request_id
    }

    /// Insert an appointment directly in the given state, bypassing the
    /// creation pipeline. Used to stage mid-lifecycle scenarios.
    pub async fn seed_appointment(
        &self,
        client_id: Uuid,
        provider_id: Uuid,
        request_id: Uuid,
        status: AppointmentStatus,
        operational_status: Option<OperationalStatus>,
        window_starts_at: DateTime<Utc>,
        window_ends_at: DateTime<Utc>,
    ) -> Appointment {
        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            service_request_id: request_id,
            client_id,
            provider_id,
            status,
            window_starts_at,
            window_ends_at,
            expires_at: matches!(status, AppointmentStatus::PendingProviderConfirmation)
                .then(|| now + Duration::hours(12)),
            reason: None,
            proposed_window_starts_at: None,
            proposed_window_ends_at: None,
            reschedule_requested_at: None,
            reschedule_requested_by: None,
            reschedule_request_reason: None,
            operational_status,
            operational_status_updated_at: operational_status.map(|_| now),
            operational_status_reason: None,
            confirmed_at: (!matches!(status, AppointmentStatus::PendingProviderConfirmation))
                .then_some(now),
            arrived_at: matches!(
                status,
                AppointmentStatus::Arrived | AppointmentStatus::InProgress | AppointmentStatus::Completed
            )
            .then_some(now),
            arrived_latitude: None,
            arrived_longitude: None,
            arrived_accuracy_meters: None,
            arrived_manual_reason: None,
            started_at: matches!(
                status,
                AppointmentStatus::InProgress | AppointmentStatus::Completed
            )
            .then_some(now),
            rejected_at: None,
            cancelled_at: None,
            completed_at: matches!(status, AppointmentStatus::Completed).then_some(now),
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
        self.deps
            .appointments
            .insert(appointment.clone())
            .await
            .unwrap();
        appointment
    }
}

/// Tomorrow at the given UTC hour/minute; keeps windows strictly in the
/// future without pinning tests to a calendar date.
pub fn tomorrow_at(hour: u32, minute: u32) -> DateTime<Utc> {
    (Utc::now() + Duration::days(1))
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
        .and_utc()
}
