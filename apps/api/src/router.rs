use std::sync::Arc;

use axum::{routing::get, Router};

use availability_cell::repo::{MemoryAvailabilityRepository, ReservedCalendar};
use availability_cell::router::availability_routes;
use availability_cell::services::schedule::AvailabilityService;
use scheduling_cell::handlers::SchedulingState;
use scheduling_cell::ports::{
    LoggingCreditLedger, LoggingNoShowTelemetry, LoggingNotificationSender,
    LoggingReminderScheduler, NoPendingChecklistValidator, SummingCommercialValueService,
    TieredFinancialPolicyCalculator,
};
use scheduling_cell::repo::{
    MemoryAppointmentRepository, MemoryCompletionTermRepository, MemoryProviderDirectory,
    MemoryScopeChangeRepository, MemoryServiceRequestRepository,
};
use scheduling_cell::router::{scheduling_routes, service_request_routes};
use scheduling_cell::services::booking::SchedulingService;
use scheduling_cell::services::completion::CompletionService;
use scheduling_cell::services::expiry::ExpirySweeper;
use scheduling_cell::services::locks::LockRegistry;
use scheduling_cell::services::negotiation::NegotiationService;
use scheduling_cell::services::operational::OperationalService;
use scheduling_cell::services::scope_change::ScopeChangeService;
use scheduling_cell::services::SchedulingDeps;
use shared_config::AppConfig;

pub fn create_router() -> (Router, Arc<SchedulingState>) {
    let config = AppConfig::from_env();

    let appointments = Arc::new(MemoryAppointmentRepository::new());
    let scope_changes = Arc::new(MemoryScopeChangeRepository::new());
    let completion_terms = Arc::new(MemoryCompletionTermRepository::new());
    let service_requests = Arc::new(MemoryServiceRequestRepository::new());
    let providers = Arc::new(MemoryProviderDirectory::new());
    let availability_repo = Arc::new(MemoryAvailabilityRepository::new());

    let availability = Arc::new(AvailabilityService::new(
        availability_repo,
        Arc::clone(&appointments) as Arc<dyn ReservedCalendar>,
        providers.clone(),
        config.clone(),
    ));

    let deps = Arc::new(SchedulingDeps {
        appointments: appointments.clone(),
        scope_changes: scope_changes.clone(),
        completion_terms,
        service_requests: service_requests.clone(),
        providers,
        availability: Arc::clone(&availability),
        locks: Arc::new(LockRegistry::new()),
        checklist: Arc::new(NoPendingChecklistValidator),
        reminders: Arc::new(LoggingReminderScheduler),
        notifications: Arc::new(LoggingNotificationSender),
        telemetry: Arc::new(LoggingNoShowTelemetry),
        financial: Arc::new(TieredFinancialPolicyCalculator::new()),
        ledger: Arc::new(LoggingCreditLedger),
        commercial: Arc::new(SummingCommercialValueService::new(
            service_requests,
            scope_changes,
        )),
        config,
    });

    let state = Arc::new(SchedulingState {
        scheduling: SchedulingService::new(Arc::clone(&deps)),
        negotiation: NegotiationService::new(Arc::clone(&deps)),
        operational: OperationalService::new(Arc::clone(&deps)),
        scope_changes: ScopeChangeService::new(Arc::clone(&deps)),
        completion: CompletionService::new(Arc::clone(&deps)),
        sweeper: ExpirySweeper::new(Arc::clone(&deps)),
    });

    let router = Router::new()
        .route("/", get(|| async { "Fixdesk scheduling API is running!" }))
        .nest("/availability", availability_routes(availability))
        .nest("/appointments", scheduling_routes(Arc::clone(&state)))
        .nest("/service-requests", service_request_routes(Arc::clone(&state)));

    (router, state)
}
