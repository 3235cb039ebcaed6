// libs/availability-cell/tests/schedule_test.rs
//
// Service-level tests for availability rule/exception management and slot
// queries, over the in-memory repository and stub collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use tokio::sync::RwLock;
use uuid::Uuid;

use availability_cell::models::{
    AvailabilityError, CreateAvailabilityExceptionRequest, CreateAvailabilityRuleRequest,
    SlotWindow, SlotsQuery,
};
use availability_cell::repo::{MemoryAvailabilityRepository, ReservedCalendar};
use availability_cell::services::schedule::AvailabilityService;
use shared_config::AppConfig;
use shared_models::actor::{Actor, ActorRole};
use shared_models::error::RepoError;
use shared_models::provider::{PlanTier, ProviderDirectory, ProviderProfile};

struct StaticProviderDirectory {
    provider: ProviderProfile,
}

#[async_trait]
impl ProviderDirectory for StaticProviderDirectory {
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, RepoError> {
        Ok((provider_id == self.provider.id).then(|| self.provider.clone()))
    }

    async fn admin_user_ids(&self) -> Result<Vec<Uuid>, RepoError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct StubReservedCalendar {
    windows: Arc<RwLock<Vec<SlotWindow>>>,
}

impl StubReservedCalendar {
    async fn reserve(&self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) {
        self.windows
            .write()
            .await
            .push(SlotWindow::new(starts_at, ends_at));
    }
}

#[async_trait]
impl ReservedCalendar for StubReservedCalendar {
    async fn blocking_windows(
        &self,
        _provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _exclude_appointment: Option<Uuid>,
    ) -> Result<Vec<SlotWindow>, RepoError> {
        Ok(self
            .windows
            .read()
            .await
            .iter()
            .filter(|w| w.starts_at < to && w.ends_at > from)
            .copied()
            .collect())
    }
}

struct Setup {
    service: AvailabilityService,
    reserved: Arc<StubReservedCalendar>,
    provider_id: Uuid,
}

fn setup() -> Setup {
    let provider_id = Uuid::new_v4();
    let reserved = Arc::new(StubReservedCalendar::default());

    let service = AvailabilityService::new(
        Arc::new(MemoryAvailabilityRepository::new()),
        Arc::clone(&reserved) as Arc<dyn ReservedCalendar>,
        Arc::new(StaticProviderDirectory {
            provider: ProviderProfile {
                id: provider_id,
                display_name: "Test Provider".to_string(),
                active: true,
                plan_tier: PlanTier::Bronze,
                availability_utc_offset_minutes: Some(0),
            },
        }),
        AppConfig::from_env(),
    );

    Setup {
        service,
        reserved,
        provider_id,
    }
}

fn provider_actor(provider_id: Uuid) -> Actor {
    Actor::new(provider_id, ActorRole::Provider)
}

fn rule_request(
    provider_id: Uuid,
    day: Weekday,
    start: (u32, u32),
    end: (u32, u32),
) -> CreateAvailabilityRuleRequest {
    CreateAvailabilityRuleRequest {
        provider_id,
        day_of_week: day,
        start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
        slot_duration_minutes: 30,
    }
}

// 2026-03-02 is a Monday.
fn monday(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

#[tokio::test]
async fn overlapping_active_rules_are_rejected() {
    let setup = setup();
    let actor = provider_actor(setup.provider_id);

    setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (9, 0), (12, 0)))
        .await
        .unwrap();

    let overlap = setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (11, 0), (14, 0)))
        .await;
    assert!(matches!(overlap, Err(AvailabilityError::ScheduleConflict(_))));

    // A different weekday with the same hours is fine.
    setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Tue, (11, 0), (14, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn removed_rule_no_longer_conflicts() {
    let setup = setup();
    let actor = provider_actor(setup.provider_id);

    let rule = setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (9, 0), (12, 0)))
        .await
        .unwrap();
    setup.service.remove_rule(actor, rule.id).await.unwrap();

    setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (10, 0), (13, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn exceptions_cannot_overlap_each_other_or_live_appointments() {
    let setup = setup();
    let actor = provider_actor(setup.provider_id);

    setup
        .service
        .add_exception(
            actor,
            CreateAvailabilityExceptionRequest {
                provider_id: setup.provider_id,
                starts_at: monday(9, 0),
                ends_at: monday(12, 0),
                reason: Some("vacation morning".to_string()),
            },
        )
        .await
        .unwrap();

    let overlapping = setup
        .service
        .add_exception(
            actor,
            CreateAvailabilityExceptionRequest {
                provider_id: setup.provider_id,
                starts_at: monday(11, 0),
                ends_at: monday(13, 0),
                reason: None,
            },
        )
        .await;
    assert!(matches!(
        overlapping,
        Err(AvailabilityError::ScheduleConflict(_))
    ));

    setup.reserved.reserve(monday(15, 0), monday(16, 0)).await;
    let over_appointment = setup
        .service
        .add_exception(
            actor,
            CreateAvailabilityExceptionRequest {
                provider_id: setup.provider_id,
                starts_at: monday(14, 30),
                ends_at: monday(15, 30),
                reason: None,
            },
        )
        .await;
    assert!(matches!(
        over_appointment,
        Err(AvailabilityError::WindowReserved)
    ));
}

#[tokio::test]
async fn slots_subtract_exceptions_and_reservations() {
    let setup = setup();
    let actor = provider_actor(setup.provider_id);

    setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (9, 0), (12, 0)))
        .await
        .unwrap();
    setup
        .service
        .add_exception(
            actor,
            CreateAvailabilityExceptionRequest {
                provider_id: setup.provider_id,
                starts_at: monday(9, 0),
                ends_at: monday(10, 0),
                reason: None,
            },
        )
        .await
        .unwrap();
    setup.reserved.reserve(monday(11, 0), monday(11, 30)).await;

    let slots = setup
        .service
        .available_slots(
            actor,
            SlotsQuery {
                provider_id: setup.provider_id,
                from: monday(0, 0),
                to: monday(23, 0),
                slot_duration_minutes: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        slots,
        vec![
            SlotWindow::new(monday(10, 0), monday(10, 30)),
            SlotWindow::new(monday(10, 30), monday(11, 0)),
            SlotWindow::new(monday(11, 30), monday(12, 0)),
        ]
    );
}

#[tokio::test]
async fn providers_may_only_query_their_own_calendar() {
    let setup = setup();
    let stranger = Actor::new(Uuid::new_v4(), ActorRole::Provider);

    let result = setup
        .service
        .available_slots(
            stranger,
            SlotsQuery {
                provider_id: setup.provider_id,
                from: monday(0, 0),
                to: monday(23, 0),
                slot_duration_minutes: None,
            },
        )
        .await;
    assert!(matches!(result, Err(AvailabilityError::Forbidden(_))));

    // Clients are allowed to browse any provider's slots.
    let client = Actor::new(Uuid::new_v4(), ActorRole::Client);
    let slots = setup
        .service
        .available_slots(
            client,
            SlotsQuery {
                provider_id: setup.provider_id,
                from: monday(0, 0),
                to: monday(23, 0),
                slot_duration_minutes: None,
            },
        )
        .await
        .unwrap();
    assert!(slots.is_empty());
}

#[tokio::test]
async fn slot_queries_validate_range_and_duration() {
    let setup = setup();
    let actor = provider_actor(setup.provider_id);

    setup
        .service
        .add_rule(actor, rule_request(setup.provider_id, Weekday::Mon, (9, 0), (12, 0)))
        .await
        .unwrap();

    let too_long = setup
        .service
        .available_slots(
            actor,
            SlotsQuery {
                provider_id: setup.provider_id,
                from: monday(0, 0),
                to: monday(0, 0) + Duration::days(45),
                slot_duration_minutes: None,
            },
        )
        .await;
    assert!(matches!(too_long, Err(AvailabilityError::RangeTooLarge(_))));

    let bad_duration = setup
        .service
        .available_slots(
            actor,
            SlotsQuery {
                provider_id: setup.provider_id,
                from: monday(0, 0),
                to: monday(23, 0),
                slot_duration_minutes: Some(5),
            },
        )
        .await;
    assert!(matches!(
        bad_duration,
        Err(AvailabilityError::InvalidSlotDuration { .. })
    ));
}
