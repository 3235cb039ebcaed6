// libs/availability-cell/src/services/schedule.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::actor::Actor;
use shared_models::provider::{ProviderDirectory, ProviderProfile};

use crate::models::{
    AvailabilityError, AvailabilityException, AvailabilityOverview, AvailabilityRule,
    CreateAvailabilityExceptionRequest, CreateAvailabilityRuleRequest, SlotWindow, SlotsQuery,
};
use crate::repo::{AvailabilityRepository, ReservedCalendar};
use crate::services::slots::{
    self, MAX_SLOT_DURATION_MINUTES, MIN_SLOT_DURATION_MINUTES,
};

/// Manages provider availability rules and exception blocks, and answers slot
/// queries. Reads here are lock-free by design; the scheduling coordinator
/// re-validates bookability under its own locks before committing.
pub struct AvailabilityService {
    repo: Arc<dyn AvailabilityRepository>,
    reserved: Arc<dyn ReservedCalendar>,
    providers: Arc<dyn ProviderDirectory>,
    config: AppConfig,
}

impl AvailabilityService {
    pub fn new(
        repo: Arc<dyn AvailabilityRepository>,
        reserved: Arc<dyn ReservedCalendar>,
        providers: Arc<dyn ProviderDirectory>,
        config: AppConfig,
    ) -> Self {
        Self {
            repo,
            reserved,
            providers,
            config,
        }
    }

    /// Rules plus exception blocks for a provider. Providers see their own
    /// calendar; admins see anyone's.
    pub async fn overview(
        &self,
        actor: Actor,
        provider_id: Uuid,
    ) -> Result<AvailabilityOverview, AvailabilityError> {
        self.require_provider_self_or_admin(actor, provider_id)?;
        self.resolve_active_provider(provider_id).await?;

        let rules = self.repo.active_rules_by_provider(provider_id).await?;
        let blocks = self.repo.active_exceptions_by_provider(provider_id).await?;

        Ok(AvailabilityOverview {
            provider_id,
            rules,
            blocks,
        })
    }

    pub async fn add_rule(
        &self,
        actor: Actor,
        request: CreateAvailabilityRuleRequest,
    ) -> Result<AvailabilityRule, AvailabilityError> {
        self.require_provider_self_or_admin(actor, request.provider_id)?;
        self.resolve_active_provider(request.provider_id).await?;

        if request.start_time >= request.end_time {
            return Err(AvailabilityError::InvalidWindow(
                "start time must be before end time".to_string(),
            ));
        }

        if !(MIN_SLOT_DURATION_MINUTES..=MAX_SLOT_DURATION_MINUTES)
            .contains(&request.slot_duration_minutes)
        {
            return Err(AvailabilityError::InvalidSlotDuration {
                min: MIN_SLOT_DURATION_MINUTES,
                max: MAX_SLOT_DURATION_MINUTES,
            });
        }

        // No two active rules for the same provider/day may overlap.
        let existing = self
            .repo
            .active_rules_by_provider(request.provider_id)
            .await?;
        let conflict = existing.iter().any(|r| {
            r.day_of_week == request.day_of_week
                && request.start_time < r.end_time
                && request.end_time > r.start_time
        });
        if conflict {
            return Err(AvailabilityError::ScheduleConflict(
                "an active rule already covers part of this time range".to_string(),
            ));
        }

        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            provider_id: request.provider_id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time: request.end_time,
            slot_duration_minutes: request.slot_duration_minutes,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.repo.insert_rule(rule.clone()).await?;

        info!(
            "Availability rule {} created for provider {} on {:?}",
            rule.id, rule.provider_id, rule.day_of_week
        );
        Ok(rule)
    }

    pub async fn remove_rule(&self, actor: Actor, rule_id: Uuid) -> Result<(), AvailabilityError> {
        let mut rule = self
            .repo
            .get_rule(rule_id)
            .await?
            .filter(|r| r.active)
            .ok_or(AvailabilityError::RuleNotFound)?;

        self.require_provider_self_or_admin(actor, rule.provider_id)?;

        rule.active = false;
        rule.updated_at = Some(Utc::now());
        self.repo.update_rule(rule).await?;

        info!("Availability rule {} deactivated", rule_id);
        Ok(())
    }

    pub async fn add_exception(
        &self,
        actor: Actor,
        request: CreateAvailabilityExceptionRequest,
    ) -> Result<AvailabilityException, AvailabilityError> {
        self.require_provider_self_or_admin(actor, request.provider_id)?;
        self.resolve_active_provider(request.provider_id).await?;

        if request.ends_at <= request.starts_at {
            return Err(AvailabilityError::InvalidWindow(
                "block end must be after block start".to_string(),
            ));
        }

        let existing = self
            .repo
            .active_exceptions_in_range(request.provider_id, request.starts_at, request.ends_at)
            .await?;
        if !existing.is_empty() {
            return Err(AvailabilityError::ScheduleConflict(
                "an active block already covers part of this window".to_string(),
            ));
        }

        // A block cannot be placed over a window a live appointment holds.
        let reserved = self
            .reserved
            .blocking_windows(request.provider_id, request.starts_at, request.ends_at, None)
            .await?;
        if reserved
            .iter()
            .any(|w| w.overlaps(request.starts_at, request.ends_at))
        {
            return Err(AvailabilityError::WindowReserved);
        }

        let exception = AvailabilityException {
            id: Uuid::new_v4(),
            provider_id: request.provider_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            reason: request.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
            active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.repo.insert_exception(exception.clone()).await?;

        info!(
            "Availability block {} created for provider {} ({} to {})",
            exception.id, exception.provider_id, exception.starts_at, exception.ends_at
        );
        Ok(exception)
    }

    pub async fn remove_exception(
        &self,
        actor: Actor,
        exception_id: Uuid,
    ) -> Result<(), AvailabilityError> {
        let mut exception = self
            .repo
            .get_exception(exception_id)
            .await?
            .filter(|e| e.active)
            .ok_or(AvailabilityError::ExceptionNotFound)?;

        self.require_provider_self_or_admin(actor, exception.provider_id)?;

        exception.active = false;
        exception.updated_at = Some(Utc::now());
        self.repo.update_exception(exception).await?;

        info!("Availability block {} deactivated", exception_id);
        Ok(())
    }

    /// Free windows for a provider over a bounded date range. Clients and
    /// admins may query any provider; providers only their own calendar.
    pub async fn available_slots(
        &self,
        actor: Actor,
        query: SlotsQuery,
    ) -> Result<Vec<SlotWindow>, AvailabilityError> {
        if actor.role.is_provider() && actor.id != query.provider_id {
            return Err(AvailabilityError::Forbidden(
                "providers may only query their own slots".to_string(),
            ));
        }

        let provider = self.resolve_active_provider(query.provider_id).await?;

        debug!(
            "Computing slots for provider {} from {} to {}",
            query.provider_id, query.from, query.to
        );

        let rules = self.repo.active_rules_by_provider(query.provider_id).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let exceptions = self
            .repo
            .active_exceptions_in_range(query.provider_id, query.from, query.to)
            .await?;
        let reserved = self
            .reserved
            .blocking_windows(query.provider_id, query.from, query.to, None)
            .await?;

        slots::build_slots(
            &rules,
            &exceptions,
            &reserved,
            query.from,
            query.to,
            query.slot_duration_minutes,
            self.provider_offset(&provider),
        )
    }

    /// Commit-time bookability check used by the scheduling coordinator while
    /// it holds the creation (or appointment) lock.
    pub async fn window_is_bookable(
        &self,
        provider_id: Uuid,
        window_start: chrono::DateTime<Utc>,
        window_end: chrono::DateTime<Utc>,
        exclude_appointment: Option<Uuid>,
    ) -> Result<bool, AvailabilityError> {
        let provider = self.resolve_active_provider(provider_id).await?;

        let rules = self.repo.active_rules_by_provider(provider_id).await?;
        if rules.is_empty() {
            return Ok(false);
        }

        let exceptions = self
            .repo
            .active_exceptions_in_range(provider_id, window_start, window_end)
            .await?;
        let reserved = self
            .reserved
            .blocking_windows(provider_id, window_start, window_end, exclude_appointment)
            .await?;

        Ok(slots::window_is_bookable(
            &rules,
            &exceptions,
            &reserved,
            window_start,
            window_end,
            self.provider_offset(&provider),
        ))
    }

    fn provider_offset(&self, provider: &ProviderProfile) -> i32 {
        provider
            .availability_utc_offset_minutes
            .unwrap_or(self.config.availability_utc_offset_minutes)
    }

    async fn resolve_active_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<ProviderProfile, AvailabilityError> {
        self.providers
            .get_provider(provider_id)
            .await?
            .filter(|p| p.active)
            .ok_or(AvailabilityError::ProviderNotFound)
    }

    fn require_provider_self_or_admin(
        &self,
        actor: Actor,
        provider_id: Uuid,
    ) -> Result<(), AvailabilityError> {
        if actor.role.is_admin() {
            return Ok(());
        }
        if actor.role.is_provider() && actor.id == provider_id {
            return Ok(());
        }
        Err(AvailabilityError::Forbidden(
            "only the provider or an admin may manage this calendar".to_string(),
        ))
    }
}
