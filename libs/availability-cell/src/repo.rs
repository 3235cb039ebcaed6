// libs/availability-cell/src/repo.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_models::error::RepoError;

use crate::models::{AvailabilityException, AvailabilityRule, SlotWindow};

/// Persistence seam for availability rules and exception blocks. The backing
/// store only promises atomic single-entity reads and writes; overlap
/// invariants are enforced by the service layer.
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<(), RepoError>;

    async fn update_rule(&self, rule: AvailabilityRule) -> Result<(), RepoError>;

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, RepoError>;

    /// Active rules for a provider, ordered by day of week then start time.
    async fn active_rules_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, RepoError>;

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<(), RepoError>;

    async fn update_exception(&self, exception: AvailabilityException) -> Result<(), RepoError>;

    async fn get_exception(
        &self,
        exception_id: Uuid,
    ) -> Result<Option<AvailabilityException>, RepoError>;

    /// Active exceptions for a provider overlapping `[from, to)`.
    async fn active_exceptions_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityException>, RepoError>;

    async fn active_exceptions_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<AvailabilityException>, RepoError>;
}

/// Windows already held by live appointments. Implemented by the scheduling
/// cell; consulted here so exceptions cannot be placed over a booked window
/// and so the slot generator can subtract reservations.
#[async_trait]
pub trait ReservedCalendar: Send + Sync {
    async fn blocking_windows(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_appointment: Option<Uuid>,
    ) -> Result<Vec<SlotWindow>, RepoError>;
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATION
// ==============================================================================

#[derive(Default)]
pub struct MemoryAvailabilityRepository {
    rules: Arc<RwLock<HashMap<Uuid, AvailabilityRule>>>,
    exceptions: Arc<RwLock<HashMap<Uuid, AvailabilityException>>>,
}

impl MemoryAvailabilityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AvailabilityRepository for MemoryAvailabilityRepository {
    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<(), RepoError> {
        self.rules.write().await.insert(rule.id, rule);
        Ok(())
    }

    async fn update_rule(&self, rule: AvailabilityRule) -> Result<(), RepoError> {
        self.rules.write().await.insert(rule.id, rule);
        Ok(())
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, RepoError> {
        Ok(self.rules.read().await.get(&rule_id).cloned())
    }

    async fn active_rules_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<AvailabilityRule>, RepoError> {
        let mut rules: Vec<AvailabilityRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.provider_id == provider_id && r.active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.day_of_week.num_days_from_monday(), r.start_time));
        Ok(rules)
    }

    async fn insert_exception(&self, exception: AvailabilityException) -> Result<(), RepoError> {
        self.exceptions.write().await.insert(exception.id, exception);
        Ok(())
    }

    async fn update_exception(&self, exception: AvailabilityException) -> Result<(), RepoError> {
        self.exceptions.write().await.insert(exception.id, exception);
        Ok(())
    }

    async fn get_exception(
        &self,
        exception_id: Uuid,
    ) -> Result<Option<AvailabilityException>, RepoError> {
        Ok(self.exceptions.read().await.get(&exception_id).cloned())
    }

    async fn active_exceptions_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityException>, RepoError> {
        let mut blocks: Vec<AvailabilityException> = self
            .exceptions
            .read()
            .await
            .values()
            .filter(|e| {
                e.provider_id == provider_id && e.active && e.starts_at < to && e.ends_at > from
            })
            .cloned()
            .collect();
        blocks.sort_by_key(|e| e.starts_at);
        Ok(blocks)
    }

    async fn active_exceptions_by_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<Vec<AvailabilityException>, RepoError> {
        let mut blocks: Vec<AvailabilityException> = self
            .exceptions
            .read()
            .await
            .values()
            .filter(|e| e.provider_id == provider_id && e.active)
            .cloned()
            .collect();
        blocks.sort_by_key(|e| e.starts_at);
        Ok(blocks)
    }
}
