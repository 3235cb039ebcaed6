use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RepoError;

/// Commercial plan tier of a provider; governs scope-change value caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Bronze,
    Silver,
    Gold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: Uuid,
    pub display_name: String,
    pub active: bool,
    pub plan_tier: PlanTier,
    /// UTC offset (minutes) of the provider's availability calendar; `None`
    /// means the platform default applies.
    pub availability_utc_offset_minutes: Option<i32>,
}

/// Read-only directory of platform users the scheduling core needs: provider
/// lookups for validation and the admin list for escalation fan-out.
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, RepoError>;

    async fn admin_user_ids(&self) -> Result<Vec<Uuid>, RepoError>;
}
