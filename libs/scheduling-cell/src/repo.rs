// libs/scheduling-cell/src/repo.rs
//
// Persistence seams for the scheduling aggregates. The backing store is only
// required to provide atomic single-entity reads and writes; every
// cross-entity consistency guarantee is layered on top through the keyed lock
// registry in services::locks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use availability_cell::models::SlotWindow;
use availability_cell::repo::ReservedCalendar;
use shared_models::error::RepoError;
use shared_models::provider::{ProviderDirectory, ProviderProfile};

use crate::models::{
    Appointment, AppointmentHistoryEntry, AppointmentStatus, CommercialTotals, CompletionTerm,
    ScopeChangeRequest, ScopeChangeStatus, ServiceRequestStatus, ServiceRequestSummary,
};

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<(), RepoError>;

    async fn update(&self, appointment: Appointment) -> Result<(), RepoError>;

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, RepoError>;

    /// Blocking-status appointments for a provider overlapping `[from, to)`.
    async fn blocking_by_provider_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_appointment: Option<Uuid>,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn blocking_by_service_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn list_by_provider(
        &self,
        provider_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn list_by_client(
        &self,
        client_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, RepoError>;

    /// Appointments still pending provider confirmation whose SLA deadline is
    /// behind `now`. Used by the expiry sweep; naturally idempotent because
    /// expired rows stop matching once transitioned.
    async fn expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Appointment>, RepoError>;

    async fn append_history(&self, entry: AppointmentHistoryEntry) -> Result<(), RepoError>;

    async fn history_for(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentHistoryEntry>, RepoError>;
}

#[async_trait]
pub trait ScopeChangeRepository: Send + Sync {
    async fn insert(&self, request: ScopeChangeRequest) -> Result<(), RepoError>;

    async fn update(&self, request: ScopeChangeRequest) -> Result<(), RepoError>;

    async fn get(&self, request_id: Uuid) -> Result<Option<ScopeChangeRequest>, RepoError>;

    async fn pending_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<ScopeChangeRequest>, RepoError>;

    /// Highest-version request for an appointment regardless of status.
    async fn latest_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<ScopeChangeRequest>, RepoError>;

    async fn by_service_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<Vec<ScopeChangeRequest>, RepoError>;

    /// Pending requests whose `requested_at` is at or before `cutoff`.
    async fn expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScopeChangeRequest>, RepoError>;
}

#[async_trait]
pub trait CompletionTermRepository: Send + Sync {
    async fn insert(&self, term: CompletionTerm) -> Result<(), RepoError>;

    async fn update(&self, term: CompletionTerm) -> Result<(), RepoError>;

    /// The single live term for an appointment, when one exists.
    async fn by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<CompletionTerm>, RepoError>;
}

#[async_trait]
pub trait ServiceRequestRepository: Send + Sync {
    async fn get(
        &self,
        service_request_id: Uuid,
    ) -> Result<Option<ServiceRequestSummary>, RepoError>;

    async fn update_status(
        &self,
        service_request_id: Uuid,
        status: ServiceRequestStatus,
    ) -> Result<(), RepoError>;

    async fn update_commercial_totals(
        &self,
        service_request_id: Uuid,
        totals: CommercialTotals,
    ) -> Result<(), RepoError>;
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ==============================================================================

#[derive(Default)]
pub struct MemoryAppointmentRepository {
    appointments: Arc<RwLock<HashMap<Uuid, Appointment>>>,
    history: Arc<RwLock<Vec<AppointmentHistoryEntry>>>,
}

impl MemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppointmentRepository for MemoryAppointmentRepository {
    async fn insert(&self, appointment: Appointment) -> Result<(), RepoError> {
        self.appointments
            .write()
            .await
            .insert(appointment.id, appointment);
        Ok(())
    }

    async fn update(&self, appointment: Appointment) -> Result<(), RepoError> {
        self.appointments
            .write()
            .await
            .insert(appointment.id, appointment);
        Ok(())
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, RepoError> {
        Ok(self.appointments.read().await.get(&appointment_id).cloned())
    }

    async fn blocking_by_provider_in_range(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_appointment: Option<Uuid>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| {
                a.provider_id == provider_id
                    && a.status.is_blocking()
                    && a.window_starts_at < to
                    && a.window_ends_at > from
                    && Some(a.id) != exclude_appointment
            })
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.window_starts_at);
        Ok(rows)
    }

    async fn blocking_by_service_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.service_request_id == service_request_id && a.status.is_blocking())
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.window_starts_at);
        Ok(rows)
    }

    async fn list_by_provider(
        &self,
        provider_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.provider_id == provider_id)
            .filter(|a| from.map_or(true, |f| a.window_ends_at > f))
            .filter(|a| to.map_or(true, |t| a.window_starts_at < t))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.window_starts_at);
        Ok(rows)
    }

    async fn list_by_client(
        &self,
        client_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| a.client_id == client_id)
            .filter(|a| from.map_or(true, |f| a.window_ends_at > f))
            .filter(|a| to.map_or(true, |t| a.window_starts_at < t))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.window_starts_at);
        Ok(rows)
    }

    async fn expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Appointment>, RepoError> {
        let mut rows: Vec<Appointment> = self
            .appointments
            .read()
            .await
            .values()
            .filter(|a| {
                a.status == AppointmentStatus::PendingProviderConfirmation
                    && a.expires_at.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.expires_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn append_history(&self, entry: AppointmentHistoryEntry) -> Result<(), RepoError> {
        self.history.write().await.push(entry);
        Ok(())
    }

    async fn history_for(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<AppointmentHistoryEntry>, RepoError> {
        let mut entries: Vec<AppointmentHistoryEntry> = self
            .history
            .read()
            .await
            .iter()
            .filter(|h| h.appointment_id == appointment_id)
            .cloned()
            .collect();
        entries.sort_by_key(|h| h.occurred_at);
        Ok(entries)
    }
}

/// Lets the availability cell subtract live appointment windows without
/// depending on this crate.
#[async_trait]
impl ReservedCalendar for MemoryAppointmentRepository {
    async fn blocking_windows(
        &self,
        provider_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_appointment: Option<Uuid>,
    ) -> Result<Vec<SlotWindow>, RepoError> {
        let rows = self
            .blocking_by_provider_in_range(provider_id, from, to, exclude_appointment)
            .await?;
        Ok(rows
            .into_iter()
            .map(|a| SlotWindow::new(a.window_starts_at, a.window_ends_at))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryScopeChangeRepository {
    requests: Arc<RwLock<HashMap<Uuid, ScopeChangeRequest>>>,
}

impl MemoryScopeChangeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScopeChangeRepository for MemoryScopeChangeRepository {
    async fn insert(&self, request: ScopeChangeRequest) -> Result<(), RepoError> {
        self.requests.write().await.insert(request.id, request);
        Ok(())
    }

    async fn update(&self, request: ScopeChangeRequest) -> Result<(), RepoError> {
        self.requests.write().await.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, request_id: Uuid) -> Result<Option<ScopeChangeRequest>, RepoError> {
        Ok(self.requests.read().await.get(&request_id).cloned())
    }

    async fn pending_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<ScopeChangeRequest>, RepoError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .find(|r| {
                r.appointment_id == appointment_id
                    && r.status == ScopeChangeStatus::PendingClientApproval
            })
            .cloned())
    }

    async fn latest_by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<ScopeChangeRequest>, RepoError> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.appointment_id == appointment_id)
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn by_service_request(
        &self,
        service_request_id: Uuid,
    ) -> Result<Vec<ScopeChangeRequest>, RepoError> {
        let mut rows: Vec<ScopeChangeRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.service_request_id == service_request_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.appointment_id, r.version));
        Ok(rows)
    }

    async fn expired_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScopeChangeRequest>, RepoError> {
        let mut rows: Vec<ScopeChangeRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| {
                r.status == ScopeChangeStatus::PendingClientApproval && r.requested_at <= cutoff
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.requested_at);
        rows.truncate(limit);
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryCompletionTermRepository {
    terms: Arc<RwLock<HashMap<Uuid, CompletionTerm>>>,
}

impl MemoryCompletionTermRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionTermRepository for MemoryCompletionTermRepository {
    async fn insert(&self, term: CompletionTerm) -> Result<(), RepoError> {
        self.terms.write().await.insert(term.id, term);
        Ok(())
    }

    async fn update(&self, term: CompletionTerm) -> Result<(), RepoError> {
        self.terms.write().await.insert(term.id, term);
        Ok(())
    }

    async fn by_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Option<CompletionTerm>, RepoError> {
        Ok(self
            .terms
            .read()
            .await
            .values()
            .filter(|t| t.appointment_id == appointment_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryServiceRequestRepository {
    requests: Arc<RwLock<HashMap<Uuid, ServiceRequestSummary>>>,
}

impl MemoryServiceRequestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, request: ServiceRequestSummary) {
        self.requests.write().await.insert(request.id, request);
    }
}

#[async_trait]
impl ServiceRequestRepository for MemoryServiceRequestRepository {
    async fn get(
        &self,
        service_request_id: Uuid,
    ) -> Result<Option<ServiceRequestSummary>, RepoError> {
        Ok(self.requests.read().await.get(&service_request_id).cloned())
    }

    async fn update_status(
        &self,
        service_request_id: Uuid,
        status: ServiceRequestStatus,
    ) -> Result<(), RepoError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&service_request_id)
            .ok_or_else(|| RepoError("service request not found".to_string()))?;
        request.status = status;
        Ok(())
    }

    async fn update_commercial_totals(
        &self,
        service_request_id: Uuid,
        totals: CommercialTotals,
    ) -> Result<(), RepoError> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&service_request_id)
            .ok_or_else(|| RepoError("service request not found".to_string()))?;
        request.commercial_base_value_cents = Some(totals.base_value_cents);
        request.approved_incremental_value_cents = totals.approved_incremental_value_cents;
        request.current_value_cents = totals.current_value_cents;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProviderDirectory {
    providers: Arc<RwLock<HashMap<Uuid, ProviderProfile>>>,
    admins: Arc<RwLock<Vec<Uuid>>>,
}

impl MemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_provider(&self, profile: ProviderProfile) {
        self.providers.write().await.insert(profile.id, profile);
    }

    pub async fn add_admin(&self, admin_id: Uuid) {
        self.admins.write().await.push(admin_id);
    }
}

#[async_trait]
impl ProviderDirectory for MemoryProviderDirectory {
    async fn get_provider(&self, provider_id: Uuid) -> Result<Option<ProviderProfile>, RepoError> {
        Ok(self.providers.read().await.get(&provider_id).cloned())
    }

    async fn admin_user_ids(&self) -> Result<Vec<Uuid>, RepoError> {
        Ok(self.admins.read().await.clone())
    }
}
