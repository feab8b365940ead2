use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::dispatch::{RoomQueueBank, StatusMutator};
use crate::error::DispatchError;
use crate::limits::*;
use crate::observability;

/// Manages per-tenant dispatchers. Each tenant gets its own queue bank,
/// occupancy bitmap, notification hub, and worker pool. A single process
/// owns the in-memory room state for a given tenant at a time.
pub struct TenantManager {
    dispatchers: DashMap<String, Arc<RoomQueueBank>>,
}

impl TenantManager {
    pub fn new() -> Self {
        Self {
            dispatchers: DashMap::new(),
        }
    }

    /// Get or create the tenant's dispatcher and start its worker pool.
    /// Idempotent: re-activating an existing tenant returns the same
    /// dispatcher and leaves its running pool alone.
    pub async fn activate(
        &self,
        tenant: &str,
        rooms: usize,
        mutator: Arc<dyn StatusMutator>,
    ) -> Result<Arc<RoomQueueBank>, DispatchError> {
        if let Some(bank) = self.dispatchers.get(tenant) {
            return Ok(bank.value().clone());
        }
        if tenant.is_empty() {
            return Err(DispatchError::InvalidTenantName("empty"));
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(DispatchError::InvalidTenantName("too long"));
        }
        if self.dispatchers.len() >= MAX_TENANTS {
            return Err(DispatchError::LimitExceeded("too many tenants"));
        }
        if rooms == 0 {
            return Err(DispatchError::LimitExceeded("tenant needs at least one room"));
        }
        if rooms > MAX_ROOMS_PER_TENANT {
            return Err(DispatchError::LimitExceeded("too many rooms"));
        }

        let bank = Arc::new(RoomQueueBank::new(tenant, rooms));
        bank.start_workers(mutator).await?;
        self.dispatchers.insert(tenant.to_string(), bank.clone());
        metrics::gauge!(observability::TENANTS_ACTIVE).set(self.dispatchers.len() as f64);
        info!(tenant, rooms, "tenant activated");
        Ok(bank)
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<RoomQueueBank>> {
        self.dispatchers.get(tenant).map(|e| e.value().clone())
    }

    /// Stop the tenant's worker pool and drop its dispatcher. Queued
    /// tickets are abandoned by design. Returns false if the tenant was
    /// not active; calling it twice is fine.
    pub async fn deactivate(&self, tenant: &str) -> bool {
        let Some((_, bank)) = self.dispatchers.remove(tenant) else {
            return false;
        };
        bank.stop_all_workers().await;
        let abandoned: usize = bank.queue_depths().iter().sum();
        if abandoned > 0 {
            tracing::warn!(tenant, abandoned, "deactivation abandoned queued tickets");
            metrics::gauge!(observability::TICKETS_WAITING).decrement(abandoned as f64);
        }
        metrics::gauge!(observability::TENANTS_ACTIVE).set(self.dispatchers.len() as f64);
        info!(tenant, "tenant deactivated");
        true
    }

    /// Process-shutdown path: deactivate every tenant concurrently.
    pub async fn shutdown(&self) {
        let tenants: Vec<String> = self
            .dispatchers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        futures::future::join_all(tenants.iter().map(|t| self.deactivate(t))).await;
    }
}

impl Default for TenantManager {
    fn default() -> Self {
        Self::new()
    }
}
